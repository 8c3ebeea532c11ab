#![forbid(unsafe_code)]

//! Crash-safe persistence of a string-keyed map as a single JSON document.
//!
//! Writes go to a temporary sibling file and are renamed over the target, so
//! the on-disk document is never observable in a half-written state. There is
//! no cross-process coordination; a single writing process is assumed.

use std::{
    collections::HashMap,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    fs::{copy, create_dir_all, metadata, read, remove_file, rename, File},
    io::AsyncWriteExt,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no data file exists to back up")]
    MissingSource,
}

/// A string-keyed map persisted as one JSON file, with atomic replacement on
/// save and full-copy backups.
#[derive(Debug)]
pub struct KeyedStore<V> {
    path: PathBuf,
    backup_dir: PathBuf,
    backup_prefix: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> KeyedStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Opens a store at `path`, creating the parent and backup directories.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if either directory cannot be created.
    pub async fn open(
        path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        backup_prefix: &str,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let backup_dir = backup_dir.into();
        if let Some(parent) = path.parent() {
            create_dir_all(parent).await?;
        }
        create_dir_all(&backup_dir).await?;
        Ok(Self {
            path,
            backup_dir,
            backup_prefix: backup_prefix.to_owned(),
            _value: PhantomData,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted map.
    ///
    /// A missing file is the empty map. An unparsable file also degrades to
    /// the empty map after logging an error: callers keep running, but any
    /// pre-existing configuration stays invisible until the file is restored
    /// from a backup.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] for failures other than a missing file.
    pub async fn load(&self) -> Result<HashMap<String, V>, StoreError> {
        let bytes = match read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no data file yet, starting empty");
                return Ok(HashMap::new());
            }
            Err(error) => return Err(error.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(map) => Ok(map),
            Err(error) => {
                tracing::error!(
                    path = %self.path.display(),
                    %error,
                    "data file is unreadable, degrading to an empty map; restore from backup"
                );
                Ok(HashMap::new())
            }
        }
    }

    /// Serializes `map` and atomically replaces the data file.
    ///
    /// # Errors
    /// Returns [`StoreError::Serialize`] if encoding fails and
    /// [`StoreError::Io`] if the write or rename fails. The temporary file is
    /// removed on a best-effort basis before the error is returned.
    pub async fn save(&self, map: &HashMap<String, V>) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(map)?;
        let tmp_path = self.tmp_path();

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&encoded).await?;
            file.sync_all().await?;
            rename(&tmp_path, &self.path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(error) = written {
            tracing::error!(
                path = %self.path.display(),
                %error,
                "save failed, removing temporary file"
            );
            let _ = remove_file(&tmp_path).await;
            return Err(error.into());
        }

        Ok(())
    }

    /// Copies the current data file into the backup directory.
    ///
    /// The backup is named `<name>.json`, or
    /// `<prefix>-<RFC3339 timestamp with ':' replaced by '-'>.json` when no
    /// name is given. Returns the path of the written backup.
    ///
    /// # Errors
    /// Returns [`StoreError::MissingSource`] if no data file exists yet, and
    /// [`StoreError::Io`] if the copy fails.
    pub async fn backup(&self, name: Option<&str>) -> Result<PathBuf, StoreError> {
        if metadata(&self.path).await.is_err() {
            return Err(StoreError::MissingSource);
        }

        let file_name = match name {
            Some(name) => format!("{name}.json"),
            None => {
                let stamp = Utc::now()
                    .to_rfc3339_opts(SecondsFormat::Secs, true)
                    .replace(':', "-");
                format!("{}-{stamp}.json", self.backup_prefix)
            }
        };
        let target = self.backup_dir.join(file_name);
        copy(&self.path, &target).await?;
        tracing::info!(backup = %target.display(), "wrote settings backup");
        Ok(target)
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("store"));
        self.path
            .with_file_name(format!("{file_name}.tmp-{:016x}", rand::random::<u64>()))
    }
}
