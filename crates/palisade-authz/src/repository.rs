use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
};

use tokio::sync::{Mutex, RwLock};

use palisade_core::{
    GroupKey, GroupName, PermissionGroup, PermissionNode, RoleId, TenantId, TenantSettings,
};
use palisade_store::KeyedStore;

use crate::errors::GroupError;

/// Notified after every successfully persisted group mutation. The resolver
/// registers its cache invalidator here, so no mutation path can forget to
/// invalidate.
pub trait GroupChangeObserver: Send + Sync {
    fn groups_changed(&self, tenant: &TenantId);
}

/// CRUD over permission groups, scoped by tenant and embedded in each
/// tenant's settings record.
///
/// The full tenant map lives in memory and the entire map is rewritten to
/// disk after every mutation. Mutations for one tenant serialize behind a
/// per-tenant async mutex; mutations for different tenants may interleave,
/// because they edit the shared in-memory map before either save runs.
pub struct GroupRepository {
    store: KeyedStore<TenantSettings>,
    settings: RwLock<HashMap<String, TenantSettings>>,
    tenant_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    observers: std::sync::RwLock<Vec<Arc<dyn GroupChangeObserver>>>,
}

impl GroupRepository {
    /// Loads the persisted tenant map and wraps it.
    ///
    /// # Errors
    /// Returns [`GroupError::Storage`] if the initial load fails for a reason
    /// other than a missing or unreadable file (those degrade to empty).
    pub async fn open(store: KeyedStore<TenantSettings>) -> Result<Self, GroupError> {
        let settings = store.load().await?;
        Ok(Self {
            store,
            settings: RwLock::new(settings),
            tenant_locks: Mutex::new(HashMap::new()),
            observers: std::sync::RwLock::new(Vec::new()),
        })
    }

    pub fn register_observer(&self, observer: Arc<dyn GroupChangeObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    pub async fn group(&self, tenant: &TenantId, key: &GroupKey) -> Option<PermissionGroup> {
        let settings = self.settings.read().await;
        settings
            .get(tenant.as_str())
            .and_then(|tenant_settings| tenant_settings.permission_groups.get(key))
            .cloned()
    }

    /// Every group of the tenant, or `None` if the tenant has no settings
    /// record at all.
    pub async fn all_groups(
        &self,
        tenant: &TenantId,
    ) -> Option<HashMap<GroupKey, PermissionGroup>> {
        let settings = self.settings.read().await;
        settings
            .get(tenant.as_str())
            .map(|tenant_settings| tenant_settings.permission_groups.clone())
    }

    /// Inserts an empty group under `key`.
    ///
    /// # Errors
    /// [`GroupError::AlreadyExists`] if the key is taken, or
    /// [`GroupError::Storage`] if the persist fails.
    pub async fn create_group(
        &self,
        tenant: &TenantId,
        key: &GroupKey,
        name: &GroupName,
    ) -> Result<(), GroupError> {
        let lock = self.tenant_lock(tenant).await;
        let _guard = lock.lock().await;
        {
            let mut settings = self.settings.write().await;
            let tenant_settings = settings.entry(tenant.as_str().to_owned()).or_default();
            if tenant_settings.permission_groups.contains_key(key) {
                return Err(GroupError::AlreadyExists);
            }
            tenant_settings
                .permission_groups
                .insert(key.clone(), PermissionGroup::named(name));
        }
        self.persist().await?;
        tracing::info!(tenant_id = %tenant, group_key = %key, "created permission group");
        self.notify(tenant);
        Ok(())
    }

    /// Removes the group under `key`.
    ///
    /// # Errors
    /// [`GroupError::NotFound`] if absent, [`GroupError::ReferencedByOthers`]
    /// while any other group inherits it, or [`GroupError::Storage`].
    pub async fn delete_group(&self, tenant: &TenantId, key: &GroupKey) -> Result<(), GroupError> {
        let lock = self.tenant_lock(tenant).await;
        let _guard = lock.lock().await;
        {
            let mut settings = self.settings.write().await;
            let tenant_settings = settings
                .get_mut(tenant.as_str())
                .ok_or(GroupError::NotFound)?;
            if !tenant_settings.permission_groups.contains_key(key) {
                return Err(GroupError::NotFound);
            }
            let mut referrers: Vec<GroupKey> = tenant_settings
                .permission_groups
                .iter()
                .filter(|(other, group)| *other != key && group.inherits.contains(key))
                .map(|(other, _)| other.clone())
                .collect();
            if !referrers.is_empty() {
                referrers.sort();
                return Err(GroupError::ReferencedByOthers { referrers });
            }
            tenant_settings.permission_groups.remove(key);
        }
        self.persist().await?;
        tracing::info!(tenant_id = %tenant, group_key = %key, "deleted permission group");
        self.notify(tenant);
        Ok(())
    }

    /// Maps a platform role onto the group. Idempotent.
    ///
    /// # Errors
    /// [`GroupError::NotFound`] if the group is absent, or
    /// [`GroupError::Storage`].
    pub async fn add_role_to_group(
        &self,
        tenant: &TenantId,
        key: &GroupKey,
        role: &RoleId,
    ) -> Result<(), GroupError> {
        self.mutate_group(tenant, key, |group| {
            group.role_ids.insert(role.clone());
        })
        .await
    }

    /// Unmaps a platform role from the group. Idempotent.
    ///
    /// # Errors
    /// [`GroupError::NotFound`] if the group is absent, or
    /// [`GroupError::Storage`].
    pub async fn remove_role_from_group(
        &self,
        tenant: &TenantId,
        key: &GroupKey,
        role: &RoleId,
    ) -> Result<(), GroupError> {
        self.mutate_group(tenant, key, |group| {
            group.role_ids.remove(role);
        })
        .await
    }

    /// Grants a node to the group. Idempotent.
    ///
    /// # Errors
    /// [`GroupError::NotFound`] if the group is absent, or
    /// [`GroupError::Storage`].
    pub async fn grant_permission(
        &self,
        tenant: &TenantId,
        key: &GroupKey,
        node: &PermissionNode,
    ) -> Result<(), GroupError> {
        self.mutate_group(tenant, key, |group| {
            group.permissions.insert(node.clone());
        })
        .await
    }

    /// Revokes a node from the group. Idempotent.
    ///
    /// # Errors
    /// [`GroupError::NotFound`] if the group is absent, or
    /// [`GroupError::Storage`].
    pub async fn revoke_permission(
        &self,
        tenant: &TenantId,
        key: &GroupKey,
        node: &PermissionNode,
    ) -> Result<(), GroupError> {
        self.mutate_group(tenant, key, |group| {
            group.permissions.remove(node);
        })
        .await
    }

    /// Replaces the group's parent list wholesale.
    ///
    /// # Errors
    /// [`GroupError::NotFound`] if the group is absent,
    /// [`GroupError::SelfInheritance`] if `parents` contains `key`,
    /// [`GroupError::UnknownParent`] for a missing parent,
    /// [`GroupError::InheritanceCycle`] if the new edges would make `key`
    /// reachable from itself, or [`GroupError::Storage`].
    pub async fn set_inheritance(
        &self,
        tenant: &TenantId,
        key: &GroupKey,
        parents: Vec<GroupKey>,
    ) -> Result<(), GroupError> {
        let lock = self.tenant_lock(tenant).await;
        let _guard = lock.lock().await;
        {
            let mut settings = self.settings.write().await;
            let groups = &mut settings
                .get_mut(tenant.as_str())
                .ok_or(GroupError::NotFound)?
                .permission_groups;
            if !groups.contains_key(key) {
                return Err(GroupError::NotFound);
            }
            if parents.contains(key) {
                return Err(GroupError::SelfInheritance);
            }
            for parent in &parents {
                if !groups.contains_key(parent) {
                    return Err(GroupError::UnknownParent {
                        parent: parent.clone(),
                    });
                }
            }
            if let Some(via) = reaches_key(groups, key, &parents) {
                return Err(GroupError::InheritanceCycle { via });
            }
            if let Some(group) = groups.get_mut(key) {
                group.inherits = parents;
            }
        }
        self.persist().await?;
        tracing::info!(tenant_id = %tenant, group_key = %key, "replaced group inheritance");
        self.notify(tenant);
        Ok(())
    }

    /// Copies the current data file into the backup directory. See
    /// [`KeyedStore::backup`].
    ///
    /// # Errors
    /// [`GroupError::Storage`] if no data file exists or the copy fails.
    pub async fn backup(&self, name: Option<&str>) -> Result<PathBuf, GroupError> {
        Ok(self.store.backup(name).await?)
    }

    async fn mutate_group<F>(
        &self,
        tenant: &TenantId,
        key: &GroupKey,
        apply: F,
    ) -> Result<(), GroupError>
    where
        F: FnOnce(&mut PermissionGroup),
    {
        let lock = self.tenant_lock(tenant).await;
        let _guard = lock.lock().await;
        {
            let mut settings = self.settings.write().await;
            let group = settings
                .get_mut(tenant.as_str())
                .and_then(|tenant_settings| tenant_settings.permission_groups.get_mut(key))
                .ok_or(GroupError::NotFound)?;
            apply(group);
        }
        self.persist().await?;
        self.notify(tenant);
        Ok(())
    }

    async fn persist(&self) -> Result<(), GroupError> {
        let settings = self.settings.read().await;
        self.store.save(&settings).await?;
        Ok(())
    }

    async fn tenant_lock(&self, tenant: &TenantId) -> Arc<Mutex<()>> {
        let mut locks = self.tenant_locks.lock().await;
        locks
            .entry(tenant.as_str().to_owned())
            .or_default()
            .clone()
    }

    fn notify(&self, tenant: &TenantId) {
        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer.groups_changed(tenant);
            }
        }
    }
}

/// Walks the existing inheritance edges from each proposed parent. Returns
/// the first parent from which `key` is reachable. `key`'s own outgoing
/// edges are irrelevant here because the call replaces them.
fn reaches_key(
    groups: &HashMap<GroupKey, PermissionGroup>,
    key: &GroupKey,
    parents: &[GroupKey],
) -> Option<GroupKey> {
    for start in parents {
        let mut stack = vec![start.clone()];
        let mut seen: HashSet<GroupKey> = HashSet::new();
        while let Some(current) = stack.pop() {
            if &current == key {
                return Some(start.clone());
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(group) = groups.get(&current) {
                stack.extend(group.inherits.iter().cloned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tempfile::TempDir;

    use palisade_core::{GroupKey, GroupName, PermissionNode, RoleId, TenantId, TenantSettings};
    use palisade_store::KeyedStore;

    use super::{GroupChangeObserver, GroupRepository};
    use crate::errors::GroupError;

    fn tenant(raw: &str) -> TenantId {
        TenantId::try_from(String::from(raw)).unwrap()
    }

    fn key(raw: &str) -> GroupKey {
        GroupKey::try_from(String::from(raw)).unwrap()
    }

    fn name(raw: &str) -> GroupName {
        GroupName::try_from(String::from(raw)).unwrap()
    }

    fn role(raw: &str) -> RoleId {
        RoleId::try_from(String::from(raw)).unwrap()
    }

    fn node(raw: &str) -> PermissionNode {
        PermissionNode::try_from(String::from(raw)).unwrap()
    }

    async fn open_repository(dir: &TempDir) -> GroupRepository {
        let store: KeyedStore<TenantSettings> = KeyedStore::open(
            dir.path().join("settings.json"),
            dir.path().join("backups"),
            "settings",
        )
        .await
        .expect("store should open");
        GroupRepository::open(store).await.expect("repository opens")
    }

    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl GroupChangeObserver for CountingObserver {
        fn groups_changed(&self, _tenant: &TenantId) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn created_group_starts_empty() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let g = tenant("100");

        repository
            .create_group(&g, &key("mods"), &name("Moderators"))
            .await
            .expect("create should succeed");

        let group = repository.group(&g, &key("mods")).await.expect("group exists");
        assert_eq!(group.name, "Moderators");
        assert!(group.role_ids.is_empty());
        assert!(group.permissions.is_empty());
        assert!(group.inherits.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_keys() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let g = tenant("100");

        repository
            .create_group(&g, &key("mods"), &name("Moderators"))
            .await
            .expect("first create");
        let error = repository
            .create_group(&g, &key("mods"), &name("Other"))
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(error, GroupError::AlreadyExists));
    }

    #[tokio::test]
    async fn delete_rejects_missing_and_referenced_groups() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let g = tenant("100");

        let error = repository
            .delete_group(&g, &key("ghost"))
            .await
            .expect_err("missing group should fail");
        assert!(matches!(error, GroupError::NotFound));

        repository
            .create_group(&g, &key("mods"), &name("Mods"))
            .await
            .expect("create mods");
        repository
            .create_group(&g, &key("admins"), &name("Admins"))
            .await
            .expect("create admins");
        repository
            .set_inheritance(&g, &key("admins"), vec![key("mods")])
            .await
            .expect("admins inherit mods");

        let error = repository
            .delete_group(&g, &key("mods"))
            .await
            .expect_err("referenced group should not delete");
        match error {
            GroupError::ReferencedByOthers { referrers } => {
                assert_eq!(referrers, vec![key("admins")]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        repository
            .set_inheritance(&g, &key("admins"), Vec::new())
            .await
            .expect("clear inheritance");
        repository
            .delete_group(&g, &key("mods"))
            .await
            .expect("unreferenced group deletes");
    }

    #[tokio::test]
    async fn role_and_permission_edits_are_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let g = tenant("100");
        repository
            .create_group(&g, &key("mods"), &name("Mods"))
            .await
            .expect("create");

        repository
            .grant_permission(&g, &key("mods"), &node("ticket.close"))
            .await
            .expect("first grant");
        repository
            .grant_permission(&g, &key("mods"), &node("ticket.close"))
            .await
            .expect("second grant");
        repository
            .add_role_to_group(&g, &key("mods"), &role("R1"))
            .await
            .expect("first role add");
        repository
            .add_role_to_group(&g, &key("mods"), &role("R1"))
            .await
            .expect("second role add");

        let group = repository.group(&g, &key("mods")).await.expect("group");
        assert_eq!(group.permissions.len(), 1);
        assert_eq!(group.role_ids.len(), 1);

        repository
            .revoke_permission(&g, &key("mods"), &node("ticket.close"))
            .await
            .expect("revoke");
        repository
            .remove_role_from_group(&g, &key("mods"), &role("R1"))
            .await
            .expect("role remove");
        repository
            .remove_role_from_group(&g, &key("mods"), &role("R1"))
            .await
            .expect("role remove is idempotent");

        let group = repository.group(&g, &key("mods")).await.expect("group");
        assert!(group.permissions.is_empty());
        assert!(group.role_ids.is_empty());
    }

    #[tokio::test]
    async fn edits_on_missing_groups_fail_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let g = tenant("100");

        let error = repository
            .grant_permission(&g, &key("ghost"), &node("ticket.close"))
            .await
            .expect_err("grant on missing group");
        assert!(matches!(error, GroupError::NotFound));

        let error = repository
            .add_role_to_group(&g, &key("ghost"), &role("R1"))
            .await
            .expect_err("role add on missing group");
        assert!(matches!(error, GroupError::NotFound));
    }

    #[tokio::test]
    async fn inheritance_is_validated() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let g = tenant("100");
        repository
            .create_group(&g, &key("a"), &name("A"))
            .await
            .expect("create a");
        repository
            .create_group(&g, &key("b"), &name("B"))
            .await
            .expect("create b");

        let error = repository
            .set_inheritance(&g, &key("ghost"), vec![key("a")])
            .await
            .expect_err("missing group");
        assert!(matches!(error, GroupError::NotFound));

        let error = repository
            .set_inheritance(&g, &key("a"), vec![key("a")])
            .await
            .expect_err("self inheritance");
        assert!(matches!(error, GroupError::SelfInheritance));

        let error = repository
            .set_inheritance(&g, &key("a"), vec![key("ghost")])
            .await
            .expect_err("unknown parent");
        match error {
            GroupError::UnknownParent { parent } => assert_eq!(parent, key("ghost")),
            other => panic!("unexpected error: {other:?}"),
        }

        repository
            .set_inheritance(&g, &key("a"), vec![key("b")])
            .await
            .expect("a inherits b");
        let error = repository
            .set_inheritance(&g, &key("b"), vec![key("a")])
            .await
            .expect_err("two-group cycle is rejected");
        match error {
            GroupError::InheritanceCycle { via } => assert_eq!(via, key("a")),
            other => panic!("unexpected error: {other:?}"),
        }

        // Longer chain: c -> a -> b already, so b -> c also cycles.
        repository
            .create_group(&g, &key("c"), &name("C"))
            .await
            .expect("create c");
        repository
            .set_inheritance(&g, &key("c"), vec![key("a")])
            .await
            .expect("c inherits a");
        let error = repository
            .set_inheritance(&g, &key("b"), vec![key("c")])
            .await
            .expect_err("transitive cycle is rejected");
        assert!(matches!(error, GroupError::InheritanceCycle { .. }));
    }

    #[tokio::test]
    async fn mutations_survive_a_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let g = tenant("100");
        {
            let repository = open_repository(&dir).await;
            repository
                .create_group(&g, &key("mods"), &name("Mods"))
                .await
                .expect("create");
            repository
                .grant_permission(&g, &key("mods"), &node("ticket.close"))
                .await
                .expect("grant");
            repository
                .add_role_to_group(&g, &key("mods"), &role("R1"))
                .await
                .expect("role");
        }

        let reopened = open_repository(&dir).await;
        let group = reopened.group(&g, &key("mods")).await.expect("persisted group");
        assert!(group.permissions.contains(&node("ticket.close")));
        assert!(group.role_ids.contains(&role("R1")));
    }

    #[tokio::test]
    async fn observers_hear_every_persisted_mutation() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let observer = Arc::new(CountingObserver {
            calls: AtomicUsize::new(0),
        });
        repository.register_observer(observer.clone());
        let g = tenant("100");

        repository
            .create_group(&g, &key("mods"), &name("Mods"))
            .await
            .expect("create");
        repository
            .grant_permission(&g, &key("mods"), &node("ticket.close"))
            .await
            .expect("grant");
        let _ = repository
            .create_group(&g, &key("mods"), &name("Mods"))
            .await
            .expect_err("duplicate create fails");

        // Failed mutations do not notify.
        assert_eq!(observer.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let first = tenant("100");
        let second = tenant("200");

        repository
            .create_group(&first, &key("mods"), &name("Mods"))
            .await
            .expect("create");

        assert!(repository.group(&second, &key("mods")).await.is_none());
        assert!(repository.all_groups(&second).await.is_none());
        assert_eq!(
            repository.all_groups(&first).await.expect("groups").len(),
            1
        );
    }

    #[tokio::test]
    async fn backup_copies_the_data_file() {
        let dir = TempDir::new().expect("tempdir");
        let repository = open_repository(&dir).await;
        let g = tenant("100");
        repository
            .create_group(&g, &key("mods"), &name("Mods"))
            .await
            .expect("create");

        let path = repository
            .backup(Some("pre-change"))
            .await
            .expect("backup succeeds");
        assert!(path.ends_with("pre-change.json"));
    }
}
