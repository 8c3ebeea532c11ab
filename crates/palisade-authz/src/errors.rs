use palisade_core::GroupKey;
use palisade_store::StoreError;

/// Invariant violations raised by group mutations, plus storage failures.
///
/// Validation variants are expected to be caught at the command call site and
/// surfaced as a user-facing message; none of them crash the process.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("a group with this key already exists")]
    AlreadyExists,
    #[error("no group with this key exists")]
    NotFound,
    #[error("group is inherited by other groups and cannot be deleted")]
    ReferencedByOthers { referrers: Vec<GroupKey> },
    #[error("a group cannot inherit itself")]
    SelfInheritance,
    #[error("parent group {parent} does not exist")]
    UnknownParent { parent: GroupKey },
    #[error("inheriting {via} would create a cycle")]
    InheritanceCycle { via: GroupKey },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl GroupError {
    /// Stable machine-readable code for the command layer.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::ReferencedByOthers { .. } => "referenced_by_others",
            Self::SelfInheritance => "self_inheritance",
            Self::UnknownParent { .. } => "unknown_parent",
            Self::InheritanceCycle { .. } => "inheritance_cycle",
            Self::Storage(_) => "storage_failure",
        }
    }
}
