#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

mod catalog;
mod node;

pub use catalog::NodeCatalog;
pub use node::{set_grants, PermissionNode};

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "palisade"
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("tenant id is invalid")]
    InvalidTenantId,
    #[error("member id is invalid")]
    InvalidMemberId,
    #[error("role id is invalid")]
    InvalidRoleId,
    #[error("group key is invalid")]
    InvalidGroupKey,
    #[error("permission node is invalid")]
    InvalidPermissionNode,
    #[error("group name is invalid")]
    InvalidGroupName,
}

/// Isolation scope under which all groups and settings are namespaced.
/// One chat community, as identified by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_platform_id(&value).map_err(|_| DomainError::InvalidTenantId)?;
        Ok(Self(value))
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl core::fmt::Display for TenantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberId(String);

impl MemberId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MemberId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_platform_id(&value).map_err(|_| DomainError::InvalidMemberId)?;
        Ok(Self(value))
    }
}

impl From<MemberId> for String {
    fn from(value: MemberId) -> Self {
        value.0
    }
}

impl core::fmt::Display for MemberId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleId(String);

impl RoleId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoleId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_platform_id(&value).map_err(|_| DomainError::InvalidRoleId)?;
        Ok(Self(value))
    }
}

impl From<RoleId> for String {
    fn from(value: RoleId) -> Self {
        value.0
    }
}

impl core::fmt::Display for RoleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized lookup key of a permission group, unique per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupKey(String);

impl GroupKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_group_key(&value)?;
        Ok(Self(value))
    }
}

impl From<GroupKey> for String {
    fn from(value: GroupKey) -> Self {
        value.0
    }
}

impl core::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupName(String);

impl GroupName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_group_name(&value)?;
        Ok(Self(value))
    }
}

/// Named bundle of role mappings, granted nodes, and parent groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGroup {
    pub name: String,
    #[serde(default)]
    pub role_ids: HashSet<RoleId>,
    #[serde(default)]
    pub permissions: HashSet<PermissionNode>,
    #[serde(default)]
    pub inherits: Vec<GroupKey>,
}

impl PermissionGroup {
    /// An empty group with no roles, grants, or parents.
    #[must_use]
    pub fn named(name: &GroupName) -> Self {
        Self {
            name: name.as_str().to_owned(),
            role_ids: HashSet::new(),
            permissions: HashSet::new(),
            inherits: Vec::new(),
        }
    }
}

/// Per-tenant settings record as persisted. Permission groups live inside it
/// next to unrelated tenant settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    #[serde(default)]
    pub permission_groups: HashMap<GroupKey, PermissionGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// Snapshot of a tenant member as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub role_ids: HashSet<RoleId>,
    /// Platform-level administrator flag. Bypasses all group logic.
    pub platform_admin: bool,
}

impl Member {
    #[must_use]
    pub fn new(id: MemberId, role_ids: HashSet<RoleId>) -> Self {
        Self {
            id,
            role_ids,
            platform_admin: false,
        }
    }
}

fn validate_platform_id(value: &str) -> Result<(), DomainError> {
    if !(1..=32).contains(&value.len()) {
        return Err(DomainError::InvalidTenantId);
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    {
        return Ok(());
    }
    Err(DomainError::InvalidTenantId)
}

fn validate_group_key(value: &str) -> Result<(), DomainError> {
    if !(1..=32).contains(&value.len()) {
        return Err(DomainError::InvalidGroupKey);
    }
    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
    {
        return Ok(());
    }
    Err(DomainError::InvalidGroupKey)
}

fn validate_group_name(value: &str) -> Result<(), DomainError> {
    if !(1..=64).contains(&value.len()) {
        return Err(DomainError::InvalidGroupName);
    }
    if value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Ok(());
    }
    Err(DomainError::InvalidGroupName)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{
        DomainError, GroupKey, GroupName, Member, MemberId, PermissionGroup, PermissionNode,
        RoleId, TenantId, TenantSettings,
    };

    #[test]
    fn project_name_is_stable() {
        assert_eq!(super::project_name(), "palisade");
    }

    #[test]
    fn platform_id_invariants_enforced() {
        let tenant = TenantId::try_from(String::from("81384788765712384")).unwrap();
        assert_eq!(tenant.as_str(), "81384788765712384");
        assert_eq!(
            TenantId::try_from(String::new()).unwrap_err(),
            DomainError::InvalidTenantId
        );
        assert_eq!(
            MemberId::try_from(String::from("has space")).unwrap_err(),
            DomainError::InvalidMemberId
        );
        assert_eq!(
            RoleId::try_from("x".repeat(33)).unwrap_err(),
            DomainError::InvalidRoleId
        );
    }

    #[test]
    fn group_key_rejects_uppercase_and_empty() {
        assert!(GroupKey::try_from(String::from("mods")).is_ok());
        assert!(GroupKey::try_from(String::from("tier-2_mods")).is_ok());
        assert_eq!(
            GroupKey::try_from(String::from("Mods")).unwrap_err(),
            DomainError::InvalidGroupKey
        );
        assert_eq!(
            GroupKey::try_from(String::new()).unwrap_err(),
            DomainError::InvalidGroupKey
        );
    }

    #[test]
    fn named_group_starts_empty() {
        let name = GroupName::try_from(String::from("Moderators")).unwrap();
        let group = PermissionGroup::named(&name);
        assert_eq!(group.name, "Moderators");
        assert!(group.role_ids.is_empty());
        assert!(group.permissions.is_empty());
        assert!(group.inherits.is_empty());
    }

    #[test]
    fn tenant_settings_round_trip_uses_wire_field_names() {
        let mut settings = TenantSettings::default();
        let key = GroupKey::try_from(String::from("mods")).unwrap();
        let mut group =
            PermissionGroup::named(&GroupName::try_from(String::from("Mods")).unwrap());
        group
            .role_ids
            .insert(RoleId::try_from(String::from("R1")).unwrap());
        group
            .permissions
            .insert(PermissionNode::try_from(String::from("ticket.close")).unwrap());
        settings.permission_groups.insert(key.clone(), group);

        let json = serde_json::to_value(&settings).unwrap();
        let groups = json.get("permissionGroups").unwrap();
        let mods = groups.get("mods").unwrap();
        assert_eq!(mods.get("name").unwrap(), "Mods");
        assert!(mods.get("roleIds").unwrap().is_array());
        assert!(mods.get("permissions").unwrap().is_array());
        assert!(mods.get("inherits").unwrap().is_array());

        let back: TenantSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn member_defaults_to_non_admin() {
        let member = Member::new(
            MemberId::try_from(String::from("42")).unwrap(),
            HashSet::new(),
        );
        assert!(!member.platform_admin);
    }
}
