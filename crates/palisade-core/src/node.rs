use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::DomainError;

const MAX_NODE_SEGMENTS: usize = 8;

/// Dot-separated capability string with a strict character allowlist.
///
/// Three shapes are valid: an exact node (`ticket.close`), a module wildcard
/// (`ticket.*`), and the global wildcard (`*`). Only the final segment may be
/// a `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionNode(String);

impl PermissionNode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the bare `*` node that grants everything.
    #[must_use]
    pub fn is_global_wildcard(&self) -> bool {
        self.0 == "*"
    }

    /// True for a node whose final segment is `*` (including the global one).
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.is_global_wildcard() || self.0.ends_with(".*")
    }

    /// The `<module>.*` node covering this one, derived from the segment
    /// before the first dot. `None` for wildcard nodes, which have no
    /// broader module form of their own.
    #[must_use]
    pub fn module_wildcard(&self) -> Option<Self> {
        if self.is_wildcard() {
            return None;
        }
        let module = self.0.split('.').next()?;
        Some(Self(format!("{module}.*")))
    }
}

impl TryFrom<String> for PermissionNode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_node(&value)?;
        Ok(Self(value))
    }
}

impl From<PermissionNode> for String {
    fn from(value: PermissionNode) -> Self {
        value.0
    }
}

impl core::fmt::Display for PermissionNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// True if `granted` covers `node`: the global wildcard, the exact node, or
/// the node's module wildcard.
#[must_use]
pub fn set_grants(granted: &HashSet<PermissionNode>, node: &PermissionNode) -> bool {
    if granted.iter().any(PermissionNode::is_global_wildcard) {
        return true;
    }
    if granted.contains(node) {
        return true;
    }
    node.module_wildcard()
        .is_some_and(|wildcard| granted.contains(&wildcard))
}

fn validate_node(value: &str) -> Result<(), DomainError> {
    if value == "*" {
        return Ok(());
    }
    let segments: Vec<&str> = value.split('.').collect();
    if segments.is_empty() || segments.len() > MAX_NODE_SEGMENTS {
        return Err(DomainError::InvalidPermissionNode);
    }
    for (index, segment) in segments.iter().enumerate() {
        let last = index == segments.len() - 1;
        if last && *segment == "*" {
            // Module wildcard needs at least one named segment before it.
            if segments.len() == 1 {
                return Err(DomainError::InvalidPermissionNode);
            }
            continue;
        }
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(DomainError::InvalidPermissionNode);
        }
    }
    Ok(())
}
