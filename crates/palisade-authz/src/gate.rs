use std::sync::Arc;

use palisade_core::{Member, PermissionNode, TenantId};

use crate::resolver::AuthorizationResolver;

/// What a command needs: every listed node, or at least one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    All(Vec<PermissionNode>),
    Any(Vec<PermissionNode>),
}

/// The authorization point command handlers call. Thin all-or-any combinator
/// over [`AuthorizationResolver::check`].
pub struct CommandGate {
    resolver: Arc<AuthorizationResolver>,
}

impl CommandGate {
    #[must_use]
    pub fn new(resolver: Arc<AuthorizationResolver>) -> Self {
        Self { resolver }
    }

    /// True if the member satisfies the requirement. An empty `All` is
    /// vacuously satisfied; an empty `Any` never is.
    pub async fn authorize(
        &self,
        tenant: &TenantId,
        member: &Member,
        requirement: &Requirement,
    ) -> bool {
        match requirement {
            Requirement::All(nodes) => {
                for node in nodes {
                    if !self.resolver.check(tenant, member, node).await {
                        return false;
                    }
                }
                true
            }
            Requirement::Any(nodes) => {
                for node in nodes {
                    if self.resolver.check(tenant, member, node).await {
                        return true;
                    }
                }
                false
            }
        }
    }
}
