use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use palisade_core::{
    set_grants, GroupKey, Member, MemberId, PermissionGroup, PermissionNode, TenantId,
};

use crate::{
    cache::{Clock, PermissionCache, SystemClock, DEFAULT_CACHE_TTL_SECS},
    repository::{GroupChangeObserver, GroupRepository},
};

/// Answers permission checks for tenant members from a TTL cache, resolving
/// role-to-group membership and group inheritance on a miss.
///
/// Construction registers a cache invalidator with the repository, so every
/// persisted group mutation clears the tenant's cached sets without the
/// mutating caller having to remember anything.
pub struct AuthorizationResolver {
    repository: Arc<GroupRepository>,
    cache: Arc<Mutex<PermissionCache>>,
    clock: Arc<dyn Clock>,
}

struct CacheInvalidator {
    cache: Arc<Mutex<PermissionCache>>,
}

impl GroupChangeObserver for CacheInvalidator {
    fn groups_changed(&self, tenant: &TenantId) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.invalidate(tenant, None);
        }
    }
}

impl AuthorizationResolver {
    #[must_use]
    pub fn new(repository: Arc<GroupRepository>) -> Self {
        Self::with_clock(repository, Arc::new(SystemClock), DEFAULT_CACHE_TTL_SECS)
    }

    #[must_use]
    pub fn with_clock(
        repository: Arc<GroupRepository>,
        clock: Arc<dyn Clock>,
        ttl_secs: i64,
    ) -> Self {
        let cache = Arc::new(Mutex::new(PermissionCache::new(ttl_secs)));
        repository.register_observer(Arc::new(CacheInvalidator {
            cache: cache.clone(),
        }));
        Self {
            repository,
            cache,
            clock,
        }
    }

    /// True if `member` may exercise `node` within `tenant`.
    ///
    /// A platform administrator passes unconditionally. Everyone else passes
    /// iff their effective set contains the global wildcard, the exact node,
    /// or the node's module wildcard.
    pub async fn check(&self, tenant: &TenantId, member: &Member, node: &PermissionNode) -> bool {
        if member.platform_admin {
            return true;
        }
        let permissions = self.resolve_permissions(tenant, member).await;
        set_grants(&permissions, node)
    }

    /// Drops one member's cached set, or the whole tenant's when `member` is
    /// `None`. Repository mutations already do this automatically; the manual
    /// form exists for administrative use.
    pub fn invalidate(&self, tenant: &TenantId, member: Option<&MemberId>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.invalidate(tenant, member);
        }
    }

    async fn resolve_permissions(
        &self,
        tenant: &TenantId,
        member: &Member,
    ) -> HashSet<PermissionNode> {
        let now_unix = self.clock.now_unix();
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(tenant, &member.id, now_unix) {
                return hit;
            }
        }

        // A tenant with no configured groups resolves to nothing, and that
        // absence is not cached: configuration appearing a moment later must
        // not wait out the TTL.
        let Some(groups) = self.repository.all_groups(tenant).await else {
            return HashSet::new();
        };
        if groups.is_empty() {
            return HashSet::new();
        }

        let mut permissions = HashSet::new();
        let mut visited = HashSet::new();
        for (key, group) in &groups {
            if group.role_ids.is_disjoint(&member.role_ids) {
                continue;
            }
            collect_inherited(tenant, &groups, key, &mut visited, &mut permissions);
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(tenant, &member.id, permissions.clone(), now_unix);
        }
        permissions
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.lock().map_or(0, |cache| cache.len())
    }
}

/// Depth-first union of a group's grants and its parents'. The visited set
/// spans one resolution call; a revisited key is warned about once and not
/// descended into, so resolution terminates even on inheritance data that
/// predates write-time cycle rejection.
fn collect_inherited(
    tenant: &TenantId,
    groups: &HashMap<GroupKey, PermissionGroup>,
    key: &GroupKey,
    visited: &mut HashSet<GroupKey>,
    permissions: &mut HashSet<PermissionNode>,
) {
    if !visited.insert(key.clone()) {
        tracing::warn!(
            tenant_id = %tenant,
            group_key = %key,
            "group revisited during permission resolution, not descending again"
        );
        return;
    }
    let Some(group) = groups.get(key) else {
        tracing::warn!(
            tenant_id = %tenant,
            group_key = %key,
            "group inherits a parent that no longer exists, skipping"
        );
        return;
    };
    permissions.extend(group.permissions.iter().cloned());
    for parent in &group.inherits {
        collect_inherited(tenant, groups, parent, visited, permissions);
    }
}
