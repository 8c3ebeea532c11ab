use std::{
    collections::{HashMap, HashSet},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use palisade_core::{MemberId, PermissionNode, TenantId};

/// Cache entries are valid for this many seconds after computation.
pub const DEFAULT_CACHE_TTL_SECS: i64 = 5 * 60;

/// Injectable time source; tests drive a manual clock to exercise expiry.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Wall-clock seconds since the unix epoch.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_secs();
        i64::try_from(seconds).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone)]
struct CachedPermissionSet {
    permissions: HashSet<PermissionNode>,
    computed_at_unix: i64,
}

/// Time-bounded cache of resolved permission sets, keyed by tenant and
/// member. Staleness within the TTL is tolerated; anything sharper goes
/// through invalidation.
pub(crate) struct PermissionCache {
    entries: HashMap<(TenantId, MemberId), CachedPermissionSet>,
    ttl_secs: i64,
}

impl PermissionCache {
    pub(crate) fn new(ttl_secs: i64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_secs,
        }
    }

    pub(crate) fn get(
        &self,
        tenant: &TenantId,
        member: &MemberId,
        now_unix: i64,
    ) -> Option<HashSet<PermissionNode>> {
        let entry = self.entries.get(&(tenant.clone(), member.clone()))?;
        if now_unix - entry.computed_at_unix < self.ttl_secs {
            Some(entry.permissions.clone())
        } else {
            None
        }
    }

    pub(crate) fn insert(
        &mut self,
        tenant: &TenantId,
        member: &MemberId,
        permissions: HashSet<PermissionNode>,
        now_unix: i64,
    ) {
        self.entries.insert(
            (tenant.clone(), member.clone()),
            CachedPermissionSet {
                permissions,
                computed_at_unix: now_unix,
            },
        );
    }

    /// Drops one member's entry, or every entry of the tenant when no member
    /// is given.
    pub(crate) fn invalidate(&mut self, tenant: &TenantId, member: Option<&MemberId>) {
        match member {
            Some(member) => {
                self.entries.remove(&(tenant.clone(), member.clone()));
            }
            None => {
                self.entries.retain(|(entry_tenant, _), _| entry_tenant != tenant);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
