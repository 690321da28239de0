//! Per-user cache of effective system-wide permissions.
//!
//! Entries expire lazily: an entry is checked against the clock when it
//! is read, and a read past its expiry reloads it. Nothing sweeps the
//! map in the background. Concurrent reloads of the same user are not
//! coalesced; the last one to finish wins.

use std::collections::BTreeSet;

use arbor_core::models::permission::Permission;
use arbor_core::repository::PermissionLoader;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tracing::{debug, error};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    permissions: BTreeSet<Permission>,
    expires_at: DateTime<Utc>,
}

pub struct PermissionCache<L, C = SystemClock> {
    loader: L,
    clock: C,
    ttl: TimeDelta,
    entries: DashMap<Uuid, Entry>,
}

impl<L: PermissionLoader> PermissionCache<L> {
    pub fn new(loader: L, ttl: TimeDelta) -> Self {
        Self::with_clock(loader, SystemClock, ttl)
    }
}

impl<L: PermissionLoader, C: Clock> PermissionCache<L, C> {
    pub fn with_clock(loader: L, clock: C, ttl: TimeDelta) -> Self {
        Self {
            loader,
            clock,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Effective permissions of `user_id`. A user the loader does not
    /// know, or a failed load, yields the empty set. Failures are not
    /// cached.
    pub async fn get(&self, user_id: Uuid) -> BTreeSet<Permission> {
        let now = self.clock.now();
        let cached = self
            .entries
            .get(&user_id)
            .filter(|entry| now <= entry.expires_at)
            .map(|entry| entry.permissions.clone());
        if let Some(permissions) = cached {
            debug!(user = %user_id, "Permission cache hit");
            return permissions;
        }

        debug!(user = %user_id, "Permission cache miss");
        match self.loader.load_permissions(user_id).await {
            Ok(permissions) => {
                self.entries.insert(
                    user_id,
                    Entry {
                        permissions: permissions.clone(),
                        expires_at: now + self.ttl,
                    },
                );
                permissions
            }
            Err(e) if e.is_not_found() => {
                debug!(user = %user_id, "No permissions for unknown user");
                BTreeSet::new()
            }
            Err(e) => {
                error!(user = %user_id, error = %e, "Failed to load permissions");
                BTreeSet::new()
            }
        }
    }

    /// Drops the entry for `user_id` so the next read reloads it.
    pub fn invalidate(&self, user_id: Uuid) {
        if self.entries.remove(&user_id).is_some() {
            debug!(user = %user_id, "Permission cache entry invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        debug!("Permission cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
