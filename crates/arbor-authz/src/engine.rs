//! Permission checks.

use std::collections::BTreeSet;

use arbor_core::models::permission::Permission;
use arbor_core::models::session::Session;
use arbor_core::repository::PermissionLoader;
use tracing::warn;

use crate::cache::PermissionCache;
use crate::clock::{Clock, SystemClock};
use crate::error::AuthzError;

/// One of the four contiguous ranges of permissions that share an `ANY`
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCategory {
    Read,
    Create,
    Modify,
    Delete,
}

impl PermissionCategory {
    pub const ALL: [PermissionCategory; 4] = [
        PermissionCategory::Read,
        PermissionCategory::Create,
        PermissionCategory::Modify,
        PermissionCategory::Delete,
    ];

    /// Half-open range `[start, end)` of the category. `start` is the
    /// category's `ANY` value.
    pub fn bounds(self) -> (Permission, Permission) {
        match self {
            Self::Read => (Permission::ReadAny, Permission::CreateAny),
            Self::Create => (Permission::CreateAny, Permission::ModifyAny),
            Self::Modify => (Permission::ModifyAny, Permission::DeleteAny),
            Self::Delete => (Permission::DeleteAny, Permission::End),
        }
    }

    pub fn any(self) -> Permission {
        self.bounds().0
    }

    /// The category `permission` falls into. `SUPER` and the end sentinel
    /// belong to none.
    pub fn of(permission: Permission) -> Option<Self> {
        Self::ALL.into_iter().find(|category| {
            let (start, end) = category.bounds();
            start.code() <= permission.code() && permission.code() < end.code()
        })
    }
}

/// Whether `granted` satisfies `requested`: `SUPER`, the exact value, or
/// the `ANY` value of the requested category.
pub fn check(granted: &BTreeSet<Permission>, requested: Permission) -> bool {
    granted.contains(&Permission::Super)
        || granted.contains(&requested)
        || PermissionCategory::of(requested)
            .is_some_and(|category| granted.contains(&category.any()))
}

/// Answers permission questions for a session through the cache.
pub struct Authorizer<L, C = SystemClock> {
    cache: PermissionCache<L, C>,
}

impl<L: PermissionLoader, C: Clock> Authorizer<L, C> {
    pub fn new(cache: PermissionCache<L, C>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &PermissionCache<L, C> {
        &self.cache
    }

    /// Never fails: a user without permissions is simply denied.
    pub async fn check(&self, session: &Session, requested: Permission) -> bool {
        let granted = self.cache.get(session.user_id).await;
        check(&granted, requested)
    }

    pub async fn require(&self, session: &Session, requested: Permission) -> Result<(), AuthzError> {
        if self.check(session, requested).await {
            return Ok(());
        }
        warn!(
            user = %session.user_id,
            permission = %requested,
            "Permission denied"
        );
        Err(AuthzError::Denied {
            user: session.user_id,
            permission: requested,
        })
    }
}
