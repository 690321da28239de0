//! Loads a user's effective system-wide permissions for the cache.

use std::collections::BTreeSet;

use arbor_core::error::ArborResult;
use arbor_core::models::permission::Permission;
use arbor_core::repository::PermissionLoader;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::resolve;
use crate::error::DbError;

/// Sums the grants of every role without an organization scope.
#[derive(Clone)]
pub struct SqlPermissionLoader {
    pool: SqlitePool,
}

impl SqlPermissionLoader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl PermissionLoader for SqlPermissionLoader {
    async fn load_permissions(&self, user_id: Uuid) -> ArborResult<BTreeSet<Permission>> {
        let user = resolve::user_by_id(&self.pool, user_id).await?;
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT rp.permission FROM user_role ur \
             JOIN role r ON r.id = ur.role_id \
             JOIN role_permission rp ON rp.role_id = r.id \
             WHERE ur.user_id = ?1 AND r.root_id IS NULL",
        )
        .bind(user.id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        let permissions = names
            .iter()
            .map(|name| {
                name.parse::<Permission>()
                    .map_err(|e| DbError::corrupt("role_permission", e))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        debug!(user = %user_id, count = permissions.len(), "Loaded permissions");
        Ok(permissions)
    }
}
