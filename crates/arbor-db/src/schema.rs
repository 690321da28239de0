//! Schema definitions and migration runner.
//!
//! UUIDs are stored as text next to an internal integer key. Enums
//! (visibility, permissions, event kinds) are stored by their canonical
//! names with CHECK constraints where the set is small.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS _migration (
    version INTEGER NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
";

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        name: "audit_event",
        sql: SCHEMA_V2,
    },
];

// -----------------------------------------------------------------------
// Schema v1 — organizations, users, roles and their edges
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Organizations (nested-set forest)
-- =======================================================================
CREATE TABLE organization (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    visibility TEXT NOT NULL CHECK (visibility IN ('PUBLIC', 'PRIVATE')),
    generation INTEGER NOT NULL DEFAULT 1,
    root_id INTEGER,
    lft INTEGER NOT NULL,
    rgt INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (lft < rgt)
);
CREATE INDEX idx_organization_tree ON organization (root_id, lft, rgt);
CREATE INDEX idx_organization_name ON organization (name);

-- =======================================================================
-- Users
-- =======================================================================
CREATE TABLE user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    generation INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_user_name ON user (name);

-- =======================================================================
-- Roles (system-wide when root_id is NULL, else scoped to one tree)
-- =======================================================================
CREATE TABLE role (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    root_id INTEGER REFERENCES organization (id),
    generation INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX idx_role_scope_slug ON role (IFNULL(root_id, 0), slug);
CREATE INDEX idx_role_name ON role (name);

CREATE TABLE role_permission (
    role_id INTEGER NOT NULL REFERENCES role (id),
    permission TEXT NOT NULL,
    PRIMARY KEY (role_id, permission)
);

-- =======================================================================
-- Edges
-- =======================================================================
CREATE TABLE organization_member (
    organization_id INTEGER NOT NULL REFERENCES organization (id),
    user_id INTEGER NOT NULL REFERENCES user (id),
    PRIMARY KEY (organization_id, user_id)
);
CREATE INDEX idx_organization_member_user ON organization_member (user_id);

CREATE TABLE user_role (
    user_id INTEGER NOT NULL REFERENCES user (id),
    role_id INTEGER NOT NULL REFERENCES role (id),
    PRIMARY KEY (user_id, role_id)
);
CREATE INDEX idx_user_role_role ON user_role (role_id);
";

// -----------------------------------------------------------------------
// Schema v2 — event log
// -----------------------------------------------------------------------

const SCHEMA_V2: &str = "\
CREATE TABLE audit_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    actor_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('CREATE', 'MODIFY', 'DELETE')),
    object_kind TEXT NOT NULL,
    object_id TEXT NOT NULL,
    before_image TEXT,
    after_image TEXT,
    recorded_at TEXT NOT NULL
);
CREATE INDEX idx_audit_event_actor ON audit_event (actor_id);
CREATE INDEX idx_audit_event_object ON audit_event (object_kind, object_id);
";

/// Applies all pending migrations in version order.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
    // Ensure migration tracking table exists (idempotent).
    sqlx::raw_sql(MIGRATION_TABLE_DDL).execute(pool).await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM _migration")
            .fetch_one(pool)
            .await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );

            let mut tx = pool.begin().await?;
            sqlx::raw_sql(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    DbError::Migration(format!(
                        "Migration v{} '{}' failed: {}",
                        migration.version, migration.name, e,
                    ))
                })?;

            sqlx::query("INSERT INTO _migration (version, name) VALUES (?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    DbError::Migration(format!(
                        "Failed to record migration v{}: {}",
                        migration.version, e,
                    ))
                })?;
            tx.commit().await?;

            info!(
                version = migration.version,
                "Migration applied successfully"
            );
        }
    }

    Ok(())
}

/// Version of the newest migration this build knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_are_nonempty() {
        assert!(MIGRATIONS.iter().all(|m| !m.sql.trim().is_empty()));
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[0].version < window[1].version,
                "Migrations must be in ascending version order"
            );
        }
    }

    #[test]
    fn latest_version_matches_last_migration() {
        assert_eq!(latest_version(), 2);
    }
}
