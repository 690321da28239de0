//! Integration tests for schema initialization using in-memory SQLite.

use arbor_db::{DbConfig, DbManager};

#[tokio::test]
async fn schema_migration_applies_successfully() {
    let manager = DbManager::connect(&DbConfig::default()).await.unwrap();
    arbor_db::run_migrations(manager.pool()).await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(manager.pool())
            .await
            .unwrap();

    for table in [
        "organization",
        "user",
        "role",
        "role_permission",
        "organization_member",
        "user_role",
        "audit_event",
    ] {
        assert!(
            tables.iter().any(|t| t == table),
            "missing {table} table"
        );
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let manager = DbManager::connect(&DbConfig::default()).await.unwrap();
    arbor_db::run_migrations(manager.pool()).await.unwrap();
    arbor_db::run_migrations(manager.pool()).await.unwrap();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migration")
        .fetch_one(manager.pool())
        .await
        .unwrap();
    assert_eq!(applied, arbor_db::latest_version());
}

#[tokio::test]
async fn role_slug_is_unique_per_scope() {
    let manager = DbManager::connect(&DbConfig::default()).await.unwrap();
    arbor_db::run_migrations(manager.pool()).await.unwrap();
    let pool = manager.pool();

    let insert = "INSERT INTO role (uuid, name, slug, root_id, created_at, updated_at) \
                  VALUES (?1, 'admins', 'admins', NULL, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')";
    sqlx::query(insert)
        .bind(uuid::Uuid::new_v4().to_string())
        .execute(pool)
        .await
        .unwrap();

    // Two global roles may not share a slug even though root_id is NULL.
    let second = sqlx::query(insert)
        .bind(uuid::Uuid::new_v4().to_string())
        .execute(pool)
        .await;
    assert!(second.is_err(), "duplicate global slug should be rejected");
}
