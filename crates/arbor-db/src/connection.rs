//! SQLite connection management.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use crate::error::DbError;

/// Configuration for connecting to the datastore.
///
/// The default is an in-memory database, which lives inside one pooled
/// connection. Every operation shares that connection, so a list stream
/// that is still being read holds it and any other operation waits up to
/// the pool's acquire timeout (30 seconds). Point `url` at a file and
/// raise `max_connections` to serve concurrent callers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// SQLite URL (e.g., `sqlite://arbor.db` or `sqlite::memory:`).
    pub url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// How long a writer waits for another connection's write lock before
    /// the operation fails with a concurrent-update error.
    pub busy_timeout_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            busy_timeout_ms: 5_000,
        }
    }
}

impl DbConfig {
    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Manages a pool of connections to the datastore.
#[derive(Clone)]
pub struct DbManager {
    pool: SqlitePool,
}

impl DbManager {
    /// Opens the pool with foreign keys enforced.
    ///
    /// An in-memory database lives inside a single connection, so the pool
    /// is pinned to one connection that is never recycled.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            max_connections = config.max_connections,
            "Connecting to SQLite"
        );

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let mut max_connections = config.max_connections.max(1);
        let mut pool_options = SqlitePoolOptions::new();
        if config.is_in_memory() {
            if max_connections > 1 {
                warn!(
                    requested = max_connections,
                    "In-memory database supports a single connection"
                );
            }
            max_connections = 1;
            info!("In-memory database: operations share one connection");
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!("Successfully connected to SQLite");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
