//! Arbor Server — application entry point.

mod config;

use anyhow::Context;
use arbor_authz::{Authorizer, IamService, PermissionCache};
use arbor_db::DbManager;
use arbor_db::repository::{
    SqlEventLog, SqlOrganizationRepository, SqlPermissionLoader, SqlRoleRepository,
    SqlUserRepository,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ServerConfig::load().context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_filter))
        .context("parsing log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();

    info!("Starting Arbor server...");

    let db = DbManager::connect(&cfg.database)
        .await
        .context("connecting to database")?;
    arbor_db::run_migrations(db.pool())
        .await
        .context("running migrations")?;

    let pool = db.pool().clone();
    let ttl = cfg.authz.cache_ttl()?;
    let cache = PermissionCache::new(SqlPermissionLoader::new(pool.clone()), ttl);
    let _service = IamService::new(
        SqlOrganizationRepository::new(pool.clone()),
        SqlUserRepository::new(pool.clone()),
        SqlRoleRepository::new(pool.clone()),
        SqlEventLog::new(pool),
        Authorizer::new(cache),
    );

    info!(
        schema_version = arbor_db::latest_version(),
        cache_ttl_secs = cfg.authz.cache_ttl_secs,
        "Arbor server ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    db.pool().close().await;
    info!("Arbor server stopped.");
    Ok(())
}
