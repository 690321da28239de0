//! Server configuration, read from `ARBOR__*` environment variables on
//! top of built-in defaults.

use arbor_authz::AuthzConfig;
use arbor_db::DbConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Defaults to an in-memory store on a single connection, where a list
    /// being read blocks every other operation until it is drained or
    /// dropped. Deployments serving concurrent callers set
    /// `ARBOR__DATABASE__URL` to a file and raise
    /// `ARBOR__DATABASE__MAX_CONNECTIONS`.
    pub database: DbConfig,
    pub authz: AuthzConfig,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database: DbConfig::default(),
            authz: AuthzConfig::default(),
            log_filter: "arbor=info".into(),
        }
    }
}

impl ServerConfig {
    /// e.g. `ARBOR__DATABASE__URL=sqlite://arbor.db`,
    /// `ARBOR__AUTHZ__CACHE_TTL_SECS=300`.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("ARBOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: ServerConfig = config.try_deserialize()?;
        Ok(cfg)
    }
}
