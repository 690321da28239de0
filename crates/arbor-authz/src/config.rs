//! Authorization configuration.

use chrono::TimeDelta;
use serde::Deserialize;

use crate::error::AuthzError;

/// Configuration for the authorization layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Lifetime of a cached permission set in seconds (default: 900 = 15 minutes).
    pub cache_ttl_secs: u64,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 900,
        }
    }
}

impl AuthzConfig {
    pub fn cache_ttl(&self) -> Result<TimeDelta, AuthzError> {
        i64::try_from(self.cache_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or(AuthzError::InvalidTtl(self.cache_ttl_secs))
    }
}
