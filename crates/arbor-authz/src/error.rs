//! Authorization error types.

use arbor_core::error::ArborError;
use arbor_core::models::permission::Permission;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("user {user} lacks permission {permission}")]
    Denied { user: Uuid, permission: Permission },

    #[error("cache lifetime of {0} seconds is out of range")]
    InvalidTtl(u64),
}

impl From<AuthzError> for ArborError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Denied { user, permission } => ArborError::Forbidden {
                user: user.to_string(),
                permission: permission.to_string(),
            },
            AuthzError::InvalidTtl(_) => ArborError::invalid("cache_ttl_secs", err.to_string()),
        }
    }
}
