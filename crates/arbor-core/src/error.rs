//! Error taxonomy for the Arbor IAM engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArborError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{entity} with {field} '{value}' already exists")]
    Duplicate {
        entity: String,
        field: String,
        value: String,
    },

    /// Optimistic-concurrency check failed. The caller may re-read and retry.
    #[error("{entity} {id} was modified concurrently; re-read and retry")]
    ConcurrentUpdate { entity: String, id: String },

    #[error("organization '{child}' cannot be public under private parent '{parent}'")]
    InvalidVisibility { parent: String, child: String },

    #[error("user {user} lacks permission {permission}")]
    Forbidden { user: String, permission: String },

    #[error("invalid {field}: {message}")]
    InvalidArgument { field: String, message: String },

    #[error(
        "deleting this user would orphan organization '{organization}'; \
         transfer root membership or delete the organization first"
    )]
    OrphanedOrganization { organization: String },

    /// Unexpected failure. Never carries query text.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ArborError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn concurrent(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ConcurrentUpdate {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Only a lost optimistic-concurrency race is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentUpdate { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type ArborResult<T> = Result<T, ArborError>;
