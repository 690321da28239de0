//! Database-specific error types and conversions.

use arbor_core::error::ArborError;
use tracing::{error, warn};

/// SQLite result codes for a write lock that could not be taken:
/// `SQLITE_BUSY`, `SQLITE_LOCKED` and `SQLITE_BUSY_SNAPSHOT`.
const CONTENDED_CODES: [&str; 3] = ["5", "6", "517"];

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    /// A stored value could not be mapped back onto the domain model.
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        entity: &'static str,
        message: String,
    },
}

impl DbError {
    pub(crate) fn corrupt(entity: &'static str, message: impl ToString) -> Self {
        Self::Corrupt {
            entity,
            message: message.to_string(),
        }
    }
}

impl From<DbError> for ArborError {
    fn from(err: DbError) -> Self {
        // Raw datastore text stays in the logs.
        error!(error = %err, "database error");
        ArborError::Internal("database error".into())
    }
}

/// Whether `err` means another connection holds the write lock.
pub(crate) fn is_contended(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| CONTENDED_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

/// Maps a lost write lock onto `ConcurrentUpdate` for `entity`/`id`.
/// Anything else goes through the generic conversion.
pub(crate) fn map_contention(err: sqlx::Error, entity: &str, id: &str) -> ArborError {
    if is_contended(&err) {
        warn!(entity, id, error = %err, "Write lock contended");
        return ArborError::concurrent(entity, id);
    }
    DbError::from(err).into()
}

/// Maps a unique-constraint failure onto `Duplicate`, naming whichever of
/// `fields` the violated constraint covers (the first one when the
/// constraint is an expression index). Anything else goes through the
/// generic conversion.
pub(crate) fn map_conflict(err: sqlx::Error, entity: &str, fields: &[(&str, &str)]) -> ArborError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = db.message();
            let hit = fields
                .iter()
                .find(|(field, _)| message.contains(&format!(".{field}")))
                .or_else(|| fields.first());
            if let Some((field, value)) = hit {
                return ArborError::Duplicate {
                    entity: entity.to_owned(),
                    field: (*field).to_owned(),
                    value: (*value).to_owned(),
                };
            }
        }
    }
    DbError::from(err).into()
}
