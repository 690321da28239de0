//! User domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Derived from `name`; globally unique.
    pub slug: String,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// List filter. Values are ORed within a field and fields are ANDed.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Each entry matches the UUID, the name, the slug, or the email.
    pub identifiers: Vec<String>,
}
