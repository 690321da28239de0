//! Role domain model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permission::Permission;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    /// Unique within the role's scope.
    pub slug: String,
    /// Root of the organization tree this role is scoped to. `None` for
    /// system-wide roles.
    pub scope: Option<Uuid>,
    pub permissions: BTreeSet<Permission>,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn is_global(&self) -> bool {
        self.scope.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    /// Identifier of any organization in the tree the role is scoped to.
    pub scope: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateRole {
    pub name: Option<String>,
    #[serde(default)]
    pub add: Vec<Permission>,
    #[serde(default)]
    pub remove: Vec<Permission>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RoleScopeFilter {
    #[default]
    Any,
    Global,
    /// Roles scoped to the tree containing this organization.
    Tree(String),
}

/// List filter. Values are ORed within a field and fields are ANDed.
#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    /// Each entry matches the UUID, the name, or the slug.
    pub identifiers: Vec<String>,
    pub scope: RoleScopeFilter,
}
