//! Organization domain model.
//!
//! Organizations form a forest. Each tree is stored as a nested set:
//! every node carries an interval `[left, right]` and a reference to the
//! root of its tree. A node is an ancestor of another iff its interval
//! strictly contains the other's.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArborError;
use crate::nested_set::Interval;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Private => "PRIVATE",
        }
    }

    /// A child may not be more visible than its parent.
    pub fn allows_child(self, child: Visibility) -> bool {
        !(self == Visibility::Private && child == Visibility::Public)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLIC" => Ok(Visibility::Public),
            "PRIVATE" => Ok(Visibility::Private),
            other => Err(ArborError::invalid(
                "visibility",
                format!("unknown visibility '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// URL-safe, globally unique. Children are namespaced by their root's slug.
    pub slug: String,
    pub visibility: Visibility,
    /// Optimistic-concurrency token. For a root it also guards the layout
    /// of the whole tree.
    pub generation: i64,
    /// The root of the tree this organization belongs to (itself for roots).
    pub root_id: Uuid,
    pub left: i64,
    pub right: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn is_root(&self) -> bool {
        self.root_id == self.id
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.left, self.right)
    }
}

/// Fields required to create a new organization.
///
/// Without a `parent` the organization becomes the root of a new tree and
/// the acting user becomes its first member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    /// Identifier (UUID, slug, or name) of the parent organization.
    pub parent: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Fields that can be updated on an existing organization.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub visibility: Option<Visibility>,
}

/// List filter. Values are ORed within a field and fields are ANDed.
#[derive(Debug, Clone, Default)]
pub struct OrganizationFilter {
    /// Each entry matches the UUID, the name, or the slug.
    pub identifiers: Vec<String>,
    pub visibility: Vec<Visibility>,
    /// Restrict to the tree rooted at any of these organizations.
    pub roots: Vec<String>,
}
