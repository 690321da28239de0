//! Many-to-many edge changes (organization members, user roles).

use serde::{Deserialize, Serialize};

/// Requested edge changes, by identifier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MembershipChange {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl MembershipChange {
    pub fn add<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            add: items.into_iter().map(Into::into).collect(),
            remove: Vec::new(),
        }
    }

    pub fn remove<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            add: Vec::new(),
            remove: items.into_iter().map(Into::into).collect(),
        }
    }
}

/// Rows actually affected, not rows requested. Re-adding an existing edge
/// counts as zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MembershipCounts {
    pub added: u64,
    pub removed: u64,
}
