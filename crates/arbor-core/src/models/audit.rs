//! Audit event domain model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArborError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    Organization,
    User,
    Role,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Modify => "MODIFY",
            EventKind::Delete => "DELETE",
        }
    }
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Organization => "ORGANIZATION",
            ObjectKind::User => "USER",
            ObjectKind::Role => "ROLE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(EventKind::Create),
            "MODIFY" => Ok(EventKind::Modify),
            "DELETE" => Ok(EventKind::Delete),
            other => Err(ArborError::invalid(
                "event kind",
                format!("unknown event kind '{other}'"),
            )),
        }
    }
}

impl FromStr for ObjectKind {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORGANIZATION" => Ok(ObjectKind::Organization),
            "USER" => Ok(ObjectKind::User),
            "ROLE" => Ok(ObjectKind::Role),
            other => Err(ArborError::invalid(
                "object kind",
                format!("unknown object kind '{other}'"),
            )),
        }
    }
}

/// One committed mutation, with before/after snapshots of the entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub kind: EventKind,
    pub object_kind: ObjectKind,
    pub object_id: Uuid,
    /// Absent for creates.
    pub before: Option<serde_json::Value>,
    /// Absent for deletes.
    pub after: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuditEvent {
    pub actor_id: Uuid,
    pub kind: EventKind,
    pub object_kind: ObjectKind,
    pub object_id: Uuid,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl CreateAuditEvent {
    pub fn created<T: Serialize>(
        actor_id: Uuid,
        object_kind: ObjectKind,
        object_id: Uuid,
        after: &T,
    ) -> Self {
        Self {
            actor_id,
            kind: EventKind::Create,
            object_kind,
            object_id,
            before: None,
            after: serde_json::to_value(after).ok(),
        }
    }

    pub fn modified<T: Serialize>(
        actor_id: Uuid,
        object_kind: ObjectKind,
        object_id: Uuid,
        before: &T,
        after: &T,
    ) -> Self {
        Self {
            actor_id,
            kind: EventKind::Modify,
            object_kind,
            object_id,
            before: serde_json::to_value(before).ok(),
            after: serde_json::to_value(after).ok(),
        }
    }

    pub fn deleted<T: Serialize>(
        actor_id: Uuid,
        object_kind: ObjectKind,
        object_id: Uuid,
        before: &T,
    ) -> Self {
        Self {
            actor_id,
            kind: EventKind::Delete,
            object_kind,
            object_id,
            before: serde_json::to_value(before).ok(),
            after: None,
        }
    }
}

/// Query filters for audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditEventFilter {
    pub actor_id: Option<Uuid>,
    pub object_kind: Option<ObjectKind>,
    pub object_id: Option<Uuid>,
}
