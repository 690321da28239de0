//! DB-side row structs and their conversion onto the domain models.
//!
//! Every row keeps the internal integer key alongside the public UUID so
//! that writes inside a transaction never have to re-resolve identifiers.

use std::collections::BTreeSet;

use arbor_core::models::audit::{AuditEvent, EventKind, ObjectKind};
use arbor_core::models::organization::{Organization, Visibility};
use arbor_core::models::permission::Permission;
use arbor_core::models::role::Role;
use arbor_core::models::user::User;
use arbor_core::nested_set::Interval;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DbError;

pub(crate) const ORGANIZATION_SELECT: &str = "\
SELECT o.id, o.uuid, o.name, o.slug, o.visibility, o.generation, \
o.root_id, r.uuid AS root_uuid, r.slug AS root_slug, o.lft, o.rgt, \
o.created_at, o.updated_at \
FROM organization o JOIN organization r ON r.id = o.root_id";

pub(crate) const USER_SELECT: &str = "\
SELECT u.id, u.uuid, u.email, u.name, u.slug, u.generation, \
u.created_at, u.updated_at FROM user u";

pub(crate) const ROLE_SELECT: &str = "\
SELECT ro.id, ro.uuid, ro.name, ro.slug, ro.root_id, sc.uuid AS scope_uuid, \
sc.slug AS scope_slug, ro.generation, ro.created_at, ro.updated_at, \
(SELECT group_concat(rp.permission, ',') FROM role_permission rp \
WHERE rp.role_id = ro.id) AS permissions \
FROM role ro LEFT JOIN organization sc ON sc.id = ro.root_id";

/// Conversion from a fetched row onto its domain model.
pub(crate) trait IntoDomain {
    type Output;

    fn into_domain(self) -> Result<Self::Output, DbError>;
}

fn parse_uuid(entity: &'static str, raw: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(raw).map_err(|e| DbError::corrupt(entity, format!("invalid UUID: {e}")))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct OrganizationRow {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub slug: String,
    pub visibility: String,
    pub generation: i64,
    pub root_id: i64,
    pub root_uuid: String,
    pub root_slug: String,
    pub lft: i64,
    pub rgt: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrganizationRow {
    pub fn interval(&self) -> Interval {
        Interval::new(self.lft, self.rgt)
    }

    pub fn is_root(&self) -> bool {
        self.root_id == self.id
    }
}

impl IntoDomain for OrganizationRow {
    type Output = Organization;

    fn into_domain(self) -> Result<Organization, DbError> {
        Ok(Organization {
            id: parse_uuid("organization", &self.uuid)?,
            root_id: parse_uuid("organization", &self.root_uuid)?,
            visibility: self
                .visibility
                .parse::<Visibility>()
                .map_err(|e| DbError::corrupt("organization", e))?,
            name: self.name,
            slug: self.slug,
            generation: self.generation,
            left: self.lft,
            right: self.rgt,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub uuid: String,
    pub email: String,
    pub name: String,
    pub slug: String,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntoDomain for UserRow {
    type Output = User;

    fn into_domain(self) -> Result<User, DbError> {
        Ok(User {
            id: parse_uuid("user", &self.uuid)?,
            email: self.email,
            name: self.name,
            slug: self.slug,
            generation: self.generation,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct RoleRow {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub slug: String,
    pub root_id: Option<i64>,
    pub scope_uuid: Option<String>,
    pub scope_slug: Option<String>,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub permissions: Option<String>,
}

pub(crate) fn parse_permissions(raw: Option<&str>) -> Result<BTreeSet<Permission>, DbError> {
    raw.unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Permission>().map_err(|e| DbError::corrupt("role", e)))
        .collect()
}

impl IntoDomain for RoleRow {
    type Output = Role;

    fn into_domain(self) -> Result<Role, DbError> {
        Ok(Role {
            id: parse_uuid("role", &self.uuid)?,
            scope: self
                .scope_uuid
                .as_deref()
                .map(|s| parse_uuid("role", s))
                .transpose()?,
            permissions: parse_permissions(self.permissions.as_deref())?,
            name: self.name,
            slug: self.slug,
            generation: self.generation,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AuditEventRow {
    pub uuid: String,
    pub actor_id: String,
    pub kind: String,
    pub object_kind: String,
    pub object_id: String,
    pub before_image: Option<String>,
    pub after_image: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

fn parse_image(raw: Option<String>) -> Result<Option<serde_json::Value>, DbError> {
    raw.map(|s| {
        serde_json::from_str::<serde_json::Value>(&s)
            .map_err(|e| DbError::corrupt("audit_event", e))
    })
    .transpose()
}

impl IntoDomain for AuditEventRow {
    type Output = AuditEvent;

    fn into_domain(self) -> Result<AuditEvent, DbError> {
        Ok(AuditEvent {
            id: parse_uuid("audit_event", &self.uuid)?,
            actor_id: parse_uuid("audit_event", &self.actor_id)?,
            kind: self
                .kind
                .parse::<EventKind>()
                .map_err(|e| DbError::corrupt("audit_event", e))?,
            object_kind: self
                .object_kind
                .parse::<ObjectKind>()
                .map_err(|e| DbError::corrupt("audit_event", e))?,
            object_id: parse_uuid("audit_event", &self.object_id)?,
            before: parse_image(self.before_image)?,
            after: parse_image(self.after_image)?,
            recorded_at: self.recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_parse_from_group_concat() {
        let set = parse_permissions(Some("READ_ANY,DELETE_USER")).unwrap();
        assert_eq!(set, [Permission::ReadAny, Permission::DeleteUser].into());
        assert!(parse_permissions(None).unwrap().is_empty());
    }

    #[test]
    fn unknown_permission_is_corrupt() {
        assert!(matches!(
            parse_permissions(Some("READ_ANY,FLY")),
            Err(DbError::Corrupt { entity: "role", .. })
        ));
    }
}
