//! SQLite implementation of [`RoleRepository`].

use std::collections::BTreeSet;

use arbor_core::error::{ArborError, ArborResult};
use arbor_core::models::audit::{CreateAuditEvent, ObjectKind};
use arbor_core::models::permission::Permission;
use arbor_core::models::role::{CreateRole, Role, RoleFilter, RoleScopeFilter, UpdateRole};
use arbor_core::reconcile::PermissionDelta;
use arbor_core::repository::{EventLog, ListStream, Pagination, RoleRepository};
use arbor_core::slug::{namespaced, slugify};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use super::rows::{IntoDomain, ROLE_SELECT, RoleRow};
use super::{
    SqlEventLog, begin_write, commit, fetch_stream, push_any_of, push_page, record, resolve,
};
use crate::error::{DbError, map_conflict};

const ENTITY: &str = "role";

/// SQLite implementation of the Role repository.
#[derive(Clone)]
pub struct SqlRoleRepository<L = SqlEventLog> {
    pool: SqlitePool,
    events: L,
}

impl SqlRoleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            events: SqlEventLog::new(pool.clone()),
            pool,
        }
    }
}

impl<L: EventLog> SqlRoleRepository<L> {
    pub fn with_events(pool: SqlitePool, events: L) -> Self {
        Self { pool, events }
    }
}

fn ensure_grantable(permissions: &[Permission]) -> ArborResult<()> {
    match permissions.iter().find(|p| !p.is_grantable()) {
        Some(p) => Err(ArborError::invalid(
            "permission",
            format!("{p} cannot be granted"),
        )),
        None => Ok(()),
    }
}

/// Slug for `name` in the scope identified by `scope_slug` (global when
/// `None`).
fn role_slug(scope_slug: Option<&str>, name: &str) -> ArborResult<String> {
    match scope_slug {
        Some(root) => namespaced(root, name),
        None => slugify(name),
    }
}

async fn grant(
    conn: &mut SqliteConnection,
    role: i64,
    permissions: &BTreeSet<Permission>,
) -> Result<u64, DbError> {
    if permissions.is_empty() {
        return Ok(0);
    }
    let mut query = QueryBuilder::<Sqlite>::new("INSERT INTO role_permission (role_id, permission) ");
    query.push_values(permissions, |mut row, permission| {
        row.push_bind(role).push_bind(permission.as_str());
    });
    Ok(query.build().execute(conn).await?.rows_affected())
}

async fn revoke(
    conn: &mut SqliteConnection,
    role: i64,
    permissions: &BTreeSet<Permission>,
) -> Result<u64, DbError> {
    if permissions.is_empty() {
        return Ok(0);
    }
    let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM role_permission WHERE role_id = ");
    query.push_bind(role).push(" AND permission IN (");
    let mut list = query.separated(", ");
    for permission in permissions {
        list.push_bind(permission.as_str());
    }
    list.push_unseparated(")");
    Ok(query.build().execute(conn).await?.rows_affected())
}

impl<L: EventLog> RoleRepository for SqlRoleRepository<L> {
    async fn create(&self, actor: Uuid, input: &CreateRole) -> ArborResult<Role> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ArborError::invalid("name", "must not be empty"));
        }
        ensure_grantable(&input.permissions)?;

        let mut tx = begin_write(&self.pool, ENTITY, name).await?;
        let scope = match &input.scope {
            Some(identifier) => {
                let org = resolve::organization(&mut *tx, identifier).await?;
                Some((org.root_id, org.root_slug))
            }
            None => None,
        };
        let slug = role_slug(scope.as_ref().map(|(_, s)| s.as_str()), name)?;
        let now = Utc::now();

        let key = sqlx::query(
            "INSERT INTO role (uuid, name, slug, root_id, generation, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(&slug)
        .bind(scope.as_ref().map(|(k, _)| *k))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_conflict(e, ENTITY, &[("slug", slug.as_str())]))?
        .last_insert_rowid();

        let permissions: BTreeSet<Permission> = input.permissions.iter().copied().collect();
        grant(&mut tx, key, &permissions).await?;

        let role = resolve::role_by_key(&mut *tx, key).await?.into_domain()?;
        commit(tx, ENTITY, &slug).await?;

        info!(
            role = %role.id,
            slug = %role.slug,
            permissions = role.permissions.len(),
            "Role created"
        );
        record(
            &self.events,
            CreateAuditEvent::created(actor, ObjectKind::Role, role.id, &role),
        )
        .await;
        Ok(role)
    }

    async fn get(&self, identifier: &str) -> ArborResult<Role> {
        Ok(resolve::role(&self.pool, identifier).await?.into_domain()?)
    }

    async fn update(&self, actor: Uuid, before: &Role, input: UpdateRole) -> ArborResult<Role> {
        ensure_grantable(&input.add)?;
        ensure_grantable(&input.remove)?;

        let id = before.id.to_string();
        let mut tx = begin_write(&self.pool, ENTITY, &id).await?;
        let current = resolve::role(&mut *tx, &id).await?;

        let (name, slug) = match input.name.as_deref().map(str::trim) {
            Some("") => return Err(ArborError::invalid("name", "must not be empty")),
            Some(name) => (
                name.to_owned(),
                role_slug(current.scope_slug.as_deref(), name)?,
            ),
            None => (before.name.clone(), before.slug.clone()),
        };
        let now = Utc::now();

        // The generation check runs first so a stale pre-image never
        // reaches the grant statements.
        let result = sqlx::query(
            "UPDATE role SET name = ?1, slug = ?2, generation = generation + 1, updated_at = ?3 \
             WHERE id = ?4 AND generation = ?5",
        )
        .bind(&name)
        .bind(&slug)
        .bind(now)
        .bind(current.id)
        .bind(before.generation)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_conflict(e, ENTITY, &[("slug", slug.as_str())]))?;

        if result.rows_affected() != 1 {
            warn!(
                role = %before.id,
                generation = before.generation,
                "Role update lost a concurrent race"
            );
            return Err(ArborError::concurrent(ENTITY, id));
        }

        let delta = PermissionDelta::classify(&before.permissions, &input.add, &input.remove);
        grant(&mut tx, current.id, &delta.add).await?;
        revoke(&mut tx, current.id, &delta.remove).await?;
        commit(tx, ENTITY, &id).await?;

        let after = Role {
            name,
            slug,
            permissions: delta.apply(&before.permissions),
            generation: before.generation + 1,
            updated_at: now,
            ..before.clone()
        };

        info!(
            role = %after.id,
            generation = after.generation,
            granted = delta.add.len(),
            revoked = delta.remove.len(),
            "Role updated"
        );
        record(
            &self.events,
            CreateAuditEvent::modified(actor, ObjectKind::Role, after.id, before, &after),
        )
        .await;
        Ok(after)
    }

    async fn delete(&self, actor: Uuid, identifier: &str) -> ArborResult<u64> {
        let mut tx = begin_write(&self.pool, ENTITY, identifier).await?;
        let target = resolve::role(&mut *tx, identifier).await?;

        for sql in [
            "DELETE FROM user_role WHERE role_id = ?1",
            "DELETE FROM role_permission WHERE role_id = ?1",
        ] {
            sqlx::query(sql)
                .bind(target.id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;
        }
        let deleted = sqlx::query("DELETE FROM role WHERE id = ?1")
            .bind(target.id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?
            .rows_affected();
        commit(tx, ENTITY, &target.uuid).await?;

        let before = target.into_domain()?;
        info!(role = %before.id, "Role deleted");
        record(
            &self.events,
            CreateAuditEvent::deleted(actor, ObjectKind::Role, before.id, &before),
        )
        .await;
        Ok(deleted)
    }

    async fn list(&self, filter: RoleFilter, pagination: Pagination) -> ArborResult<ListStream<Role>> {
        let mut query = QueryBuilder::<Sqlite>::new(ROLE_SELECT);
        query.push(" WHERE 1 = 1");
        push_any_of(
            &mut query,
            &["ro.uuid", "ro.name", "ro.slug"],
            &filter.identifiers,
        );
        match filter.scope {
            RoleScopeFilter::Any => {}
            RoleScopeFilter::Global => {
                query.push(" AND ro.root_id IS NULL");
            }
            RoleScopeFilter::Tree(identifier) => {
                let org = resolve::organization(&self.pool, &identifier).await?;
                query.push(" AND ro.root_id = ").push_bind(org.root_id);
            }
        }
        query.push(" ORDER BY ro.id");
        push_page(&mut query, pagination);
        Ok(fetch_stream::<RoleRow>(self.pool.clone(), query))
    }
}
