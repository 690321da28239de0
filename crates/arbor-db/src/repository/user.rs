//! SQLite implementation of [`UserRepository`].

use arbor_core::error::{ArborError, ArborResult};
use arbor_core::models::audit::{CreateAuditEvent, ObjectKind};
use arbor_core::models::membership::{MembershipChange, MembershipCounts};
use arbor_core::models::organization::Organization;
use arbor_core::models::role::Role;
use arbor_core::models::user::{CreateUser, UpdateUser, User, UserFilter};
use arbor_core::reconcile::{RootOccupancy, plan_user_removal, reconcile};
use arbor_core::repository::{EventLog, ListStream, Pagination, UserRepository};
use arbor_core::slug::slugify;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use super::organization::remove_subtree;
use super::rows::{
    IntoDomain, ORGANIZATION_SELECT, OrganizationRow, ROLE_SELECT, RoleRow, USER_SELECT, UserRow,
};
use super::{
    SqlEventLog, begin_write, commit, fetch_stream, push_any_of, push_keys, push_page, record,
    resolve,
};
use crate::error::{DbError, map_conflict};

const ENTITY: &str = "user";

/// Root organizations the departing user is a direct member of, with
/// the number of other users in each tree and in the root itself.
const ROOT_OCCUPANCY: &str = "\
SELECT o.id, o.slug, \
    (SELECT COUNT(DISTINCT m.user_id) FROM organization_member m \
     JOIN organization t ON t.id = m.organization_id \
     WHERE t.root_id = o.id AND m.user_id != ?1) AS others_in_tree, \
    (SELECT COUNT(*) FROM organization_member m \
     WHERE m.organization_id = o.id AND m.user_id != ?1) AS others_in_root \
FROM organization o \
JOIN organization_member mm ON mm.organization_id = o.id \
WHERE mm.user_id = ?1 AND o.root_id = o.id \
ORDER BY o.id";

#[derive(Debug, sqlx::FromRow)]
struct OccupancyRow {
    id: i64,
    slug: String,
    others_in_tree: i64,
    others_in_root: i64,
}

/// SQLite implementation of the User repository.
#[derive(Clone)]
pub struct SqlUserRepository<L = SqlEventLog> {
    pool: SqlitePool,
    events: L,
}

impl SqlUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            events: SqlEventLog::new(pool.clone()),
            pool,
        }
    }
}

impl<L: EventLog> SqlUserRepository<L> {
    pub fn with_events(pool: SqlitePool, events: L) -> Self {
        Self { pool, events }
    }
}

fn validate(email: &str, name: &str) -> ArborResult<(String, String, String)> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ArborError::invalid(
            "email",
            format!("'{email}' is not an email address"),
        ));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(ArborError::invalid("name", "must not be empty"));
    }
    Ok((email.to_owned(), name.to_owned(), slugify(name)?))
}

impl<L: EventLog> UserRepository for SqlUserRepository<L> {
    async fn create(&self, actor: Uuid, input: &CreateUser) -> ArborResult<User> {
        let (email, name, slug) = validate(&input.email, &input.name)?;
        let now = Utc::now();
        let id = Uuid::new_v4();

        let mut tx = begin_write(&self.pool, ENTITY, &email).await?;
        sqlx::query(
            "INSERT INTO user (uuid, email, name, slug, generation, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
        )
        .bind(id.to_string())
        .bind(&email)
        .bind(&name)
        .bind(&slug)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            map_conflict(
                e,
                ENTITY,
                &[("email", email.as_str()), ("slug", slug.as_str())],
            )
        })?;

        let user = resolve::user_by_id(&mut *tx, id).await?.into_domain()?;
        commit(tx, ENTITY, &email).await?;

        info!(user = %user.id, slug = %user.slug, "User created");
        record(
            &self.events,
            CreateAuditEvent::created(actor, ObjectKind::User, user.id, &user),
        )
        .await;
        Ok(user)
    }

    async fn get(&self, identifier: &str) -> ArborResult<User> {
        Ok(resolve::user(&self.pool, identifier).await?.into_domain()?)
    }

    async fn update(&self, actor: Uuid, before: &User, input: UpdateUser) -> ArborResult<User> {
        let (email, name, slug) = validate(
            input.email.as_deref().unwrap_or(&before.email),
            input.name.as_deref().unwrap_or(&before.name),
        )?;

        let id = before.id.to_string();
        let mut tx = begin_write(&self.pool, ENTITY, &id).await?;
        let current = resolve::user_by_id(&mut *tx, before.id).await?;

        let result = sqlx::query(
            "UPDATE user SET email = ?1, name = ?2, slug = ?3, \
             generation = generation + 1, updated_at = ?4 \
             WHERE id = ?5 AND generation = ?6",
        )
        .bind(&email)
        .bind(&name)
        .bind(&slug)
        .bind(Utc::now())
        .bind(current.id)
        .bind(before.generation)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            map_conflict(
                e,
                ENTITY,
                &[("email", email.as_str()), ("slug", slug.as_str())],
            )
        })?;

        if result.rows_affected() != 1 {
            warn!(
                user = %before.id,
                generation = before.generation,
                "User update lost a concurrent race"
            );
            return Err(ArborError::concurrent(ENTITY, id));
        }

        let after = resolve::user_by_id(&mut *tx, before.id)
            .await?
            .into_domain()?;
        commit(tx, ENTITY, &id).await?;

        info!(user = %after.id, generation = after.generation, "User updated");
        record(
            &self.events,
            CreateAuditEvent::modified(actor, ObjectKind::User, after.id, before, &after),
        )
        .await;
        Ok(after)
    }

    async fn delete(&self, actor: Uuid, identifier: &str) -> ArborResult<u64> {
        let mut tx = begin_write(&self.pool, ENTITY, identifier).await?;
        let target = resolve::user(&mut *tx, identifier).await?;

        let occupancy: Vec<OccupancyRow> = sqlx::query_as(ROOT_OCCUPANCY)
            .bind(target.id)
            .fetch_all(&mut *tx)
            .await
            .map_err(DbError::from)?;
        let roots: Vec<RootOccupancy<i64>> = occupancy
            .into_iter()
            .map(|row| RootOccupancy {
                root: row.id,
                label: row.slug,
                others_in_tree: row.others_in_tree.max(0) as u64,
                others_in_root: row.others_in_root.max(0) as u64,
            })
            .collect();

        let cascade = plan_user_removal(&roots).inspect_err(|e| {
            warn!(user = %target.uuid, error = %e, "User deletion refused");
        })?;

        let mut removed_roots: Vec<Organization> = Vec::with_capacity(cascade.len());
        for key in cascade {
            let root = resolve::organization_by_key(&mut *tx, key).await?;
            remove_subtree(&mut tx, &root, root.generation).await?;
            removed_roots.push(root.into_domain()?);
        }

        for sql in [
            "DELETE FROM user_role WHERE user_id = ?1",
            "DELETE FROM organization_member WHERE user_id = ?1",
        ] {
            sqlx::query(sql)
                .bind(target.id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;
        }
        let deleted = sqlx::query("DELETE FROM user WHERE id = ?1")
            .bind(target.id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?
            .rows_affected();
        commit(tx, ENTITY, &target.uuid).await?;

        let before = target.into_domain()?;
        info!(
            user = %before.id,
            cascaded_trees = removed_roots.len(),
            "User deleted"
        );
        record(
            &self.events,
            CreateAuditEvent::deleted(actor, ObjectKind::User, before.id, &before),
        )
        .await;
        for root in &removed_roots {
            record(
                &self.events,
                CreateAuditEvent::deleted(actor, ObjectKind::Organization, root.id, root),
            )
            .await;
        }
        Ok(deleted)
    }

    async fn set_roles(
        &self,
        identifier: &str,
        change: MembershipChange,
    ) -> ArborResult<MembershipCounts> {
        let mut tx = begin_write(&self.pool, ENTITY, identifier).await?;
        let user = resolve::user(&mut *tx, identifier).await?;

        let mut add = Vec::with_capacity(change.add.len());
        for ident in change.add {
            add.push((resolve::role(&mut *tx, &ident).await?.id, ident));
        }
        let mut remove = Vec::with_capacity(change.remove.len());
        for ident in change.remove {
            remove.push((resolve::role(&mut *tx, &ident).await?.id, ident));
        }
        let plan = reconcile(&add, &remove)?;

        let mut counts = MembershipCounts::default();
        if !plan.add.is_empty() {
            let mut query =
                QueryBuilder::<Sqlite>::new("INSERT OR IGNORE INTO user_role (user_id, role_id) ");
            query.push_values(&plan.add, |mut row, role| {
                row.push_bind(user.id).push_bind(*role);
            });
            counts.added = query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?
                .rows_affected();
        }
        if !plan.remove.is_empty() {
            let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM user_role WHERE user_id = ");
            query.push_bind(user.id).push(" AND ");
            push_keys(&mut query, "role_id", &plan.remove);
            counts.removed = query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?
                .rows_affected();
        }
        commit(tx, ENTITY, &user.uuid).await?;

        info!(
            user = %user.uuid,
            added = counts.added,
            removed = counts.removed,
            "User roles reconciled"
        );
        Ok(counts)
    }

    async fn list(
        &self,
        filter: UserFilter,
        pagination: Pagination,
    ) -> ArborResult<ListStream<User>> {
        let mut query = QueryBuilder::<Sqlite>::new(USER_SELECT);
        query.push(" WHERE 1 = 1");
        push_any_of(
            &mut query,
            &["u.uuid", "u.name", "u.slug", "u.email"],
            &filter.identifiers,
        );
        query.push(" ORDER BY u.id");
        push_page(&mut query, pagination);
        Ok(fetch_stream::<UserRow>(self.pool.clone(), query))
    }

    async fn memberships(
        &self,
        identifier: &str,
        pagination: Pagination,
    ) -> ArborResult<ListStream<Organization>> {
        let user = resolve::user(&self.pool, identifier).await?;
        let mut query = QueryBuilder::<Sqlite>::new(ORGANIZATION_SELECT);
        // Every node under a node the user is a direct member of.
        query
            .push(
                " WHERE EXISTS (SELECT 1 FROM organization_member m \
                 JOIN organization a ON a.id = m.organization_id \
                 WHERE a.root_id = o.root_id AND o.lft BETWEEN a.lft AND a.rgt \
                 AND m.user_id = ",
            )
            .push_bind(user.id)
            .push(") ORDER BY o.root_id, o.lft");
        push_page(&mut query, pagination);
        Ok(fetch_stream::<OrganizationRow>(self.pool.clone(), query))
    }

    async fn roles(&self, identifier: &str, pagination: Pagination) -> ArborResult<ListStream<Role>> {
        let user = resolve::user(&self.pool, identifier).await?;
        let mut query = QueryBuilder::<Sqlite>::new(ROLE_SELECT);
        query
            .push(" JOIN user_role ur ON ur.role_id = ro.id WHERE ur.user_id = ")
            .push_bind(user.id)
            .push(" ORDER BY ro.id");
        push_page(&mut query, pagination);
        Ok(fetch_stream::<RoleRow>(self.pool.clone(), query))
    }
}
