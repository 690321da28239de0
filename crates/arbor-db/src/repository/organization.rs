//! SQLite implementation of [`OrganizationRepository`].
//!
//! Each tree is a nested set keyed by `root_id`. Structural changes (child
//! insert, subtree delete) observe the tree before their transaction
//! begins, shift the intervals of the whole tree, and finish with a
//! compare-and-swap on the root's `generation` against the observed
//! value. Field updates are guarded by the row's own `generation`.

use arbor_core::error::{ArborError, ArborResult};
use arbor_core::models::audit::{CreateAuditEvent, ObjectKind};
use arbor_core::models::membership::{MembershipChange, MembershipCounts};
use arbor_core::models::organization::{
    CreateOrganization, Organization, OrganizationFilter, UpdateOrganization, Visibility,
};
use arbor_core::models::user::User;
use arbor_core::nested_set::{InsertionPlan, Interval, RemovalPlan};
use arbor_core::reconcile::reconcile;
use arbor_core::repository::{EventLog, ListStream, OrganizationRepository, Pagination};
use arbor_core::slug::{namespaced, slugify};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use super::rows::{IntoDomain, ORGANIZATION_SELECT, OrganizationRow, USER_SELECT, UserRow};
use super::{
    SqlEventLog, begin_write, commit, fetch_stream, push_any_of, push_keys, push_page, record,
    resolve,
};
use crate::error::{DbError, map_conflict};

const ENTITY: &str = "organization";

/// Key and interval of one node, used for removal planning.
#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    id: i64,
    lft: i64,
    rgt: i64,
}

/// SQLite implementation of the Organization repository.
#[derive(Clone)]
pub struct SqlOrganizationRepository<L = SqlEventLog> {
    pool: SqlitePool,
    events: L,
}

impl SqlOrganizationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            events: SqlEventLog::new(pool.clone()),
            pool,
        }
    }
}

impl<L: EventLog> SqlOrganizationRepository<L> {
    pub fn with_events(pool: SqlitePool, events: L) -> Self {
        Self { pool, events }
    }
}

fn validate_name(name: &str) -> ArborResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ArborError::invalid("name", "must not be empty"));
    }
    Ok(name)
}

/// Increments `generation` on `key` if it still equals `observed`.
pub(crate) async fn bump_generation(
    conn: &mut SqliteConnection,
    table: &'static str,
    key: i64,
    observed: i64,
) -> Result<bool, DbError> {
    let sql = format!(
        "UPDATE {table} SET generation = generation + 1, updated_at = ?1 \
         WHERE id = ?2 AND generation = ?3"
    );
    let result = sqlx::query(&sql)
        .bind(Utc::now())
        .bind(key)
        .bind(observed)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Removes `target` and its subtree. Removing a root also removes the
/// roles scoped to its tree. Otherwise the remaining nodes close the gap.
/// Either way the root's generation must still equal `root_generation`,
/// the value observed when `target` was read. Returns the number of
/// organizations deleted.
pub(crate) async fn remove_subtree(
    conn: &mut SqliteConnection,
    target: &OrganizationRow,
    root_generation: i64,
) -> ArborResult<u64> {
    let nodes: Vec<NodeRow> = sqlx::query_as(
        "SELECT id, lft, rgt FROM organization \
         WHERE root_id = ?1 AND lft BETWEEN ?2 AND ?3",
    )
    .bind(target.root_id)
    .bind(target.lft)
    .bind(target.rgt)
    .fetch_all(&mut *conn)
    .await
    .map_err(DbError::from)?;

    let plan = RemovalPlan::plan(
        target.interval(),
        nodes.iter().map(|n| (&n.id, Interval::new(n.lft, n.rgt))),
    );

    // The root row goes away with its tree, so its check runs first.
    if plan.removes_root {
        if !bump_generation(conn, "organization", target.root_id, root_generation).await? {
            warn!(root = %target.root_uuid, "Concurrent restructure detected during delete");
            return Err(ArborError::concurrent(ENTITY, target.root_uuid.as_str()));
        }
        for sql in [
            "DELETE FROM user_role WHERE role_id IN (SELECT id FROM role WHERE root_id = ?1)",
            "DELETE FROM role_permission WHERE role_id IN (SELECT id FROM role WHERE root_id = ?1)",
            "DELETE FROM role WHERE root_id = ?1",
        ] {
            sqlx::query(sql)
                .bind(target.root_id)
                .execute(&mut *conn)
                .await
                .map_err(DbError::from)?;
        }
    }

    let mut members = QueryBuilder::<Sqlite>::new("DELETE FROM organization_member WHERE ");
    push_keys(&mut members, "organization_id", &plan.subtree);
    members
        .build()
        .execute(&mut *conn)
        .await
        .map_err(DbError::from)?;

    let mut orgs = QueryBuilder::<Sqlite>::new("DELETE FROM organization WHERE ");
    push_keys(&mut orgs, "id", &plan.subtree);
    let deleted = orgs
        .build()
        .execute(&mut *conn)
        .await
        .map_err(DbError::from)?
        .rows_affected();

    if !plan.removes_root {
        sqlx::query("UPDATE organization SET lft = lft - ?1 WHERE root_id = ?2 AND lft > ?3")
            .bind(plan.width)
            .bind(target.root_id)
            .bind(plan.boundary())
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)?;
        sqlx::query("UPDATE organization SET rgt = rgt - ?1 WHERE root_id = ?2 AND rgt > ?3")
            .bind(plan.width)
            .bind(target.root_id)
            .bind(plan.boundary())
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)?;

        if !bump_generation(conn, "organization", target.root_id, root_generation).await? {
            warn!(root = %target.root_uuid, "Concurrent restructure detected during delete");
            return Err(ArborError::concurrent(ENTITY, target.root_uuid.as_str()));
        }
    }

    Ok(deleted)
}

/// Moves the namespaced slugs of every descendant and scoped role in the
/// tree of `root` onto the root's new slug.
async fn rename_tree(
    conn: &mut SqliteConnection,
    root: &OrganizationRow,
    slug: &str,
) -> ArborResult<()> {
    for sql in [
        "UPDATE organization SET slug = ?1 || substr(slug, length(?2) + 1) \
         WHERE root_id = ?3 AND id != ?3",
        "UPDATE role SET slug = ?1 || substr(slug, length(?2) + 1) WHERE root_id = ?3",
    ] {
        sqlx::query(sql)
            .bind(slug)
            .bind(&root.slug)
            .bind(root.id)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_conflict(e, ENTITY, &[("slug", slug)]))?;
    }
    Ok(())
}

impl<L: EventLog> SqlOrganizationRepository<L> {
    async fn create_root(
        &self,
        conn: &mut SqliteConnection,
        actor: Uuid,
        name: &str,
        visibility: Visibility,
    ) -> ArborResult<i64> {
        let slug = slugify(name)?;
        let creator = resolve::user_by_id(&mut *conn, actor).await?;
        let now = Utc::now();

        let key = sqlx::query(
            "INSERT INTO organization \
             (uuid, name, slug, visibility, generation, lft, rgt, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(&slug)
        .bind(visibility.as_str())
        .bind(Interval::ROOT.left)
        .bind(Interval::ROOT.right)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_conflict(e, ENTITY, &[("slug", slug.as_str())]))?
        .last_insert_rowid();

        // The key is only known after the insert.
        sqlx::query("UPDATE organization SET root_id = id WHERE id = ?1")
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)?;

        sqlx::query("INSERT INTO organization_member (organization_id, user_id) VALUES (?1, ?2)")
            .bind(key)
            .bind(creator.id)
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)?;

        Ok(key)
    }

    /// Inserts under `parent`, laid out from the `parent` and `root` rows
    /// observed before the transaction began.
    async fn create_child(
        &self,
        conn: &mut SqliteConnection,
        parent: &OrganizationRow,
        root: &OrganizationRow,
        name: &str,
        visibility: Visibility,
    ) -> ArborResult<i64> {
        let parent_visibility: Visibility = parent.visibility.parse()?;
        if !parent_visibility.allows_child(visibility) {
            return Err(ArborError::InvalidVisibility {
                parent: parent.slug.clone(),
                child: name.to_owned(),
            });
        }

        let slug = namespaced(&root.slug, name)?;
        let plan = InsertionPlan::for_parent(parent.interval());

        sqlx::query("UPDATE organization SET rgt = rgt + ?1 WHERE root_id = ?2 AND rgt > ?3")
            .bind(InsertionPlan::SHIFT)
            .bind(root.id)
            .bind(plan.point)
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)?;
        sqlx::query("UPDATE organization SET lft = lft + ?1 WHERE root_id = ?2 AND lft > ?3")
            .bind(InsertionPlan::SHIFT)
            .bind(root.id)
            .bind(plan.point)
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)?;

        let now = Utc::now();
        let key = sqlx::query(
            "INSERT INTO organization \
             (uuid, name, slug, visibility, generation, root_id, lft, rgt, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(&slug)
        .bind(visibility.as_str())
        .bind(root.id)
        .bind(plan.child.left)
        .bind(plan.child.right)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_conflict(e, ENTITY, &[("slug", slug.as_str())]))?
        .last_insert_rowid();

        if !bump_generation(conn, "organization", root.id, root.generation).await? {
            warn!(root = %root.uuid, "Concurrent restructure detected during insert");
            return Err(ArborError::concurrent(ENTITY, root.uuid.as_str()));
        }

        Ok(key)
    }

    /// Nearest ancestor of `node`, if any.
    async fn parent_of(
        conn: &mut SqliteConnection,
        node: &OrganizationRow,
    ) -> ArborResult<Option<OrganizationRow>> {
        let sql = format!(
            "{ORGANIZATION_SELECT} WHERE o.root_id = ?1 AND o.lft < ?2 AND o.rgt > ?3 \
             ORDER BY o.lft DESC LIMIT 1"
        );
        Ok(sqlx::query_as::<_, OrganizationRow>(&sql)
            .bind(node.root_id)
            .bind(node.lft)
            .bind(node.rgt)
            .fetch_optional(conn)
            .await
            .map_err(DbError::from)?)
    }
}

impl<L: EventLog> OrganizationRepository for SqlOrganizationRepository<L> {
    async fn create(&self, actor: Uuid, input: &CreateOrganization) -> ArborResult<Organization> {
        let name = validate_name(&input.name)?;

        let (mut tx, key) = match &input.parent {
            None => {
                let mut tx = begin_write(&self.pool, ENTITY, name).await?;
                let key = self
                    .create_root(&mut tx, actor, name, input.visibility)
                    .await?;
                (tx, key)
            }
            Some(parent) => {
                let parent = resolve::organization(&self.pool, parent).await?;
                let root = resolve::organization_by_key(&self.pool, parent.root_id).await?;
                let mut tx = begin_write(&self.pool, ENTITY, &root.uuid).await?;
                let key = self
                    .create_child(&mut tx, &parent, &root, name, input.visibility)
                    .await?;
                (tx, key)
            }
        };

        let org = resolve::organization_by_key(&mut *tx, key)
            .await?
            .into_domain()?;
        commit(tx, ENTITY, &org.slug).await?;

        info!(
            organization = %org.id,
            slug = %org.slug,
            root = %org.root_id,
            "Organization created"
        );
        record(
            &self.events,
            CreateAuditEvent::created(actor, ObjectKind::Organization, org.id, &org),
        )
        .await;
        Ok(org)
    }

    async fn get(&self, identifier: &str) -> ArborResult<Organization> {
        Ok(resolve::organization(&self.pool, identifier)
            .await?
            .into_domain()?)
    }

    async fn update(
        &self,
        actor: Uuid,
        before: &Organization,
        input: UpdateOrganization,
    ) -> ArborResult<Organization> {
        let id = before.id.to_string();
        let mut tx = begin_write(&self.pool, ENTITY, &id).await?;
        let current = resolve::organization(&mut *tx, &id).await?;

        let (name, slug) = match input.name.as_deref() {
            Some(name) => {
                let name = validate_name(name)?;
                let slug = if current.is_root() {
                    slugify(name)?
                } else {
                    namespaced(&current.root_slug, name)?
                };
                (name.to_owned(), slug)
            }
            None => (current.name.clone(), current.slug.clone()),
        };

        let visibility = input.visibility.unwrap_or(before.visibility);
        if input.visibility.is_some() {
            if let Some(parent) = Self::parent_of(&mut tx, &current).await? {
                let parent_visibility: Visibility = parent.visibility.parse()?;
                if !parent_visibility.allows_child(visibility) {
                    return Err(ArborError::InvalidVisibility {
                        parent: parent.slug,
                        child: current.slug,
                    });
                }
            }
            if visibility == Visibility::Private {
                let public_descendant: Option<String> = sqlx::query_scalar(
                    "SELECT slug FROM organization \
                     WHERE root_id = ?1 AND lft > ?2 AND rgt < ?3 AND visibility = 'PUBLIC' \
                     ORDER BY lft LIMIT 1",
                )
                .bind(current.root_id)
                .bind(current.lft)
                .bind(current.rgt)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::from)?;
                if let Some(child) = public_descendant {
                    return Err(ArborError::InvalidVisibility {
                        parent: current.slug,
                        child,
                    });
                }
            }
        }

        let result = sqlx::query(
            "UPDATE organization SET name = ?1, slug = ?2, visibility = ?3, \
             generation = generation + 1, updated_at = ?4 \
             WHERE id = ?5 AND generation = ?6",
        )
        .bind(&name)
        .bind(&slug)
        .bind(visibility.as_str())
        .bind(Utc::now())
        .bind(current.id)
        .bind(before.generation)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_conflict(e, ENTITY, &[("slug", slug.as_str())]))?;

        if result.rows_affected() != 1 {
            warn!(
                organization = %before.id,
                generation = before.generation,
                "Organization update lost a concurrent race"
            );
            return Err(ArborError::concurrent(ENTITY, id));
        }

        if current.is_root() && slug != current.slug {
            rename_tree(&mut tx, &current, &slug).await?;
        }

        let after = resolve::organization_by_key(&mut *tx, current.id)
            .await?
            .into_domain()?;
        commit(tx, ENTITY, &id).await?;

        info!(
            organization = %after.id,
            generation = after.generation,
            "Organization updated"
        );
        record(
            &self.events,
            CreateAuditEvent::modified(actor, ObjectKind::Organization, after.id, before, &after),
        )
        .await;
        Ok(after)
    }

    async fn delete(&self, actor: Uuid, identifier: &str) -> ArborResult<u64> {
        let target = resolve::organization(&self.pool, identifier).await?;
        let root_generation = if target.is_root() {
            target.generation
        } else {
            resolve::organization_by_key(&self.pool, target.root_id)
                .await?
                .generation
        };

        let mut tx = begin_write(&self.pool, ENTITY, &target.root_uuid).await?;
        let deleted = remove_subtree(&mut tx, &target, root_generation).await?;
        commit(tx, ENTITY, &target.root_uuid).await?;

        let before = target.into_domain()?;
        info!(
            organization = %before.id,
            deleted,
            "Organization subtree deleted"
        );
        record(
            &self.events,
            CreateAuditEvent::deleted(actor, ObjectKind::Organization, before.id, &before),
        )
        .await;
        Ok(deleted)
    }

    async fn set_members(
        &self,
        identifier: &str,
        change: MembershipChange,
    ) -> ArborResult<MembershipCounts> {
        let mut tx = begin_write(&self.pool, ENTITY, identifier).await?;
        let org = resolve::organization(&mut *tx, identifier).await?;

        let mut add = Vec::with_capacity(change.add.len());
        for ident in change.add {
            add.push((resolve::user(&mut *tx, &ident).await?.id, ident));
        }
        let mut remove = Vec::with_capacity(change.remove.len());
        for ident in change.remove {
            remove.push((resolve::user(&mut *tx, &ident).await?.id, ident));
        }
        let plan = reconcile(&add, &remove)?;

        let mut counts = MembershipCounts::default();
        if !plan.add.is_empty() {
            let mut query = QueryBuilder::<Sqlite>::new(
                "INSERT OR IGNORE INTO organization_member (organization_id, user_id) ",
            );
            query.push_values(&plan.add, |mut row, user| {
                row.push_bind(org.id).push_bind(*user);
            });
            counts.added = query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?
                .rows_affected();
        }
        if !plan.remove.is_empty() {
            let mut query = QueryBuilder::<Sqlite>::new(
                "DELETE FROM organization_member WHERE organization_id = ",
            );
            query.push_bind(org.id).push(" AND ");
            push_keys(&mut query, "user_id", &plan.remove);
            counts.removed = query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?
                .rows_affected();
        }
        commit(tx, ENTITY, &org.uuid).await?;

        info!(
            organization = %org.uuid,
            added = counts.added,
            removed = counts.removed,
            "Organization members reconciled"
        );
        Ok(counts)
    }

    async fn list(
        &self,
        filter: OrganizationFilter,
        pagination: Pagination,
    ) -> ArborResult<ListStream<Organization>> {
        let mut query = QueryBuilder::<Sqlite>::new(ORGANIZATION_SELECT);
        query.push(" WHERE 1 = 1");
        push_any_of(&mut query, &["o.uuid", "o.name", "o.slug"], &filter.identifiers);
        if !filter.visibility.is_empty() {
            query.push(" AND o.visibility IN (");
            let mut list = query.separated(", ");
            for visibility in &filter.visibility {
                list.push_bind(visibility.as_str());
            }
            list.push_unseparated(")");
        }
        push_any_of(&mut query, &["r.uuid", "r.name", "r.slug"], &filter.roots);
        query.push(" ORDER BY o.root_id, o.lft");
        push_page(&mut query, pagination);
        Ok(fetch_stream::<OrganizationRow>(self.pool.clone(), query))
    }

    async fn children(&self, identifier: &str) -> ArborResult<ListStream<Organization>> {
        let parent = resolve::organization(&self.pool, identifier).await?;
        let mut query = QueryBuilder::<Sqlite>::new(ORGANIZATION_SELECT);
        query
            .push(" WHERE o.root_id = ")
            .push_bind(parent.root_id)
            .push(" AND o.lft > ")
            .push_bind(parent.lft)
            .push(" AND o.rgt < ")
            .push_bind(parent.rgt)
            .push(
                " AND NOT EXISTS (SELECT 1 FROM organization m \
                 WHERE m.root_id = o.root_id AND m.lft < o.lft AND m.rgt > o.rgt AND m.lft > ",
            )
            .push_bind(parent.lft)
            .push(")")
            .push(" ORDER BY o.lft");
        Ok(fetch_stream::<OrganizationRow>(self.pool.clone(), query))
    }

    async fn members(
        &self,
        identifier: &str,
        pagination: Pagination,
    ) -> ArborResult<ListStream<User>> {
        let org = resolve::organization(&self.pool, identifier).await?;
        let mut query = QueryBuilder::<Sqlite>::new(USER_SELECT);
        // Direct members of the node or of any ancestor in the same tree.
        query
            .push(
                " WHERE EXISTS (SELECT 1 FROM organization_member m \
                 JOIN organization a ON a.id = m.organization_id \
                 WHERE m.user_id = u.id AND a.root_id = ",
            )
            .push_bind(org.root_id)
            .push(" AND ")
            .push_bind(org.lft)
            .push(" BETWEEN a.lft AND a.rgt)")
            .push(" ORDER BY u.id");
        push_page(&mut query, pagination);
        Ok(fetch_stream::<UserRow>(self.pool.clone(), query))
    }
}
