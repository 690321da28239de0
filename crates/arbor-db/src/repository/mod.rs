//! SQLite repository implementations.
//!
//! Mutations follow one protocol: resolve identifiers, begin a write
//! transaction (rolled back on drop), write, finish with a
//! generation compare-and-swap where the entity is versioned, commit,
//! then append the audit event. Event-log failures after commit are
//! logged and do not fail the operation.
//!
//! Write transactions take SQLite's write lock at `BEGIN`, so writers on
//! different connections queue instead of failing mid-transaction. A
//! writer that cannot get the lock within the busy timeout reports a
//! concurrent update.

mod audit;
mod organization;
mod permission;
mod resolve;
mod role;
mod rows;
mod user;

pub use audit::SqlEventLog;
pub use organization::SqlOrganizationRepository;
pub use permission::SqlPermissionLoader;
pub use role::SqlRoleRepository;
pub use user::SqlUserRepository;

use arbor_core::error::ArborResult;
use arbor_core::identifier::Lookup;
use arbor_core::models::audit::CreateAuditEvent;
use arbor_core::repository::{EventLog, ListStream, Pagination};
use async_stream::try_stream;
use futures::{Stream, TryStreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, Transaction};
use tracing::error;

use crate::error::{DbError, map_contention};
use rows::IntoDomain;

fn boxed<T, S>(stream: S) -> ListStream<T>
where
    S: Stream<Item = ArborResult<T>> + Send + 'static,
{
    Box::pin(stream)
}

/// Begins a transaction holding the write lock. `entity` and `id` name
/// what the caller is about to change.
pub(crate) async fn begin_write(
    pool: &SqlitePool,
    entity: &str,
    id: &str,
) -> ArborResult<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(|e| map_contention(e, entity, id))
}

pub(crate) async fn commit(
    tx: Transaction<'static, Sqlite>,
    entity: &str,
    id: &str,
) -> ArborResult<()> {
    tx.commit().await.map_err(|e| map_contention(e, entity, id))
}

/// Runs `query` lazily on its own pooled connection, converting each row
/// as it arrives.
pub(crate) fn fetch_stream<R>(
    pool: SqlitePool,
    mut query: QueryBuilder<'static, Sqlite>,
) -> ListStream<R::Output>
where
    R: for<'r> FromRow<'r, SqliteRow> + IntoDomain + Send + Unpin + 'static,
    R::Output: Send + 'static,
{
    boxed(try_stream! {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        let mut rows = query.build_query_as::<R>().fetch(&mut *conn);
        while let Some(row) = rows.try_next().await.map_err(DbError::from)? {
            yield row.into_domain()?;
        }
    })
}

/// Appends `LIMIT`/`OFFSET` for `pagination`.
pub(crate) fn push_page(query: &mut QueryBuilder<'static, Sqlite>, pagination: Pagination) {
    query
        .push(" LIMIT ")
        .push_bind(pagination.limit as i64)
        .push(" OFFSET ")
        .push_bind(pagination.offset as i64);
}

/// Appends `(col_a IN (...) OR col_b IN (...))` binding every value once
/// per column. Values bound against a `.uuid` column are normalized to
/// the stored hyphenated form. Does nothing for an empty list.
pub(crate) fn push_any_of(
    query: &mut QueryBuilder<'static, Sqlite>,
    columns: &[&str],
    values: &[String],
) {
    if values.is_empty() {
        return;
    }
    query.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            query.push(" OR ");
        }
        let is_uuid = column.ends_with(".uuid");
        query.push(*column).push(" IN (");
        let mut list = query.separated(", ");
        for value in values {
            let bound = match Lookup::parse(value) {
                Ok(Lookup::Id(id)) if is_uuid => id.to_string(),
                _ => value.trim().to_owned(),
            };
            list.push_bind(bound);
        }
        list.push_unseparated(")");
    }
    query.push(")");
}

/// Appends `col IN (...)` for integer keys.
pub(crate) fn push_keys(query: &mut QueryBuilder<'_, Sqlite>, column: &str, keys: &[i64]) {
    query.push(column).push(" IN (");
    let mut list = query.separated(", ");
    for key in keys {
        list.push_bind(*key);
    }
    list.push_unseparated(")");
}

/// Appends an audit event after commit. Failures are logged only.
pub(crate) async fn record<L: EventLog>(events: &L, event: CreateAuditEvent) {
    let kind = event.kind;
    let object_id = event.object_id;
    if let Err(e) = events.append(event).await {
        error!(
            error = %e,
            kind = %kind,
            object_id = %object_id,
            "Failed to record audit event"
        );
    }
}
