//! SQLite implementation of [`EventLog`].

use arbor_core::error::ArborResult;
use arbor_core::models::audit::{AuditEvent, AuditEventFilter, CreateAuditEvent};
use arbor_core::repository::{EventLog, PaginatedResult, Pagination};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::push_page;
use super::rows::{AuditEventRow, IntoDomain};
use crate::error::DbError;

/// Append-only event log stored next to the entities it describes.
#[derive(Clone)]
pub struct SqlEventLog {
    pool: SqlitePool,
}

impl SqlEventLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_filter(query: &mut QueryBuilder<'static, Sqlite>, filter: &AuditEventFilter) {
    query.push(" WHERE 1 = 1");
    if let Some(actor) = filter.actor_id {
        query.push(" AND actor_id = ").push_bind(actor.to_string());
    }
    if let Some(kind) = filter.object_kind {
        query.push(" AND object_kind = ").push_bind(kind.as_str());
    }
    if let Some(object) = filter.object_id {
        query.push(" AND object_id = ").push_bind(object.to_string());
    }
}

fn image(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

impl EventLog for SqlEventLog {
    async fn append(&self, event: CreateAuditEvent) -> ArborResult<AuditEvent> {
        let id = Uuid::new_v4();
        let recorded_at = Utc::now();
        sqlx::query(
            "INSERT INTO audit_event \
             (uuid, actor_id, kind, object_kind, object_id, before_image, after_image, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(id.to_string())
        .bind(event.actor_id.to_string())
        .bind(event.kind.as_str())
        .bind(event.object_kind.as_str())
        .bind(event.object_id.to_string())
        .bind(image(&event.before))
        .bind(image(&event.after))
        .bind(recorded_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(AuditEvent {
            id,
            actor_id: event.actor_id,
            kind: event.kind,
            object_kind: event.object_kind,
            object_id: event.object_id,
            before: event.before,
            after: event.after,
            recorded_at,
        })
    }

    async fn list(
        &self,
        filter: AuditEventFilter,
        pagination: Pagination,
    ) -> ArborResult<PaginatedResult<AuditEvent>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_event");
        push_filter(&mut count, &filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT uuid, actor_id, kind, object_kind, object_id, before_image, after_image, \
             recorded_at FROM audit_event",
        );
        push_filter(&mut query, &filter);
        query.push(" ORDER BY id");
        push_page(&mut query, pagination);
        let rows: Vec<AuditEventRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(IntoDomain::into_domain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PaginatedResult {
            items,
            total: total.max(0) as u64,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
