//! Identifier resolution against the store.
//!
//! Every function is generic over the executor so it can run on the pool
//! or inside an open transaction (`&mut *tx`). Handles are matched in one
//! query and ranked in memory: a slug match wins, then (for users) an
//! email match, then a display-name match, which must be unambiguous.

use arbor_core::error::{ArborError, ArborResult};
use arbor_core::identifier::Lookup;
use sqlx::{Executor, Sqlite};
use uuid::Uuid;

use super::rows::{
    ORGANIZATION_SELECT, OrganizationRow, ROLE_SELECT, RoleRow, USER_SELECT, UserRow,
};
use crate::error::DbError;

/// Picks the best-ranked row (lowest rank). Ties on the best rank mean
/// the handle is ambiguous.
fn pick<R>(
    entity: &str,
    search: &str,
    rows: Vec<R>,
    rank: impl Fn(&R) -> u8,
) -> ArborResult<R> {
    let Some(best) = rows.iter().map(&rank).min() else {
        return Err(ArborError::not_found(entity, search));
    };
    let mut matches: Vec<R> = rows.into_iter().filter(|r| rank(r) == best).collect();
    if matches.len() > 1 {
        return Err(ArborError::invalid(
            "identifier",
            format!("'{search}' matches {} {entity} records", matches.len()),
        ));
    }
    matches
        .pop()
        .ok_or_else(|| ArborError::not_found(entity, search))
}

pub(crate) async fn organization<'e, E>(executor: E, search: &str) -> ArborResult<OrganizationRow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = match Lookup::parse(search)? {
        Lookup::Id(id) => {
            let sql = format!("{ORGANIZATION_SELECT} WHERE o.uuid = ?1");
            sqlx::query_as::<_, OrganizationRow>(&sql)
                .bind(id.to_string())
                .fetch_all(executor)
                .await
        }
        Lookup::Handle(handle) => {
            let sql = format!("{ORGANIZATION_SELECT} WHERE o.slug = ?1 OR o.name = ?1");
            sqlx::query_as::<_, OrganizationRow>(&sql)
                .bind(handle)
                .fetch_all(executor)
                .await
        }
    }
    .map_err(DbError::from)?;
    let handle = search.trim();
    pick("organization", search, rows, |r| {
        if r.uuid == handle || r.slug == handle { 0 } else { 1 }
    })
}

pub(crate) async fn organization_by_key<'e, E>(executor: E, key: i64) -> ArborResult<OrganizationRow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{ORGANIZATION_SELECT} WHERE o.id = ?1");
    sqlx::query_as::<_, OrganizationRow>(&sql)
        .bind(key)
        .fetch_optional(executor)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| ArborError::not_found("organization", key.to_string()))
}

pub(crate) async fn user<'e, E>(executor: E, search: &str) -> ArborResult<UserRow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = match Lookup::parse(search)? {
        Lookup::Id(id) => {
            let sql = format!("{USER_SELECT} WHERE u.uuid = ?1");
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(id.to_string())
                .fetch_all(executor)
                .await
        }
        Lookup::Handle(handle) => {
            let sql = format!("{USER_SELECT} WHERE u.slug = ?1 OR u.email = ?1 OR u.name = ?1");
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(handle)
                .fetch_all(executor)
                .await
        }
    }
    .map_err(DbError::from)?;
    let handle = search.trim();
    pick("user", search, rows, |r| {
        if r.uuid == handle || r.slug == handle {
            0
        } else if r.email == handle {
            1
        } else {
            2
        }
    })
}

pub(crate) async fn user_by_id<'e, E>(executor: E, id: Uuid) -> ArborResult<UserRow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{USER_SELECT} WHERE u.uuid = ?1");
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| ArborError::not_found("user", id.to_string()))
}

pub(crate) async fn role<'e, E>(executor: E, search: &str) -> ArborResult<RoleRow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = match Lookup::parse(search)? {
        Lookup::Id(id) => {
            let sql = format!("{ROLE_SELECT} WHERE ro.uuid = ?1");
            sqlx::query_as::<_, RoleRow>(&sql)
                .bind(id.to_string())
                .fetch_all(executor)
                .await
        }
        Lookup::Handle(handle) => {
            let sql = format!("{ROLE_SELECT} WHERE ro.slug = ?1 OR ro.name = ?1");
            sqlx::query_as::<_, RoleRow>(&sql)
                .bind(handle)
                .fetch_all(executor)
                .await
        }
    }
    .map_err(DbError::from)?;
    let handle = search.trim();
    pick("role", search, rows, |r| {
        if r.uuid == handle || r.slug == handle { 0 } else { 1 }
    })
}

pub(crate) async fn role_by_key<'e, E>(executor: E, key: i64) -> ArborResult<RoleRow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{ROLE_SELECT} WHERE ro.id = ?1");
    sqlx::query_as::<_, RoleRow>(&sql)
        .bind(key)
        .fetch_optional(executor)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| ArborError::not_found("role", key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_rank_wins() {
        let picked = pick("user", "x", vec![(2u8, "b"), (0, "a")], |r| r.0).unwrap();
        assert_eq!(picked.1, "a");
    }

    #[test]
    fn tie_on_best_rank_is_ambiguous() {
        let err = pick("role", "admins", vec![(1u8, "a"), (1, "b")], |r| r.0).unwrap_err();
        assert!(matches!(err, ArborError::InvalidArgument { .. }));
        assert!(err.to_string().contains("admins"));
    }

    #[test]
    fn no_rows_is_not_found() {
        let err = pick::<(u8, &str)>("organization", "ghost", vec![], |r| r.0).unwrap_err();
        assert!(err.is_not_found());
    }
}
