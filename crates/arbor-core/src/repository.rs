//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Entities are addressed by
//! caller-supplied identifiers (UUID, slug, or name, see
//! [`crate::identifier::Lookup`]); mutating operations take the acting
//! user's id so the committed change can be recorded in the event log.

use std::collections::BTreeSet;

use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::ArborResult;
use crate::models::{
    audit::{AuditEvent, AuditEventFilter, CreateAuditEvent},
    membership::{MembershipChange, MembershipCounts},
    organization::{CreateOrganization, Organization, OrganizationFilter, UpdateOrganization},
    permission::Permission,
    role::{CreateRole, Role, RoleFilter, UpdateRole},
    user::{CreateUser, UpdateUser, User, UserFilter},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// A lazy, single-pass sequence of entities backed by a query cursor.
///
/// The stream holds a datastore connection until it is dropped or
/// exhausted. Re-invoke the list operation for a second pass.
pub type ListStream<T> = BoxStream<'static, ArborResult<T>>;

// ---------------------------------------------------------------------------
// Organization tree
// ---------------------------------------------------------------------------

pub trait OrganizationRepository: Send + Sync {
    /// Creates a root (no parent) or a child organization. A new root gets
    /// `actor` as its first member.
    fn create(
        &self,
        actor: Uuid,
        input: &CreateOrganization,
    ) -> impl Future<Output = ArborResult<Organization>> + Send;
    fn get(&self, identifier: &str) -> impl Future<Output = ArborResult<Organization>> + Send;
    /// Applies `input` on top of `before`, guarded by `before.generation`.
    fn update(
        &self,
        actor: Uuid,
        before: &Organization,
        input: UpdateOrganization,
    ) -> impl Future<Output = ArborResult<Organization>> + Send;
    /// Deletes the organization and its whole subtree. Returns the number
    /// of organizations removed.
    fn delete(&self, actor: Uuid, identifier: &str)
    -> impl Future<Output = ArborResult<u64>> + Send;
    fn set_members(
        &self,
        identifier: &str,
        change: MembershipChange,
    ) -> impl Future<Output = ArborResult<MembershipCounts>> + Send;
    fn list(
        &self,
        filter: OrganizationFilter,
        pagination: Pagination,
    ) -> impl Future<Output = ArborResult<ListStream<Organization>>> + Send;
    fn children(
        &self,
        identifier: &str,
    ) -> impl Future<Output = ArborResult<ListStream<Organization>>> + Send;
    /// Direct members plus members of every ancestor in the same tree.
    fn members(
        &self,
        identifier: &str,
        pagination: Pagination,
    ) -> impl Future<Output = ArborResult<ListStream<User>>> + Send;
}

// ---------------------------------------------------------------------------
// User directory
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    fn create(
        &self,
        actor: Uuid,
        input: &CreateUser,
    ) -> impl Future<Output = ArborResult<User>> + Send;
    fn get(&self, identifier: &str) -> impl Future<Output = ArborResult<User>> + Send;
    fn update(
        &self,
        actor: Uuid,
        before: &User,
        input: UpdateUser,
    ) -> impl Future<Output = ArborResult<User>> + Send;
    /// Deletes the user together with any organization tree that would be
    /// left without users. Refuses with `OrphanedOrganization` when a tree
    /// still has users but none of them in its root. Returns the number of
    /// users removed.
    fn delete(&self, actor: Uuid, identifier: &str)
    -> impl Future<Output = ArborResult<u64>> + Send;
    fn set_roles(
        &self,
        identifier: &str,
        change: MembershipChange,
    ) -> impl Future<Output = ArborResult<MembershipCounts>> + Send;
    fn list(
        &self,
        filter: UserFilter,
        pagination: Pagination,
    ) -> impl Future<Output = ArborResult<ListStream<User>>> + Send;
    /// Organizations the user belongs to, directly or through an ancestor.
    fn memberships(
        &self,
        identifier: &str,
        pagination: Pagination,
    ) -> impl Future<Output = ArborResult<ListStream<Organization>>> + Send;
    fn roles(
        &self,
        identifier: &str,
        pagination: Pagination,
    ) -> impl Future<Output = ArborResult<ListStream<Role>>> + Send;
}

// ---------------------------------------------------------------------------
// Roles & permissions
// ---------------------------------------------------------------------------

pub trait RoleRepository: Send + Sync {
    fn create(
        &self,
        actor: Uuid,
        input: &CreateRole,
    ) -> impl Future<Output = ArborResult<Role>> + Send;
    fn get(&self, identifier: &str) -> impl Future<Output = ArborResult<Role>> + Send;
    /// Applies the permission delta to `before`, guarded by
    /// `before.generation`.
    fn update(
        &self,
        actor: Uuid,
        before: &Role,
        input: UpdateRole,
    ) -> impl Future<Output = ArborResult<Role>> + Send;
    fn delete(&self, actor: Uuid, identifier: &str)
    -> impl Future<Output = ArborResult<u64>> + Send;
    fn list(
        &self,
        filter: RoleFilter,
        pagination: Pagination,
    ) -> impl Future<Output = ArborResult<ListStream<Role>>> + Send;
}

/// Source of a user's effective system-wide permissions.
pub trait PermissionLoader: Send + Sync {
    /// Union of the permissions of every system-scoped role held by the
    /// user. `NotFound` when the user does not exist.
    fn load_permissions(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = ArborResult<BTreeSet<Permission>>> + Send;
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

pub trait EventLog: Send + Sync {
    fn append(&self, event: CreateAuditEvent)
    -> impl Future<Output = ArborResult<AuditEvent>> + Send;
    fn list(
        &self,
        filter: AuditEventFilter,
        pagination: Pagination,
    ) -> impl Future<Output = ArborResult<PaginatedResult<AuditEvent>>> + Send;
}
