//! IAM service: authorizes each operation, then hands it to a repository.
//!
//! Generic over repository implementations so that the authorization
//! layer has no dependency on the database crate.

use arbor_core::error::ArborResult;
use arbor_core::models::audit::{AuditEvent, AuditEventFilter};
use arbor_core::models::membership::{MembershipChange, MembershipCounts};
use arbor_core::models::organization::{
    CreateOrganization, Organization, OrganizationFilter, UpdateOrganization,
};
use arbor_core::models::permission::Permission;
use arbor_core::models::role::{CreateRole, Role, RoleFilter, UpdateRole};
use arbor_core::models::session::Session;
use arbor_core::models::user::{CreateUser, UpdateUser, User, UserFilter};
use arbor_core::repository::{
    EventLog, ListStream, OrganizationRepository, PaginatedResult, Pagination, PermissionLoader,
    RoleRepository, UserRepository,
};

use crate::clock::{Clock, SystemClock};
use crate::engine::Authorizer;

pub struct IamService<O, U, R, E, L, C = SystemClock> {
    organizations: O,
    users: U,
    roles: R,
    events: E,
    authorizer: Authorizer<L, C>,
}

impl<O, U, R, E, L, C> IamService<O, U, R, E, L, C>
where
    O: OrganizationRepository,
    U: UserRepository,
    R: RoleRepository,
    E: EventLog,
    L: PermissionLoader,
    C: Clock,
{
    pub fn new(
        organizations: O,
        users: U,
        roles: R,
        events: E,
        authorizer: Authorizer<L, C>,
    ) -> Self {
        Self {
            organizations,
            users,
            roles,
            events,
            authorizer,
        }
    }

    pub fn authorizer(&self) -> &Authorizer<L, C> {
        &self.authorizer
    }

    /// The `Authorize` operation: `false` for any user lacking `required`.
    pub async fn authorize(&self, session: &Session, required: Permission) -> bool {
        self.authorizer.check(session, required).await
    }

    async fn require(&self, session: &Session, required: Permission) -> ArborResult<()> {
        Ok(self.authorizer.require(session, required).await?)
    }

    // -------------------------------------------------------------------
    // Organizations
    // -------------------------------------------------------------------

    pub async fn create_organization(
        &self,
        session: &Session,
        input: &CreateOrganization,
    ) -> ArborResult<Organization> {
        self.require(session, Permission::CreateOrganization).await?;
        self.organizations.create(session.user_id, input).await
    }

    pub async fn get_organization(
        &self,
        session: &Session,
        identifier: &str,
    ) -> ArborResult<Organization> {
        self.require(session, Permission::ReadOrganization).await?;
        self.organizations.get(identifier).await
    }

    pub async fn update_organization(
        &self,
        session: &Session,
        before: &Organization,
        input: UpdateOrganization,
    ) -> ArborResult<Organization> {
        self.require(session, Permission::ModifyOrganization).await?;
        self.organizations
            .update(session.user_id, before, input)
            .await
    }

    pub async fn delete_organization(&self, session: &Session, identifier: &str) -> ArborResult<u64> {
        self.require(session, Permission::DeleteOrganization).await?;
        self.organizations.delete(session.user_id, identifier).await
    }

    pub async fn set_organization_members(
        &self,
        session: &Session,
        identifier: &str,
        change: MembershipChange,
    ) -> ArborResult<MembershipCounts> {
        self.require(session, Permission::ModifyOrganization).await?;
        self.organizations.set_members(identifier, change).await
    }

    pub async fn list_organizations(
        &self,
        session: &Session,
        filter: OrganizationFilter,
        pagination: Pagination,
    ) -> ArborResult<ListStream<Organization>> {
        self.require(session, Permission::ReadOrganization).await?;
        self.organizations.list(filter, pagination).await
    }

    pub async fn organization_children(
        &self,
        session: &Session,
        identifier: &str,
    ) -> ArborResult<ListStream<Organization>> {
        self.require(session, Permission::ReadOrganization).await?;
        self.organizations.children(identifier).await
    }

    pub async fn organization_members(
        &self,
        session: &Session,
        identifier: &str,
        pagination: Pagination,
    ) -> ArborResult<ListStream<User>> {
        self.require(session, Permission::ReadOrganization).await?;
        self.organizations.members(identifier, pagination).await
    }

    // -------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------

    pub async fn create_user(&self, session: &Session, input: &CreateUser) -> ArborResult<User> {
        self.require(session, Permission::CreateUser).await?;
        self.users.create(session.user_id, input).await
    }

    pub async fn get_user(&self, session: &Session, identifier: &str) -> ArborResult<User> {
        self.require(session, Permission::ReadUser).await?;
        self.users.get(identifier).await
    }

    pub async fn update_user(
        &self,
        session: &Session,
        before: &User,
        input: UpdateUser,
    ) -> ArborResult<User> {
        self.require(session, Permission::ModifyUser).await?;
        self.users.update(session.user_id, before, input).await
    }

    pub async fn delete_user(&self, session: &Session, identifier: &str) -> ArborResult<u64> {
        self.require(session, Permission::DeleteUser).await?;
        let user = self.users.get(identifier).await?;
        let deleted = self.users.delete(session.user_id, identifier).await?;
        self.authorizer.cache().invalidate(user.id);
        Ok(deleted)
    }

    /// Reconciles the user's roles, then drops their cached permissions.
    pub async fn set_user_roles(
        &self,
        session: &Session,
        identifier: &str,
        change: MembershipChange,
    ) -> ArborResult<MembershipCounts> {
        self.require(session, Permission::ModifyUser).await?;
        let user = self.users.get(identifier).await?;
        let counts = self.users.set_roles(&user.id.to_string(), change).await?;
        self.authorizer.cache().invalidate(user.id);
        Ok(counts)
    }

    pub async fn list_users(
        &self,
        session: &Session,
        filter: UserFilter,
        pagination: Pagination,
    ) -> ArborResult<ListStream<User>> {
        self.require(session, Permission::ReadUser).await?;
        self.users.list(filter, pagination).await
    }

    pub async fn user_memberships(
        &self,
        session: &Session,
        identifier: &str,
        pagination: Pagination,
    ) -> ArborResult<ListStream<Organization>> {
        self.require(session, Permission::ReadUser).await?;
        self.users.memberships(identifier, pagination).await
    }

    pub async fn user_roles(
        &self,
        session: &Session,
        identifier: &str,
        pagination: Pagination,
    ) -> ArborResult<ListStream<Role>> {
        self.require(session, Permission::ReadRole).await?;
        self.users.roles(identifier, pagination).await
    }

    // -------------------------------------------------------------------
    // Roles
    // -------------------------------------------------------------------

    pub async fn create_role(&self, session: &Session, input: &CreateRole) -> ArborResult<Role> {
        self.require(session, Permission::CreateRole).await?;
        self.roles.create(session.user_id, input).await
    }

    pub async fn get_role(&self, session: &Session, identifier: &str) -> ArborResult<Role> {
        self.require(session, Permission::ReadRole).await?;
        self.roles.get(identifier).await
    }

    /// Any holder of the role may be affected, so the whole cache goes.
    pub async fn update_role(
        &self,
        session: &Session,
        before: &Role,
        input: UpdateRole,
    ) -> ArborResult<Role> {
        self.require(session, Permission::ModifyRole).await?;
        let role = self.roles.update(session.user_id, before, input).await?;
        self.authorizer.cache().clear();
        Ok(role)
    }

    pub async fn delete_role(&self, session: &Session, identifier: &str) -> ArborResult<u64> {
        self.require(session, Permission::DeleteRole).await?;
        let deleted = self.roles.delete(session.user_id, identifier).await?;
        self.authorizer.cache().clear();
        Ok(deleted)
    }

    pub async fn list_roles(
        &self,
        session: &Session,
        filter: RoleFilter,
        pagination: Pagination,
    ) -> ArborResult<ListStream<Role>> {
        self.require(session, Permission::ReadRole).await?;
        self.roles.list(filter, pagination).await
    }

    // -------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------

    pub async fn list_events(
        &self,
        session: &Session,
        filter: AuditEventFilter,
        pagination: Pagination,
    ) -> ArborResult<PaginatedResult<AuditEvent>> {
        self.require(session, Permission::ReadEvent).await?;
        self.events.list(filter, pagination).await
    }
}
