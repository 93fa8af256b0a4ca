use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bizgate_auth::{
    CreateOrganization, CreatePermission, CreatePermissionGroup, CreateRole, CreateUser,
    Organization, Permission, PermissionGroup, PermissionName, Role, UpdateOrganization,
    UpdatePermission, UpdatePermissionGroup, UpdateRole, UpdateUser, User,
};
use bizgate_core::{
    DomainError, Entity, OrganizationId, PermissionGroupId, PermissionId, RoleId, UserId,
};

/// Identity store / assignment error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Backing store could not be reached. Retrying is left to the caller.
    #[error("identity store unavailable: {0}")]
    StoreUnavailable(String),
}

impl IdentityError {
    pub fn not_found<E: Entity>(id: E::Id) -> Self {
        Self::NotFound {
            entity: E::KIND,
            id: id.to_string(),
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

impl From<DomainError> for IdentityError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// A User-Role-in-Organization row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub role_id: RoleId,
}

/// Persisted identity model: entities, associations and their cascades.
///
/// Single-entity writes are atomic on their own (a parent delete removes its
/// dependent association rows in the same unit). Multi-row replacements go
/// through [`IdentityStore::begin`].
#[async_trait]
pub trait IdentityStore: Send + Sync {
    type Tx: IdentityTransaction;

    /// Open a write transaction. Dropping it without `commit` discards it.
    async fn begin(&self) -> IdentityResult<Self::Tx>;

    // Users
    async fn create_user(&self, input: CreateUser) -> IdentityResult<User>;
    async fn get_user(&self, id: UserId) -> IdentityResult<User>;
    async fn get_user_by_email(&self, email: &str) -> IdentityResult<Option<User>>;
    async fn list_users(&self) -> IdentityResult<Vec<User>>;
    async fn update_user(&self, id: UserId, patch: UpdateUser) -> IdentityResult<User>;
    async fn delete_user(&self, id: UserId) -> IdentityResult<()>;

    // Organizations
    async fn create_organization(&self, input: CreateOrganization) -> IdentityResult<Organization>;
    async fn get_organization(&self, id: OrganizationId) -> IdentityResult<Organization>;
    async fn list_organizations(&self) -> IdentityResult<Vec<Organization>>;
    async fn update_organization(
        &self,
        id: OrganizationId,
        patch: UpdateOrganization,
    ) -> IdentityResult<Organization>;
    async fn delete_organization(&self, id: OrganizationId) -> IdentityResult<()>;

    // Roles
    async fn create_role(&self, input: CreateRole) -> IdentityResult<Role>;
    async fn get_role(&self, id: RoleId) -> IdentityResult<Role>;
    async fn list_roles(&self) -> IdentityResult<Vec<Role>>;
    async fn update_role(&self, id: RoleId, patch: UpdateRole) -> IdentityResult<Role>;
    async fn delete_role(&self, id: RoleId) -> IdentityResult<()>;

    // Permissions
    async fn create_permission(&self, input: CreatePermission) -> IdentityResult<Permission>;
    async fn get_permission(&self, id: PermissionId) -> IdentityResult<Permission>;
    async fn list_permissions(&self) -> IdentityResult<Vec<Permission>>;
    async fn update_permission(
        &self,
        id: PermissionId,
        patch: UpdatePermission,
    ) -> IdentityResult<Permission>;
    async fn delete_permission(&self, id: PermissionId) -> IdentityResult<()>;

    // Permission groups
    async fn create_permission_group(
        &self,
        input: CreatePermissionGroup,
    ) -> IdentityResult<PermissionGroup>;
    async fn get_permission_group(&self, id: PermissionGroupId) -> IdentityResult<PermissionGroup>;
    async fn list_permission_groups(&self) -> IdentityResult<Vec<PermissionGroup>>;
    async fn update_permission_group(
        &self,
        id: PermissionGroupId,
        patch: UpdatePermissionGroup,
    ) -> IdentityResult<PermissionGroup>;
    async fn delete_permission_group(&self, id: PermissionGroupId) -> IdentityResult<()>;

    // Associations (read side)

    /// Organizations the user is a member of, ordered by name.
    async fn list_user_organizations(&self, user_id: UserId) -> IdentityResult<Vec<Organization>>;

    /// Permissions attached to a role, ordered by name.
    async fn list_role_permissions(&self, role_id: RoleId) -> IdentityResult<Vec<Permission>>;

    /// Grants held by the user, optionally restricted to one organization.
    async fn list_user_grants(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> IdentityResult<Vec<Grant>>;

    /// Roles for the given ids. Unknown ids are skipped.
    async fn get_roles(&self, ids: &[RoleId]) -> IdentityResult<Vec<Role>>;

    /// Distinct permission names reachable from the given roles.
    async fn permission_names_for_roles(&self, ids: &[RoleId])
    -> IdentityResult<Vec<PermissionName>>;
}

/// Primitive association writes inside one atomic unit.
///
/// Nothing is visible to readers until [`IdentityTransaction::commit`].
#[async_trait]
pub trait IdentityTransaction: Send {
    /// Serialize against other writers for this user. `NotFound` if missing.
    async fn lock_user(&mut self, id: UserId) -> IdentityResult<()>;

    /// Serialize against other writers for this role. `NotFound` if missing.
    async fn lock_role(&mut self, id: RoleId) -> IdentityResult<()>;

    async fn ensure_organization(&mut self, id: OrganizationId) -> IdentityResult<()>;
    async fn ensure_role(&mut self, id: RoleId) -> IdentityResult<()>;
    async fn ensure_permission(&mut self, id: PermissionId) -> IdentityResult<()>;

    async fn is_member(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<bool>;

    async fn clear_role_permissions(&mut self, role_id: RoleId) -> IdentityResult<u64>;
    async fn insert_role_permission(
        &mut self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> IdentityResult<()>;

    /// Drop the user's memberships except those in `keep`, along with the
    /// grants in the dropped organizations.
    async fn clear_user_organizations_outside(
        &mut self,
        user_id: UserId,
        keep: &[OrganizationId],
    ) -> IdentityResult<u64>;
    async fn insert_user_organization(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<()>;

    /// Remove the user's grants in one organization.
    async fn clear_user_grants(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<u64>;

    /// Remove the user's grants in every organization not listed in `keep`.
    async fn clear_user_grants_outside(
        &mut self,
        user_id: UserId,
        keep: &[OrganizationId],
    ) -> IdentityResult<u64>;

    async fn insert_grant(&mut self, grant: Grant) -> IdentityResult<()>;

    async fn commit(self) -> IdentityResult<()>;
    async fn rollback(self) -> IdentityResult<()>;
}

#[async_trait]
impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> IdentityResult<Self::Tx> {
        (**self).begin().await
    }

    async fn create_user(&self, input: CreateUser) -> IdentityResult<User> {
        (**self).create_user(input).await
    }

    async fn get_user(&self, id: UserId) -> IdentityResult<User> {
        (**self).get_user(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        (**self).get_user_by_email(email).await
    }

    async fn list_users(&self) -> IdentityResult<Vec<User>> {
        (**self).list_users().await
    }

    async fn update_user(&self, id: UserId, patch: UpdateUser) -> IdentityResult<User> {
        (**self).update_user(id, patch).await
    }

    async fn delete_user(&self, id: UserId) -> IdentityResult<()> {
        (**self).delete_user(id).await
    }

    async fn create_organization(&self, input: CreateOrganization) -> IdentityResult<Organization> {
        (**self).create_organization(input).await
    }

    async fn get_organization(&self, id: OrganizationId) -> IdentityResult<Organization> {
        (**self).get_organization(id).await
    }

    async fn list_organizations(&self) -> IdentityResult<Vec<Organization>> {
        (**self).list_organizations().await
    }

    async fn update_organization(&self, id: OrganizationId, patch: UpdateOrganization) -> IdentityResult<Organization> {
        (**self).update_organization(id, patch).await
    }

    async fn delete_organization(&self, id: OrganizationId) -> IdentityResult<()> {
        (**self).delete_organization(id).await
    }

    async fn create_role(&self, input: CreateRole) -> IdentityResult<Role> {
        (**self).create_role(input).await
    }

    async fn get_role(&self, id: RoleId) -> IdentityResult<Role> {
        (**self).get_role(id).await
    }

    async fn list_roles(&self) -> IdentityResult<Vec<Role>> {
        (**self).list_roles().await
    }

    async fn update_role(&self, id: RoleId, patch: UpdateRole) -> IdentityResult<Role> {
        (**self).update_role(id, patch).await
    }

    async fn delete_role(&self, id: RoleId) -> IdentityResult<()> {
        (**self).delete_role(id).await
    }

    async fn create_permission(&self, input: CreatePermission) -> IdentityResult<Permission> {
        (**self).create_permission(input).await
    }

    async fn get_permission(&self, id: PermissionId) -> IdentityResult<Permission> {
        (**self).get_permission(id).await
    }

    async fn list_permissions(&self) -> IdentityResult<Vec<Permission>> {
        (**self).list_permissions().await
    }

    async fn update_permission(&self, id: PermissionId, patch: UpdatePermission) -> IdentityResult<Permission> {
        (**self).update_permission(id, patch).await
    }

    async fn delete_permission(&self, id: PermissionId) -> IdentityResult<()> {
        (**self).delete_permission(id).await
    }

    async fn create_permission_group(&self, input: CreatePermissionGroup) -> IdentityResult<PermissionGroup> {
        (**self).create_permission_group(input).await
    }

    async fn get_permission_group(&self, id: PermissionGroupId) -> IdentityResult<PermissionGroup> {
        (**self).get_permission_group(id).await
    }

    async fn list_permission_groups(&self) -> IdentityResult<Vec<PermissionGroup>> {
        (**self).list_permission_groups().await
    }

    async fn update_permission_group(&self, id: PermissionGroupId, patch: UpdatePermissionGroup) -> IdentityResult<PermissionGroup> {
        (**self).update_permission_group(id, patch).await
    }

    async fn delete_permission_group(&self, id: PermissionGroupId) -> IdentityResult<()> {
        (**self).delete_permission_group(id).await
    }

    async fn list_user_organizations(&self, user_id: UserId) -> IdentityResult<Vec<Organization>> {
        (**self).list_user_organizations(user_id).await
    }

    async fn list_role_permissions(&self, role_id: RoleId) -> IdentityResult<Vec<Permission>> {
        (**self).list_role_permissions(role_id).await
    }

    async fn list_user_grants(&self, user_id: UserId, organization_id: Option<OrganizationId>) -> IdentityResult<Vec<Grant>> {
        (**self).list_user_grants(user_id, organization_id).await
    }

    async fn get_roles(&self, ids: &[RoleId]) -> IdentityResult<Vec<Role>> {
        (**self).get_roles(ids).await
    }

    async fn permission_names_for_roles(&self, ids: &[RoleId]) -> IdentityResult<Vec<PermissionName>> {
        (**self).permission_names_for_roles(ids).await
    }
}
