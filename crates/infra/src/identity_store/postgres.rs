//! Postgres-backed identity store.
//!
//! Cascades are declared in the schema (`ON DELETE CASCADE` for association
//! rows, `ON DELETE SET NULL` for the permission group reference), so a parent
//! delete is a single statement and atomic with its dependents.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | IdentityError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check constraint violation) | `23514` | `Validation` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `StoreUnavailable` |
//! | Other | Any other | `StoreUnavailable` |
//!
//! ## Locking
//!
//! Assignment transactions take `SELECT ... FOR UPDATE` on the owner row
//! (user or role), so concurrent replacements for one owner serialize and the
//! last committed one wins.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use bizgate_auth::{
    CreateOrganization, CreatePermission, CreatePermissionGroup, CreateRole, CreateUser,
    Organization, Permission, PermissionGroup, PermissionName, Role, UpdateOrganization,
    UpdatePermission, UpdatePermissionGroup, UpdateRole, UpdateUser, User,
};
use bizgate_core::{Entity, OrganizationId, PermissionGroupId, PermissionId, RoleId, UserId};

use super::r#trait::{Grant, IdentityError, IdentityResult, IdentityStore, IdentityTransaction};

const MIGRATION_0001: &str = include_str!("../../migrations/0001_identity.sql");

/// Postgres-backed identity store.
#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> IdentityResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the identity schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> IdentityResult<()> {
        sqlx::raw_sql(MIGRATION_0001)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_by_id<E: DecodeRow + Entity>(
        &self,
        operation: &str,
        sql: &'static str,
        id: E::Id,
        uuid: &Uuid,
    ) -> IdentityResult<E> {
        let row = sqlx::query(sql)
            .bind(uuid)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .ok_or_else(|| IdentityError::not_found::<E>(id))?;
        decode_one(operation, &row)
    }

    async fn fetch_all<E: DecodeRow>(&self, operation: &str, sql: &'static str) -> IdentityResult<Vec<E>> {
        let rows = sqlx::query(sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        decode_all(operation, &rows)
    }

    async fn delete_by_id<E: Entity>(&self, operation: &str, sql: &'static str, id: E::Id, uuid: &Uuid) -> IdentityResult<()> {
        let result = sqlx::query(sql)
            .bind(uuid)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::not_found::<E>(id));
        }
        Ok(())
    }

    async fn begin_tx(&self, operation: &str) -> IdentityResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

/// Write transaction on one pooled connection. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn ensure(
        &mut self,
        operation: &str,
        sql: &'static str,
        uuid: &Uuid,
        missing: impl FnOnce() -> IdentityError + Send,
    ) -> IdentityResult<()> {
        let row = sqlx::query(sql)
            .bind(uuid)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        match row {
            Some(_) => Ok(()),
            None => Err(missing()),
        }
    }

    async fn execute(&mut self, operation: &str, query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>) -> IdentityResult<u64> {
        query
            .execute(&mut *self.tx)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl IdentityTransaction for PostgresTransaction {
    async fn lock_user(&mut self, id: UserId) -> IdentityResult<()> {
        self.ensure(
            "lock_user",
            "SELECT id FROM users WHERE id = $1 FOR UPDATE",
            id.as_uuid(),
            || IdentityError::not_found::<User>(id),
        )
        .await
    }

    async fn lock_role(&mut self, id: RoleId) -> IdentityResult<()> {
        self.ensure(
            "lock_role",
            "SELECT id FROM roles WHERE id = $1 FOR UPDATE",
            id.as_uuid(),
            || IdentityError::not_found::<Role>(id),
        )
        .await
    }

    async fn ensure_organization(&mut self, id: OrganizationId) -> IdentityResult<()> {
        self.ensure(
            "ensure_organization",
            "SELECT id FROM organizations WHERE id = $1 FOR KEY SHARE",
            id.as_uuid(),
            || IdentityError::not_found::<Organization>(id),
        )
        .await
    }

    async fn ensure_role(&mut self, id: RoleId) -> IdentityResult<()> {
        self.ensure(
            "ensure_role",
            "SELECT id FROM roles WHERE id = $1 FOR KEY SHARE",
            id.as_uuid(),
            || IdentityError::not_found::<Role>(id),
        )
        .await
    }

    async fn ensure_permission(&mut self, id: PermissionId) -> IdentityResult<()> {
        self.ensure(
            "ensure_permission",
            "SELECT id FROM permissions WHERE id = $1 FOR KEY SHARE",
            id.as_uuid(),
            || IdentityError::not_found::<Permission>(id),
        )
        .await
    }

    async fn is_member(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM user_organizations WHERE user_id = $1 AND organization_id = $2",
        )
        .bind(user_id.as_uuid())
        .bind(organization_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("is_member", e))?;
        Ok(row.is_some())
    }

    async fn clear_role_permissions(&mut self, role_id: RoleId) -> IdentityResult<u64> {
        let query = sqlx::query("DELETE FROM role_permissions WHERE role_id = $1").bind(*role_id.as_uuid());
        self.execute("clear_role_permissions", query).await
    }

    async fn insert_role_permission(
        &mut self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> IdentityResult<()> {
        let query = sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(*role_id.as_uuid())
        .bind(*permission_id.as_uuid());
        self.execute("insert_role_permission", query).await.map(|_| ())
    }

    /// Kept rows are never deleted: the membership FK would cascade into
    /// their grants.
    async fn clear_user_organizations_outside(
        &mut self,
        user_id: UserId,
        keep: &[OrganizationId],
    ) -> IdentityResult<u64> {
        let keep: Vec<Uuid> = keep.iter().map(|id| *id.as_uuid()).collect();
        let query = sqlx::query(
            "DELETE FROM user_organizations WHERE user_id = $1 AND NOT (organization_id = ANY($2))",
        )
        .bind(*user_id.as_uuid())
        .bind(keep);
        self.execute("clear_user_organizations_outside", query).await
    }

    async fn insert_user_organization(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<()> {
        let query = sqlx::query(
            "INSERT INTO user_organizations (user_id, organization_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(*user_id.as_uuid())
        .bind(*organization_id.as_uuid());
        self.execute("insert_user_organization", query).await.map(|_| ())
    }

    async fn clear_user_grants(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<u64> {
        let query = sqlx::query(
            "DELETE FROM user_organization_roles WHERE user_id = $1 AND organization_id = $2",
        )
        .bind(*user_id.as_uuid())
        .bind(*organization_id.as_uuid());
        self.execute("clear_user_grants", query).await
    }

    async fn clear_user_grants_outside(
        &mut self,
        user_id: UserId,
        keep: &[OrganizationId],
    ) -> IdentityResult<u64> {
        let keep: Vec<Uuid> = keep.iter().map(|id| *id.as_uuid()).collect();
        let query = sqlx::query(
            "DELETE FROM user_organization_roles WHERE user_id = $1 AND NOT (organization_id = ANY($2))",
        )
        .bind(*user_id.as_uuid())
        .bind(keep);
        self.execute("clear_user_grants_outside", query).await
    }

    async fn insert_grant(&mut self, grant: Grant) -> IdentityResult<()> {
        let query = sqlx::query(
            "INSERT INTO user_organization_roles (user_id, organization_id, role_id) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(*grant.user_id.as_uuid())
        .bind(*grant.organization_id.as_uuid())
        .bind(*grant.role_id.as_uuid());

        match self.execute("insert_grant", query).await {
            Ok(_) => Ok(()),
            // Membership FK: the user is not in that organization.
            Err(IdentityError::NotFound { .. }) => Err(IdentityError::integrity(format!(
                "user {} is not a member of organization {}",
                grant.user_id, grant.organization_id
            ))),
            Err(e) => Err(e),
        }
    }

    async fn commit(self) -> IdentityResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> IdentityResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> IdentityResult<Self::Tx> {
        Ok(PostgresTransaction {
            tx: self.begin_tx("begin").await?,
        })
    }

    #[instrument(skip(self, input), fields(email = %input.email), err)]
    async fn create_user(&self, input: CreateUser) -> IdentityResult<User> {
        let input = input.normalized()?;
        let user = User {
            id: UserId::new(),
            display_name: input.display_name,
            email: input.email,
            credential_hash: input.credential_hash,
        };

        sqlx::query(
            "INSERT INTO users (id, display_name, email, credential_hash) VALUES ($1, $2, $3, $4)",
        )
        .bind(user.id.as_uuid())
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(&user.credential_hash)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get_user(&self, id: UserId) -> IdentityResult<User> {
        self.fetch_by_id(
            "get_user",
            "SELECT id, display_name, email, credential_hash FROM users WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, email), err)]
    async fn get_user_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query(
            "SELECT id, display_name, email, credential_hash FROM users WHERE email = $1",
        )
        .bind(&email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user_by_email", e))?;

        row.as_ref()
            .map(|r| decode_one("get_user_by_email", r))
            .transpose()
    }

    async fn list_users(&self) -> IdentityResult<Vec<User>> {
        self.fetch_all(
            "list_users",
            "SELECT id, display_name, email, credential_hash FROM users ORDER BY email",
        )
        .await
    }

    #[instrument(skip(self, patch), fields(user_id = %id), err)]
    async fn update_user(&self, id: UserId, patch: UpdateUser) -> IdentityResult<User> {
        let patch = patch.normalized()?;
        let mut tx = self.begin_tx("update_user").await?;

        let row = sqlx::query(
            "SELECT id, display_name, email, credential_hash FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?
        .ok_or_else(|| IdentityError::not_found::<User>(id))?;
        let mut user: User = decode_one("update_user", &row)?;
        patch.apply_to(&mut user);

        sqlx::query(
            "UPDATE users SET display_name = $2, email = $3, credential_hash = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(&user.credential_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("update_user", e))?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&self, id: UserId) -> IdentityResult<()> {
        self.delete_by_id::<User>("delete_user", "DELETE FROM users WHERE id = $1", id, id.as_uuid())
            .await
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    async fn create_organization(&self, input: CreateOrganization) -> IdentityResult<Organization> {
        input.validate()?;
        let organization = Organization {
            id: OrganizationId::new(),
            name: input.name.trim().to_string(),
            description: input.description,
        };

        sqlx::query("INSERT INTO organizations (id, name, description) VALUES ($1, $2, $3)")
            .bind(organization.id.as_uuid())
            .bind(&organization.name)
            .bind(&organization.description)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_organization", e))?;

        Ok(organization)
    }

    async fn get_organization(&self, id: OrganizationId) -> IdentityResult<Organization> {
        self.fetch_by_id(
            "get_organization",
            "SELECT id, name, description FROM organizations WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    async fn list_organizations(&self) -> IdentityResult<Vec<Organization>> {
        self.fetch_all(
            "list_organizations",
            "SELECT id, name, description FROM organizations ORDER BY name",
        )
        .await
    }

    #[instrument(skip(self, patch), fields(organization_id = %id), err)]
    async fn update_organization(
        &self,
        id: OrganizationId,
        patch: UpdateOrganization,
    ) -> IdentityResult<Organization> {
        patch.validate()?;
        let mut tx = self.begin_tx("update_organization").await?;

        let row = sqlx::query("SELECT id, name, description FROM organizations WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_organization", e))?
            .ok_or_else(|| IdentityError::not_found::<Organization>(id))?;
        let mut organization: Organization = decode_one("update_organization", &row)?;
        patch.apply_to(&mut organization);

        sqlx::query("UPDATE organizations SET name = $2, description = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(&organization.name)
            .bind(&organization.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_organization", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_organization", e))?;
        Ok(organization)
    }

    #[instrument(skip(self), fields(organization_id = %id), err)]
    async fn delete_organization(&self, id: OrganizationId) -> IdentityResult<()> {
        self.delete_by_id::<Organization>(
            "delete_organization",
            "DELETE FROM organizations WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    async fn create_role(&self, input: CreateRole) -> IdentityResult<Role> {
        input.validate()?;
        let role = Role {
            id: RoleId::new(),
            name: input.name.trim().to_string(),
            description: input.description,
        };

        sqlx::query("INSERT INTO roles (id, name, description) VALUES ($1, $2, $3)")
            .bind(role.id.as_uuid())
            .bind(&role.name)
            .bind(&role.description)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_role", e))?;

        Ok(role)
    }

    async fn get_role(&self, id: RoleId) -> IdentityResult<Role> {
        self.fetch_by_id(
            "get_role",
            "SELECT id, name, description FROM roles WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    async fn list_roles(&self) -> IdentityResult<Vec<Role>> {
        self.fetch_all("list_roles", "SELECT id, name, description FROM roles ORDER BY name")
            .await
    }

    #[instrument(skip(self, patch), fields(role_id = %id), err)]
    async fn update_role(&self, id: RoleId, patch: UpdateRole) -> IdentityResult<Role> {
        patch.validate()?;
        let mut tx = self.begin_tx("update_role").await?;

        let row = sqlx::query("SELECT id, name, description FROM roles WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?
            .ok_or_else(|| IdentityError::not_found::<Role>(id))?;
        let mut role: Role = decode_one("update_role", &row)?;
        patch.apply_to(&mut role);

        sqlx::query("UPDATE roles SET name = $2, description = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(&role.name)
            .bind(&role.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("update_role", e))?;
        Ok(role)
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId) -> IdentityResult<()> {
        self.delete_by_id::<Role>("delete_role", "DELETE FROM roles WHERE id = $1", id, id.as_uuid())
            .await
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    async fn create_permission(&self, input: CreatePermission) -> IdentityResult<Permission> {
        input.validate()?;
        let permission = Permission {
            id: PermissionId::new(),
            name: PermissionName::from(input.name.trim()),
            description: input.description,
            group_id: input.group_id,
        };

        sqlx::query("INSERT INTO permissions (id, name, description, group_id) VALUES ($1, $2, $3, $4)")
            .bind(permission.id.as_uuid())
            .bind(permission.name.as_str())
            .bind(&permission.description)
            .bind(permission.group_id.map(Uuid::from))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_permission", e))?;

        Ok(permission)
    }

    async fn get_permission(&self, id: PermissionId) -> IdentityResult<Permission> {
        self.fetch_by_id(
            "get_permission",
            "SELECT id, name, description, group_id FROM permissions WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    async fn list_permissions(&self) -> IdentityResult<Vec<Permission>> {
        self.fetch_all(
            "list_permissions",
            "SELECT id, name, description, group_id FROM permissions ORDER BY name",
        )
        .await
    }

    #[instrument(skip(self, patch), fields(permission_id = %id), err)]
    async fn update_permission(
        &self,
        id: PermissionId,
        patch: UpdatePermission,
    ) -> IdentityResult<Permission> {
        patch.validate()?;
        let mut tx = self.begin_tx("update_permission").await?;

        let row = sqlx::query(
            "SELECT id, name, description, group_id FROM permissions WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_permission", e))?
        .ok_or_else(|| IdentityError::not_found::<Permission>(id))?;
        let mut permission: Permission = decode_one("update_permission", &row)?;
        patch.apply_to(&mut permission);

        sqlx::query("UPDATE permissions SET name = $2, description = $3, group_id = $4 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(permission.name.as_str())
            .bind(&permission.description)
            .bind(permission.group_id.map(Uuid::from))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_permission", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_permission", e))?;
        Ok(permission)
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    async fn delete_permission(&self, id: PermissionId) -> IdentityResult<()> {
        self.delete_by_id::<Permission>(
            "delete_permission",
            "DELETE FROM permissions WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    async fn create_permission_group(
        &self,
        input: CreatePermissionGroup,
    ) -> IdentityResult<PermissionGroup> {
        input.validate()?;
        let group = PermissionGroup {
            id: PermissionGroupId::new(),
            name: input.name.trim().to_string(),
            description: input.description,
        };

        sqlx::query("INSERT INTO permission_groups (id, name, description) VALUES ($1, $2, $3)")
            .bind(group.id.as_uuid())
            .bind(&group.name)
            .bind(&group.description)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_permission_group", e))?;

        Ok(group)
    }

    async fn get_permission_group(&self, id: PermissionGroupId) -> IdentityResult<PermissionGroup> {
        self.fetch_by_id(
            "get_permission_group",
            "SELECT id, name, description FROM permission_groups WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    async fn list_permission_groups(&self) -> IdentityResult<Vec<PermissionGroup>> {
        self.fetch_all(
            "list_permission_groups",
            "SELECT id, name, description FROM permission_groups ORDER BY name",
        )
        .await
    }

    #[instrument(skip(self, patch), fields(permission_group_id = %id), err)]
    async fn update_permission_group(
        &self,
        id: PermissionGroupId,
        patch: UpdatePermissionGroup,
    ) -> IdentityResult<PermissionGroup> {
        patch.validate()?;
        let mut tx = self.begin_tx("update_permission_group").await?;

        let row = sqlx::query(
            "SELECT id, name, description FROM permission_groups WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_permission_group", e))?
        .ok_or_else(|| IdentityError::not_found::<PermissionGroup>(id))?;
        let mut group: PermissionGroup = decode_one("update_permission_group", &row)?;
        patch.apply_to(&mut group);

        sqlx::query("UPDATE permission_groups SET name = $2, description = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(&group.name)
            .bind(&group.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_permission_group", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_permission_group", e))?;
        Ok(group)
    }

    #[instrument(skip(self), fields(permission_group_id = %id), err)]
    async fn delete_permission_group(&self, id: PermissionGroupId) -> IdentityResult<()> {
        self.delete_by_id::<PermissionGroup>(
            "delete_permission_group",
            "DELETE FROM permission_groups WHERE id = $1",
            id,
            id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_user_organizations(&self, user_id: UserId) -> IdentityResult<Vec<Organization>> {
        // Distinguish "no memberships" from "no such user".
        self.get_user(user_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT o.id, o.name, o.description
            FROM organizations o
            JOIN user_organizations uo ON uo.organization_id = o.id
            WHERE uo.user_id = $1
            ORDER BY o.name
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_user_organizations", e))?;

        decode_all("list_user_organizations", &rows)
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn list_role_permissions(&self, role_id: RoleId) -> IdentityResult<Vec<Permission>> {
        self.get_role(role_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT p.id, p.name, p.description, p.group_id
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(role_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_role_permissions", e))?;

        decode_all("list_role_permissions", &rows)
    }

    #[instrument(skip(self), fields(user_id = %user_id, grant_count = tracing::field::Empty), err)]
    async fn list_user_grants(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> IdentityResult<Vec<Grant>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, organization_id, role_id
            FROM user_organization_roles
            WHERE user_id = $1 AND ($2::uuid IS NULL OR organization_id = $2)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(organization_id.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_user_grants", e))?;

        let grants: Vec<Grant> = decode_all("list_user_grants", &rows)?;
        Span::current().record("grant_count", grants.len());
        Ok(grants)
    }

    async fn get_roles(&self, ids: &[RoleId]) -> IdentityResult<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let rows = sqlx::query("SELECT id, name, description FROM roles WHERE id = ANY($1) ORDER BY name")
            .bind(ids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_roles", e))?;

        decode_all("get_roles", &rows)
    }

    async fn permission_names_for_roles(
        &self,
        ids: &[RoleId],
    ) -> IdentityResult<Vec<PermissionName>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT p.name
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            ORDER BY p.name
            "#,
        )
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permission_names_for_roles", e))?;

        Ok(names.into_iter().map(PermissionName::from).collect())
    }
}

/// Map SQLx errors to IdentityError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> IdentityError {
    match err {
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") => {
                    IdentityError::Conflict(format!("{operation}: unique constraint {constraint} violated"))
                }
                Some("23503") => IdentityError::NotFound {
                    entity: "referenced row",
                    id: constraint,
                },
                Some("23514") => IdentityError::Validation(msg),
                _ => {
                    tracing::warn!(operation, error = %msg, "unexpected database error");
                    IdentityError::StoreUnavailable(msg)
                }
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            tracing::warn!(operation, error = %err, "identity store unreachable");
            IdentityError::StoreUnavailable(format!("{operation}: {err}"))
        }
        other => {
            tracing::warn!(operation, error = %other, "identity store error");
            IdentityError::StoreUnavailable(format!("sqlx error in {operation}: {other}"))
        }
    }
}

// Row decoding

trait DecodeRow: Sized {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error>;
}

fn decode_one<T: DecodeRow>(operation: &str, row: &PgRow) -> IdentityResult<T> {
    T::decode(row).map_err(|e| map_sqlx_error(operation, e))
}

fn decode_all<T: DecodeRow>(operation: &str, rows: &[PgRow]) -> IdentityResult<Vec<T>> {
    rows.iter().map(|row| decode_one(operation, row)).collect()
}

impl DecodeRow for User {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(User {
            id: UserId::from_uuid(row.try_get("id")?),
            display_name: row.try_get("display_name")?,
            email: row.try_get("email")?,
            credential_hash: row.try_get("credential_hash")?,
        })
    }
}

impl DecodeRow for Organization {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Organization {
            id: OrganizationId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }
}

impl DecodeRow for Role {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Role {
            id: RoleId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }
}

impl DecodeRow for Permission {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        let name: String = row.try_get("name")?;
        let group_id: Option<Uuid> = row.try_get("group_id")?;
        Ok(Permission {
            id: PermissionId::from_uuid(row.try_get("id")?),
            name: PermissionName::from(name),
            description: row.try_get("description")?,
            group_id: group_id.map(PermissionGroupId::from_uuid),
        })
    }
}

impl DecodeRow for PermissionGroup {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(PermissionGroup {
            id: PermissionGroupId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }
}

impl DecodeRow for Grant {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Grant {
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            organization_id: OrganizationId::from_uuid(row.try_get("organization_id")?),
            role_id: RoleId::from_uuid(row.try_get("role_id")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentEngine;

    /// Integration database; these tests are skipped when it is unset.
    fn test_database_url() -> Option<String> {
        std::env::var("BIZGATE_TEST_DATABASE_URL").ok().filter(|v| !v.is_empty())
    }

    async fn store() -> Option<PostgresIdentityStore> {
        let Some(url) = test_database_url() else {
            eprintln!("BIZGATE_TEST_DATABASE_URL not set; skipping postgres test");
            return None;
        };
        let store = PostgresIdentityStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        Some(store)
    }

    fn unique(name: &str) -> String {
        format!("{name}-{}", Uuid::now_v7())
    }

    #[tokio::test]
    async fn replacing_memberships_keeps_grants_in_kept_organizations() {
        let Some(store) = store().await else {
            return;
        };
        let engine = AssignmentEngine::new(store.clone());

        let user = store
            .create_user(CreateUser {
                display_name: "Jane".into(),
                email: format!("{}@example.com", unique("jane")),
                credential_hash: "$argon2id$fake".into(),
            })
            .await
            .unwrap();
        let acme = store
            .create_organization(CreateOrganization {
                name: unique("Acme"),
                description: String::new(),
            })
            .await
            .unwrap();
        let globex = store
            .create_organization(CreateOrganization {
                name: unique("Globex"),
                description: String::new(),
            })
            .await
            .unwrap();
        let editor = store
            .create_role(CreateRole {
                name: unique("Editor"),
                description: String::new(),
            })
            .await
            .unwrap();

        engine.set_user_organizations(user.id, &[acme.id]).await.unwrap();
        engine
            .set_user_roles_in_organization(user.id, acme.id, &[editor.id])
            .await
            .unwrap();

        engine
            .set_user_organizations(user.id, &[acme.id, globex.id])
            .await
            .unwrap();
        let grants = store.list_user_grants(user.id, Some(acme.id)).await.unwrap();
        assert_eq!(grants.iter().map(|g| g.role_id).collect::<Vec<_>>(), vec![editor.id]);

        engine.set_user_organizations(user.id, &[globex.id]).await.unwrap();
        assert!(store.list_user_grants(user.id, None).await.unwrap().is_empty());

        store.delete_user(user.id).await.unwrap();
        store.delete_role(editor.id).await.unwrap();
        store.delete_organization(acme.id).await.unwrap();
        store.delete_organization(globex.id).await.unwrap();
    }
}
