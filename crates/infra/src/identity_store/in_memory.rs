//! In-memory identity store for tests/dev.
//!
//! Readers see the last committed snapshot (`Arc<IdentityState>`); writers
//! serialize on a single async mutex, mutate a private copy and publish it on
//! commit. Not optimized for large data sets: every write clones the state.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use bizgate_auth::{
    CreateOrganization, CreatePermission, CreatePermissionGroup, CreateRole, CreateUser,
    Organization, Permission, PermissionGroup, PermissionName, Role, UpdateOrganization,
    UpdatePermission, UpdatePermissionGroup, UpdateRole, UpdateUser, User,
};
use bizgate_core::{
    Entity, OrganizationId, PermissionGroupId, PermissionId, RoleId, UserId,
};

use super::r#trait::{Grant, IdentityError, IdentityResult, IdentityStore, IdentityTransaction};

#[derive(Debug, Clone)]
struct Table<E: Entity> {
    rows: HashMap<E::Id, E>,
}

impl<E: Entity> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }
}

impl<E: Entity + Clone> Table<E> {
    fn get(&self, id: E::Id) -> IdentityResult<&E> {
        self.rows.get(&id).ok_or_else(|| IdentityError::not_found::<E>(id))
    }

    fn get_mut(&mut self, id: E::Id) -> IdentityResult<&mut E> {
        self.rows
            .get_mut(&id)
            .ok_or_else(|| IdentityError::not_found::<E>(id))
    }

    fn ensure(&self, id: E::Id) -> IdentityResult<()> {
        self.get(id).map(|_| ())
    }

    fn insert(&mut self, entity: E) -> E {
        self.rows.insert(entity.id(), entity.clone());
        entity
    }

    fn remove(&mut self, id: E::Id) -> IdentityResult<E> {
        self.rows
            .remove(&id)
            .ok_or_else(|| IdentityError::not_found::<E>(id))
    }

    /// True if another row (not `except`) matches `pred`.
    fn any_other(&self, except: Option<E::Id>, pred: impl Fn(&E) -> bool) -> bool {
        self.rows
            .values()
            .any(|e| Some(e.id()) != except && pred(e))
    }

    fn sorted_by<K: Ord>(&self, key: impl Fn(&E) -> K) -> Vec<E> {
        let mut out: Vec<E> = self.rows.values().cloned().collect();
        out.sort_by_key(|e| key(e));
        out
    }
}

#[derive(Debug, Clone, Default)]
struct IdentityState {
    users: Table<User>,
    organizations: Table<Organization>,
    roles: Table<Role>,
    permissions: Table<Permission>,
    permission_groups: Table<PermissionGroup>,

    memberships: BTreeSet<(UserId, OrganizationId)>,
    grants: BTreeSet<Grant>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
}

fn retain_counted<T: Ord>(set: &mut BTreeSet<T>, keep: impl Fn(&T) -> bool) -> u64 {
    let before = set.len();
    set.retain(|row| keep(row));
    (before - set.len()) as u64
}

impl IdentityState {
    fn ensure_unique_email(&self, email: &str, except: Option<UserId>) -> IdentityResult<()> {
        if self.users.any_other(except, |u| u.email == email) {
            return Err(IdentityError::conflict(format!("email '{email}' is already registered")));
        }
        Ok(())
    }

    fn ensure_unique_organization(&self, name: &str, except: Option<OrganizationId>) -> IdentityResult<()> {
        if self.organizations.any_other(except, |o| o.name == name) {
            return Err(IdentityError::conflict(format!("organization '{name}' already exists")));
        }
        Ok(())
    }

    fn ensure_unique_role(&self, name: &str, except: Option<RoleId>) -> IdentityResult<()> {
        if self.roles.any_other(except, |r| r.name == name) {
            return Err(IdentityError::conflict(format!("role '{name}' already exists")));
        }
        Ok(())
    }

    fn ensure_unique_permission(&self, name: &str, except: Option<PermissionId>) -> IdentityResult<()> {
        if self.permissions.any_other(except, |p| p.name.as_str() == name) {
            return Err(IdentityError::conflict(format!("permission '{name}' already exists")));
        }
        Ok(())
    }

    fn ensure_unique_group(&self, name: &str, except: Option<PermissionGroupId>) -> IdentityResult<()> {
        if self.permission_groups.any_other(except, |g| g.name == name) {
            return Err(IdentityError::conflict(format!("permission group '{name}' already exists")));
        }
        Ok(())
    }

    fn ensure_group_ref(&self, group_id: Option<PermissionGroupId>) -> IdentityResult<()> {
        match group_id {
            Some(id) => self.permission_groups.ensure(id),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<Arc<IdentityState>>,
    writer: Arc<Mutex<()>>,
}

impl Shared {
    fn snapshot(&self) -> IdentityResult<Arc<IdentityState>> {
        self.state
            .read()
            .map(|s| Arc::clone(&s))
            .map_err(|_| IdentityError::StoreUnavailable("identity state lock poisoned".into()))
    }

    fn publish(&self, state: IdentityState) -> IdentityResult<()> {
        let mut slot = self
            .state
            .write()
            .map_err(|_| IdentityError::StoreUnavailable("identity state lock poisoned".into()))?;
        *slot = Arc::new(state);
        Ok(())
    }
}

/// In-memory identity store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    shared: Arc<Shared>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(&self) -> IdentityResult<InMemoryTransaction> {
        let guard = Arc::clone(&self.shared.writer).lock_owned().await;
        let snapshot = self.shared.snapshot()?;
        let working = IdentityState::clone(&snapshot);

        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            working,
            _guard: guard,
        })
    }

    /// Run a single-entity write as its own transaction.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut IdentityState) -> IdentityResult<T> + Send,
    ) -> IdentityResult<T> {
        let mut tx = self.open().await?;
        let out = f(&mut tx.working)?;
        tx.shared.publish(tx.working)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&IdentityState) -> IdentityResult<T>) -> IdentityResult<T> {
        let snapshot = self.shared.snapshot()?;
        f(&snapshot)
    }
}

/// Write transaction over a private copy of the state.
///
/// Holds the writer lock until committed or dropped.
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    working: IdentityState,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl IdentityTransaction for InMemoryTransaction {
    async fn lock_user(&mut self, id: UserId) -> IdentityResult<()> {
        self.working.users.ensure(id)
    }

    async fn lock_role(&mut self, id: RoleId) -> IdentityResult<()> {
        self.working.roles.ensure(id)
    }

    async fn ensure_organization(&mut self, id: OrganizationId) -> IdentityResult<()> {
        self.working.organizations.ensure(id)
    }

    async fn ensure_role(&mut self, id: RoleId) -> IdentityResult<()> {
        self.working.roles.ensure(id)
    }

    async fn ensure_permission(&mut self, id: PermissionId) -> IdentityResult<()> {
        self.working.permissions.ensure(id)
    }

    async fn is_member(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<bool> {
        Ok(self.working.memberships.contains(&(user_id, organization_id)))
    }

    async fn clear_role_permissions(&mut self, role_id: RoleId) -> IdentityResult<u64> {
        Ok(retain_counted(&mut self.working.role_permissions, |(r, _)| *r != role_id))
    }

    async fn insert_role_permission(
        &mut self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> IdentityResult<()> {
        self.working.roles.ensure(role_id)?;
        self.working.permissions.ensure(permission_id)?;
        self.working.role_permissions.insert((role_id, permission_id));
        Ok(())
    }

    async fn clear_user_organizations_outside(
        &mut self,
        user_id: UserId,
        keep: &[OrganizationId],
    ) -> IdentityResult<u64> {
        // Same cascade as the membership FK on the grants table.
        retain_counted(&mut self.working.grants, |g| {
            g.user_id != user_id || keep.contains(&g.organization_id)
        });
        Ok(retain_counted(&mut self.working.memberships, |(u, o)| {
            *u != user_id || keep.contains(o)
        }))
    }

    async fn insert_user_organization(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<()> {
        self.working.users.ensure(user_id)?;
        self.working.organizations.ensure(organization_id)?;
        self.working.memberships.insert((user_id, organization_id));
        Ok(())
    }

    async fn clear_user_grants(
        &mut self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> IdentityResult<u64> {
        Ok(retain_counted(&mut self.working.grants, |g| {
            !(g.user_id == user_id && g.organization_id == organization_id)
        }))
    }

    async fn clear_user_grants_outside(
        &mut self,
        user_id: UserId,
        keep: &[OrganizationId],
    ) -> IdentityResult<u64> {
        Ok(retain_counted(&mut self.working.grants, |g| {
            g.user_id != user_id || keep.contains(&g.organization_id)
        }))
    }

    async fn insert_grant(&mut self, grant: Grant) -> IdentityResult<()> {
        self.working.roles.ensure(grant.role_id)?;
        if !self
            .working
            .memberships
            .contains(&(grant.user_id, grant.organization_id))
        {
            return Err(IdentityError::integrity(format!(
                "user {} is not a member of organization {}",
                grant.user_id, grant.organization_id
            )));
        }
        self.working.grants.insert(grant);
        Ok(())
    }

    async fn commit(self) -> IdentityResult<()> {
        self.shared.publish(self.working)
    }

    async fn rollback(self) -> IdentityResult<()> {
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> IdentityResult<Self::Tx> {
        self.open().await
    }

    async fn create_user(&self, input: CreateUser) -> IdentityResult<User> {
        let input = input.normalized()?;
        self.mutate(move |state| {
            state.ensure_unique_email(&input.email, None)?;
            Ok(state.users.insert(User {
                id: UserId::new(),
                display_name: input.display_name,
                email: input.email,
                credential_hash: input.credential_hash,
            }))
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> IdentityResult<User> {
        self.read(|state| state.users.get(id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        let email = email.trim().to_lowercase();
        self.read(|state| {
            Ok(state.users.rows.values().find(|u| u.email == email).cloned())
        })
    }

    async fn list_users(&self) -> IdentityResult<Vec<User>> {
        self.read(|state| Ok(state.users.sorted_by(|u| u.email.clone())))
    }

    async fn update_user(&self, id: UserId, patch: UpdateUser) -> IdentityResult<User> {
        let patch = patch.normalized()?;
        self.mutate(move |state| {
            if let Some(email) = &patch.email {
                state.ensure_unique_email(email, Some(id))?;
            }
            let user = state.users.get_mut(id)?;
            patch.apply_to(user);
            Ok(user.clone())
        })
        .await
    }

    async fn delete_user(&self, id: UserId) -> IdentityResult<()> {
        self.mutate(move |state| {
            state.users.remove(id)?;
            retain_counted(&mut state.memberships, |(u, _)| *u != id);
            retain_counted(&mut state.grants, |g| g.user_id != id);
            Ok(())
        })
        .await
    }

    async fn create_organization(&self, input: CreateOrganization) -> IdentityResult<Organization> {
        input.validate()?;
        self.mutate(move |state| {
            let name = input.name.trim().to_string();
            state.ensure_unique_organization(&name, None)?;
            Ok(state.organizations.insert(Organization {
                id: OrganizationId::new(),
                name,
                description: input.description,
            }))
        })
        .await
    }

    async fn get_organization(&self, id: OrganizationId) -> IdentityResult<Organization> {
        self.read(|state| state.organizations.get(id).cloned())
    }

    async fn list_organizations(&self) -> IdentityResult<Vec<Organization>> {
        self.read(|state| Ok(state.organizations.sorted_by(|o| o.name.clone())))
    }

    async fn update_organization(
        &self,
        id: OrganizationId,
        patch: UpdateOrganization,
    ) -> IdentityResult<Organization> {
        patch.validate()?;
        self.mutate(move |state| {
            if let Some(name) = &patch.name {
                state.ensure_unique_organization(name.trim(), Some(id))?;
            }
            let organization = state.organizations.get_mut(id)?;
            patch.apply_to(organization);
            Ok(organization.clone())
        })
        .await
    }

    async fn delete_organization(&self, id: OrganizationId) -> IdentityResult<()> {
        self.mutate(move |state| {
            state.organizations.remove(id)?;
            retain_counted(&mut state.memberships, |(_, o)| *o != id);
            retain_counted(&mut state.grants, |g| g.organization_id != id);
            Ok(())
        })
        .await
    }

    async fn create_role(&self, input: CreateRole) -> IdentityResult<Role> {
        input.validate()?;
        self.mutate(move |state| {
            let name = input.name.trim().to_string();
            state.ensure_unique_role(&name, None)?;
            Ok(state.roles.insert(Role {
                id: RoleId::new(),
                name,
                description: input.description,
            }))
        })
        .await
    }

    async fn get_role(&self, id: RoleId) -> IdentityResult<Role> {
        self.read(|state| state.roles.get(id).cloned())
    }

    async fn list_roles(&self) -> IdentityResult<Vec<Role>> {
        self.read(|state| Ok(state.roles.sorted_by(|r| r.name.clone())))
    }

    async fn update_role(&self, id: RoleId, patch: UpdateRole) -> IdentityResult<Role> {
        patch.validate()?;
        self.mutate(move |state| {
            if let Some(name) = &patch.name {
                state.ensure_unique_role(name.trim(), Some(id))?;
            }
            let role = state.roles.get_mut(id)?;
            patch.apply_to(role);
            Ok(role.clone())
        })
        .await
    }

    async fn delete_role(&self, id: RoleId) -> IdentityResult<()> {
        self.mutate(move |state| {
            state.roles.remove(id)?;
            retain_counted(&mut state.role_permissions, |(r, _)| *r != id);
            retain_counted(&mut state.grants, |g| g.role_id != id);
            Ok(())
        })
        .await
    }

    async fn create_permission(&self, input: CreatePermission) -> IdentityResult<Permission> {
        input.validate()?;
        self.mutate(move |state| {
            let name = input.name.trim().to_string();
            state.ensure_unique_permission(&name, None)?;
            state.ensure_group_ref(input.group_id)?;
            Ok(state.permissions.insert(Permission {
                id: PermissionId::new(),
                name: PermissionName::from(name),
                description: input.description,
                group_id: input.group_id,
            }))
        })
        .await
    }

    async fn get_permission(&self, id: PermissionId) -> IdentityResult<Permission> {
        self.read(|state| state.permissions.get(id).cloned())
    }

    async fn list_permissions(&self) -> IdentityResult<Vec<Permission>> {
        self.read(|state| Ok(state.permissions.sorted_by(|p| p.name.clone())))
    }

    async fn update_permission(
        &self,
        id: PermissionId,
        patch: UpdatePermission,
    ) -> IdentityResult<Permission> {
        patch.validate()?;
        self.mutate(move |state| {
            if let Some(name) = &patch.name {
                state.ensure_unique_permission(name.trim(), Some(id))?;
            }
            if let Some(group_id) = patch.group_id {
                state.ensure_group_ref(group_id)?;
            }
            let permission = state.permissions.get_mut(id)?;
            patch.apply_to(permission);
            Ok(permission.clone())
        })
        .await
    }

    async fn delete_permission(&self, id: PermissionId) -> IdentityResult<()> {
        self.mutate(move |state| {
            state.permissions.remove(id)?;
            retain_counted(&mut state.role_permissions, |(_, p)| *p != id);
            Ok(())
        })
        .await
    }

    async fn create_permission_group(
        &self,
        input: CreatePermissionGroup,
    ) -> IdentityResult<PermissionGroup> {
        input.validate()?;
        self.mutate(move |state| {
            let name = input.name.trim().to_string();
            state.ensure_unique_group(&name, None)?;
            Ok(state.permission_groups.insert(PermissionGroup {
                id: PermissionGroupId::new(),
                name,
                description: input.description,
            }))
        })
        .await
    }

    async fn get_permission_group(&self, id: PermissionGroupId) -> IdentityResult<PermissionGroup> {
        self.read(|state| state.permission_groups.get(id).cloned())
    }

    async fn list_permission_groups(&self) -> IdentityResult<Vec<PermissionGroup>> {
        self.read(|state| Ok(state.permission_groups.sorted_by(|g| g.name.clone())))
    }

    async fn update_permission_group(
        &self,
        id: PermissionGroupId,
        patch: UpdatePermissionGroup,
    ) -> IdentityResult<PermissionGroup> {
        patch.validate()?;
        self.mutate(move |state| {
            if let Some(name) = &patch.name {
                state.ensure_unique_group(name.trim(), Some(id))?;
            }
            let group = state.permission_groups.get_mut(id)?;
            patch.apply_to(group);
            Ok(group.clone())
        })
        .await
    }

    async fn delete_permission_group(&self, id: PermissionGroupId) -> IdentityResult<()> {
        self.mutate(move |state| {
            state.permission_groups.remove(id)?;
            for permission in state.permissions.rows.values_mut() {
                if permission.group_id == Some(id) {
                    permission.group_id = None;
                }
            }
            Ok(())
        })
        .await
    }

    async fn list_user_organizations(&self, user_id: UserId) -> IdentityResult<Vec<Organization>> {
        self.read(|state| {
            state.users.ensure(user_id)?;
            let mut orgs: Vec<Organization> = state
                .memberships
                .iter()
                .filter(|(u, _)| *u == user_id)
                .filter_map(|(_, o)| state.organizations.rows.get(o).cloned())
                .collect();
            orgs.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(orgs)
        })
    }

    async fn list_role_permissions(&self, role_id: RoleId) -> IdentityResult<Vec<Permission>> {
        self.read(|state| {
            state.roles.ensure(role_id)?;
            let mut permissions: Vec<Permission> = state
                .role_permissions
                .iter()
                .filter(|(r, _)| *r == role_id)
                .filter_map(|(_, p)| state.permissions.rows.get(p).cloned())
                .collect();
            permissions.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(permissions)
        })
    }

    async fn list_user_grants(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> IdentityResult<Vec<Grant>> {
        self.read(|state| {
            Ok(state
                .grants
                .iter()
                .filter(|g| g.user_id == user_id)
                .filter(|g| organization_id.is_none_or(|o| g.organization_id == o))
                .copied()
                .collect())
        })
    }

    async fn get_roles(&self, ids: &[RoleId]) -> IdentityResult<Vec<Role>> {
        self.read(|state| {
            Ok(ids
                .iter()
                .filter_map(|id| state.roles.rows.get(id).cloned())
                .collect())
        })
    }

    async fn permission_names_for_roles(
        &self,
        ids: &[RoleId],
    ) -> IdentityResult<Vec<PermissionName>> {
        self.read(|state| {
            let names: BTreeSet<PermissionName> = state
                .role_permissions
                .iter()
                .filter(|(r, _)| ids.contains(r))
                .filter_map(|(_, p)| state.permissions.rows.get(p))
                .map(|p| p.name.clone())
                .collect();
            Ok(names.into_iter().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> CreateUser {
        CreateUser {
            display_name: "Jane".into(),
            email: email.into(),
            credential_hash: "$argon2id$fake".into(),
        }
    }

    fn new_role(name: &str) -> CreateRole {
        CreateRole {
            name: name.into(),
            description: String::new(),
        }
    }

    fn new_permission(name: &str) -> CreatePermission {
        CreatePermission {
            name: name.into(),
            description: String::new(),
            group_id: None,
        }
    }

    #[tokio::test]
    async fn user_crud_round_trip() {
        let store = InMemoryIdentityStore::new();
        let user = store.create_user(new_user("Jane@Example.com")).await.unwrap();
        assert_eq!(user.email, "jane@example.com");

        let by_email = store.get_user_by_email("JANE@example.com").await.unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(user.id));

        let updated = store
            .update_user(
                user.id,
                UpdateUser {
                    display_name: Some("Jane Doe".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Jane Doe");

        store.delete_user(user.id).await.unwrap();
        assert!(matches!(
            store.get_user(user.id).await,
            Err(IdentityError::NotFound { entity: "user", .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_case_insensitively() {
        let store = InMemoryIdentityStore::new();
        store.create_user(new_user("jane@example.com")).await.unwrap();

        let err = store.create_user(new_user("JANE@example.com")).await.unwrap_err();
        assert!(matches!(err, IdentityError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_role_name_conflicts_on_update() {
        let store = InMemoryIdentityStore::new();
        store.create_role(new_role("Editor")).await.unwrap();
        let viewer = store.create_role(new_role("Viewer")).await.unwrap();

        let err = store
            .update_role(
                viewer.id,
                UpdateRole {
                    name: Some("Editor".into()),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Conflict(_)));
    }

    #[tokio::test]
    async fn deleting_permission_group_nulls_references() {
        let store = InMemoryIdentityStore::new();
        let group = store
            .create_permission_group(CreatePermissionGroup {
                name: "Orders".into(),
                description: String::new(),
            })
            .await
            .unwrap();
        let permission = store
            .create_permission(CreatePermission {
                group_id: Some(group.id),
                ..new_permission("ORDER_READ")
            })
            .await
            .unwrap();

        store.delete_permission_group(group.id).await.unwrap();

        let reloaded = store.get_permission(permission.id).await.unwrap();
        assert_eq!(reloaded.group_id, None);
    }

    #[tokio::test]
    async fn permission_with_unknown_group_is_not_found() {
        let store = InMemoryIdentityStore::new();
        let err = store
            .create_permission(CreatePermission {
                group_id: Some(PermissionGroupId::new()),
                ..new_permission("ORDER_READ")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound { entity: "permission_group", .. }));
    }

    #[tokio::test]
    async fn deleting_permission_removes_role_links() {
        let store = InMemoryIdentityStore::new();
        let role = store.create_role(new_role("Editor")).await.unwrap();
        let read = store.create_permission(new_permission("ORDER_READ")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_role_permission(role.id, read.id).await.unwrap();
        tx.commit().await.unwrap();

        store.delete_permission(read.id).await.unwrap();
        assert!(store.list_role_permissions(role.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = InMemoryIdentityStore::new();
        let user = store.create_user(new_user("jane@example.com")).await.unwrap();
        let org = store
            .create_organization(CreateOrganization {
                name: "Acme".into(),
                description: String::new(),
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_user_organization(user.id, org.id).await.unwrap();
        assert!(store.list_user_organizations(user.id).await.unwrap().is_empty());

        tx.rollback().await.unwrap();
        assert!(store.list_user_organizations(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grant_requires_membership() {
        let store = InMemoryIdentityStore::new();
        let user = store.create_user(new_user("jane@example.com")).await.unwrap();
        let role = store.create_role(new_role("Editor")).await.unwrap();
        let org = store
            .create_organization(CreateOrganization {
                name: "Acme".into(),
                description: String::new(),
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_grant(Grant {
                user_id: user.id,
                organization_id: org.id,
                role_id: role.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::IntegrityViolation(_)));
    }
}
