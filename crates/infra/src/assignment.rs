//! Assignment engine: replace-semantics writes on the association tables.
//!
//! Each operation runs in one store transaction: lock the owner, validate every
//! target, delete the owner's existing rows, insert the new set, commit. Any
//! failure rolls back and leaves the previous associations intact.

use std::collections::BTreeSet;

use tracing::{info, instrument, warn};

use bizgate_core::{OrganizationId, PermissionId, RoleId, UserId};

use crate::identity_store::{Grant, IdentityError, IdentityResult, IdentityStore, IdentityTransaction};

/// Collapse duplicates, keeping a deterministic order.
fn distinct<T: Copy + Ord>(ids: &[T]) -> Vec<T> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

async fn finish<T: IdentityTransaction>(tx: T, outcome: IdentityResult<()>) -> IdentityResult<()> {
    match outcome {
        Ok(()) => tx.commit().await,
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed after assignment error");
            }
            Err(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentEngine<S> {
    store: S,
}

impl<S> AssignmentEngine<S>
where
    S: IdentityStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace the permission set of a role.
    #[instrument(skip(self, permission_ids), fields(role_id = %role_id), err)]
    pub async fn set_role_permissions(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> IdentityResult<()> {
        let targets = distinct(permission_ids);
        let mut tx = self.store.begin().await?;
        let outcome = replace_role_permissions(&mut tx, role_id, &targets).await;
        finish(tx, outcome).await?;

        info!(role_id = %role_id, permission_count = targets.len(), "role permissions replaced");
        Ok(())
    }

    /// Replace the roles a user holds in one organization.
    ///
    /// The user must already be a member of `organization_id`.
    #[instrument(
        skip(self, role_ids),
        fields(user_id = %user_id, organization_id = %organization_id),
        err
    )]
    pub async fn set_user_roles_in_organization(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        role_ids: &[RoleId],
    ) -> IdentityResult<()> {
        let targets = distinct(role_ids);
        let mut tx = self.store.begin().await?;
        let outcome = replace_user_roles(&mut tx, user_id, organization_id, &targets).await;
        finish(tx, outcome).await?;

        info!(
            user_id = %user_id,
            organization_id = %organization_id,
            role_count = targets.len(),
            "user roles replaced"
        );
        Ok(())
    }

    /// Replace a user's organization memberships.
    ///
    /// Grants in organizations dropped from the list are removed too.
    #[instrument(skip(self, organization_ids), fields(user_id = %user_id), err)]
    pub async fn set_user_organizations(
        &self,
        user_id: UserId,
        organization_ids: &[OrganizationId],
    ) -> IdentityResult<()> {
        let targets = distinct(organization_ids);
        let mut tx = self.store.begin().await?;
        let outcome = replace_user_organizations(&mut tx, user_id, &targets).await;
        finish(tx, outcome).await?;

        info!(user_id = %user_id, organization_count = targets.len(), "user organizations replaced");
        Ok(())
    }
}

async fn replace_role_permissions<T: IdentityTransaction>(
    tx: &mut T,
    role_id: RoleId,
    permission_ids: &[PermissionId],
) -> IdentityResult<()> {
    tx.lock_role(role_id).await?;
    for permission_id in permission_ids {
        tx.ensure_permission(*permission_id).await?;
    }

    tx.clear_role_permissions(role_id).await?;
    for permission_id in permission_ids {
        tx.insert_role_permission(role_id, *permission_id).await?;
    }
    Ok(())
}

async fn replace_user_roles<T: IdentityTransaction>(
    tx: &mut T,
    user_id: UserId,
    organization_id: OrganizationId,
    role_ids: &[RoleId],
) -> IdentityResult<()> {
    tx.lock_user(user_id).await?;
    tx.ensure_organization(organization_id).await?;
    for role_id in role_ids {
        tx.ensure_role(*role_id).await?;
    }

    if !tx.is_member(user_id, organization_id).await? {
        return Err(IdentityError::integrity(format!(
            "user {user_id} is not a member of organization {organization_id}"
        )));
    }

    tx.clear_user_grants(user_id, organization_id).await?;
    for role_id in role_ids {
        tx.insert_grant(Grant {
            user_id,
            organization_id,
            role_id: *role_id,
        })
        .await?;
    }
    Ok(())
}

async fn replace_user_organizations<T: IdentityTransaction>(
    tx: &mut T,
    user_id: UserId,
    organization_ids: &[OrganizationId],
) -> IdentityResult<()> {
    tx.lock_user(user_id).await?;
    for organization_id in organization_ids {
        tx.ensure_organization(*organization_id).await?;
    }

    tx.clear_user_grants_outside(user_id, organization_ids).await?;
    tx.clear_user_organizations_outside(user_id, organization_ids).await?;
    for organization_id in organization_ids {
        tx.insert_user_organization(user_id, *organization_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bizgate_auth::{CreateOrganization, CreatePermission, CreateRole, CreateUser};

    use crate::identity_store::InMemoryIdentityStore;

    struct Fixture {
        engine: AssignmentEngine<Arc<InMemoryIdentityStore>>,
        store: Arc<InMemoryIdentityStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryIdentityStore::new());
            Self {
                engine: AssignmentEngine::new(Arc::clone(&store)),
                store,
            }
        }

        async fn user(&self, email: &str) -> UserId {
            self.store
                .create_user(CreateUser {
                    display_name: email.into(),
                    email: email.into(),
                    credential_hash: "$argon2id$fake".into(),
                })
                .await
                .unwrap()
                .id
        }

        async fn org(&self, name: &str) -> OrganizationId {
            self.store
                .create_organization(CreateOrganization {
                    name: name.into(),
                    description: String::new(),
                })
                .await
                .unwrap()
                .id
        }

        async fn role(&self, name: &str) -> RoleId {
            self.store
                .create_role(CreateRole {
                    name: name.into(),
                    description: String::new(),
                })
                .await
                .unwrap()
                .id
        }

        async fn permission(&self, name: &str) -> PermissionId {
            self.store
                .create_permission(CreatePermission {
                    name: name.into(),
                    description: String::new(),
                    group_id: None,
                })
                .await
                .unwrap()
                .id
        }

        async fn role_permission_names(&self, role: RoleId) -> Vec<String> {
            self.store
                .list_role_permissions(role)
                .await
                .unwrap()
                .into_iter()
                .map(|p| p.name.to_string())
                .collect()
        }
    }

    #[tokio::test]
    async fn set_role_permissions_replaces_previous_set() {
        let f = Fixture::new();
        let role = f.role("Editor").await;
        let a = f.permission("A").await;
        let b = f.permission("B").await;
        let c = f.permission("C").await;

        f.engine.set_role_permissions(role, &[a, b]).await.unwrap();
        f.engine.set_role_permissions(role, &[b, c]).await.unwrap();

        assert_eq!(f.role_permission_names(role).await, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn empty_list_clears_and_is_idempotent() {
        let f = Fixture::new();
        let role = f.role("Editor").await;
        let a = f.permission("A").await;

        f.engine.set_role_permissions(role, &[a]).await.unwrap();
        f.engine.set_role_permissions(role, &[]).await.unwrap();
        f.engine.set_role_permissions(role, &[]).await.unwrap();

        assert!(f.role_permission_names(role).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_targets_collapse() {
        let f = Fixture::new();
        let role = f.role("Editor").await;
        let a = f.permission("A").await;

        f.engine.set_role_permissions(role, &[a, a, a]).await.unwrap();
        assert_eq!(f.role_permission_names(role).await, vec!["A"]);
    }

    #[tokio::test]
    async fn unknown_target_fails_and_keeps_prior_state() {
        let f = Fixture::new();
        let role = f.role("Editor").await;
        let a = f.permission("A").await;
        f.engine.set_role_permissions(role, &[a]).await.unwrap();

        let err = f
            .engine
            .set_role_permissions(role, &[PermissionId::new()])
            .await
            .unwrap_err();

        assert!(matches!(err, IdentityError::NotFound { entity: "permission", .. }));
        assert_eq!(f.role_permission_names(role).await, vec!["A"]);
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let f = Fixture::new();
        let err = f
            .engine
            .set_role_permissions(RoleId::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound { entity: "role", .. }));
    }

    #[tokio::test]
    async fn roles_require_membership() {
        let f = Fixture::new();
        let user = f.user("jane@example.com").await;
        let org = f.org("Acme").await;
        let role = f.role("Editor").await;

        let err = f
            .engine
            .set_user_roles_in_organization(user, org, &[role])
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::IntegrityViolation(_)));
        assert!(f.store.list_user_grants(user, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn user_roles_are_scoped_per_organization() {
        let f = Fixture::new();
        let user = f.user("jane@example.com").await;
        let acme = f.org("Acme").await;
        let globex = f.org("Globex").await;
        let editor = f.role("Editor").await;
        let viewer = f.role("Viewer").await;

        f.engine.set_user_organizations(user, &[acme, globex]).await.unwrap();
        f.engine.set_user_roles_in_organization(user, acme, &[editor]).await.unwrap();
        f.engine.set_user_roles_in_organization(user, globex, &[viewer]).await.unwrap();

        // Replacing Acme's roles leaves Globex untouched.
        f.engine.set_user_roles_in_organization(user, acme, &[viewer]).await.unwrap();

        let acme_grants = f.store.list_user_grants(user, Some(acme)).await.unwrap();
        let globex_grants = f.store.list_user_grants(user, Some(globex)).await.unwrap();
        assert_eq!(acme_grants.iter().map(|g| g.role_id).collect::<Vec<_>>(), vec![viewer]);
        assert_eq!(globex_grants.iter().map(|g| g.role_id).collect::<Vec<_>>(), vec![viewer]);
    }

    #[tokio::test]
    async fn dropping_membership_drops_its_grants() {
        let f = Fixture::new();
        let user = f.user("jane@example.com").await;
        let acme = f.org("Acme").await;
        let globex = f.org("Globex").await;
        let editor = f.role("Editor").await;

        f.engine.set_user_organizations(user, &[acme, globex]).await.unwrap();
        f.engine.set_user_roles_in_organization(user, acme, &[editor]).await.unwrap();
        f.engine.set_user_roles_in_organization(user, globex, &[editor]).await.unwrap();

        f.engine.set_user_organizations(user, &[globex]).await.unwrap();

        let grants = f.store.list_user_grants(user, None).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].organization_id, globex);

        let orgs = f.store.list_user_organizations(user).await.unwrap();
        assert_eq!(orgs.iter().map(|o| o.id).collect::<Vec<_>>(), vec![globex]);
    }

    #[tokio::test]
    async fn adding_membership_keeps_existing_grants() {
        let f = Fixture::new();
        let user = f.user("jane@example.com").await;
        let acme = f.org("Acme").await;
        let globex = f.org("Globex").await;
        let editor = f.role("Editor").await;

        f.engine.set_user_organizations(user, &[acme]).await.unwrap();
        f.engine.set_user_roles_in_organization(user, acme, &[editor]).await.unwrap();

        f.engine.set_user_organizations(user, &[acme, globex]).await.unwrap();

        let grants = f.store.list_user_grants(user, Some(acme)).await.unwrap();
        assert_eq!(grants.iter().map(|g| g.role_id).collect::<Vec<_>>(), vec![editor]);
    }

    #[tokio::test]
    async fn role_delete_cascades_to_grants_and_permissions() {
        let f = Fixture::new();
        let user = f.user("jane@example.com").await;
        let acme = f.org("Acme").await;
        let editor = f.role("Editor").await;
        let read = f.permission("ORDER_READ").await;

        f.engine.set_role_permissions(editor, &[read]).await.unwrap();
        f.engine.set_user_organizations(user, &[acme]).await.unwrap();
        f.engine.set_user_roles_in_organization(user, acme, &[editor]).await.unwrap();

        f.store.delete_role(editor).await.unwrap();

        assert!(f.store.list_user_grants(user, None).await.unwrap().is_empty());
        assert!(f.store.permission_names_for_roles(&[editor]).await.unwrap().is_empty());
        // The permission itself survives.
        assert!(f.store.get_permission(read).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_replacements_never_interleave() {
        let f = Fixture::new();
        let role = f.role("Editor").await;
        let first: Vec<PermissionId> = [f.permission("A").await, f.permission("B").await].into();
        let second: Vec<PermissionId> = [f.permission("C").await, f.permission("D").await].into();

        let engine = Arc::new(f.engine.clone());
        let mut handles = Vec::new();
        for i in 0..16 {
            let engine = Arc::clone(&engine);
            let set = if i % 2 == 0 { first.clone() } else { second.clone() };
            handles.push(tokio::spawn(async move {
                engine.set_role_permissions(role, &set).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let names = f.role_permission_names(role).await;
        assert!(names == ["A", "B"] || names == ["C", "D"], "got {names:?}");
    }
}
