//! Permission resolver: `(user, organization?)` -> effective permission set.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use bizgate_auth::{PrivilegePolicy, ResolvedPermissions};
use bizgate_core::{OrganizationId, RoleId, UserId};

use crate::identity_store::{IdentityResult, IdentityStore};

/// Read-only resolution, computed fresh on every call.
#[derive(Debug, Clone)]
pub struct PermissionResolver<S> {
    store: S,
    policy: PrivilegePolicy,
}

impl<S> PermissionResolver<S>
where
    S: IdentityStore,
{
    pub fn new(store: S, policy: PrivilegePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> PrivilegePolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// With an organization, only grants in that organization count; without,
    /// the union over every organization the user holds grants in.
    ///
    /// A user without grants in scope resolves to the empty, unprivileged set.
    #[instrument(skip(self), fields(user_id = %user_id, organization_id = ?organization_id), err)]
    pub async fn resolve_permissions(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> IdentityResult<ResolvedPermissions> {
        let grants = self.store.list_user_grants(user_id, organization_id).await?;

        let role_ids: Vec<RoleId> = grants
            .iter()
            .map(|g| g.role_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if role_ids.is_empty() {
            debug!("no grants in scope");
            return Ok(ResolvedPermissions::empty(organization_id));
        }

        let roles = self.store.get_roles(&role_ids).await?;
        let names = self.store.permission_names_for_roles(&role_ids).await?;

        let resolved = ResolvedPermissions::from_parts(organization_id, roles, names, self.policy);
        debug!(
            role_count = resolved.roles.len(),
            permission_count = resolved.permissions.len(),
            is_privileged = resolved.is_privileged,
            "permissions resolved"
        );
        Ok(resolved)
    }

    /// Whether holding every role in `role_ids` would make a principal
    /// privileged under the configured policy.
    pub async fn grants_privilege(&self, role_ids: &[RoleId]) -> IdentityResult<bool> {
        if role_ids.is_empty() {
            return Ok(false);
        }

        let roles = self.store.get_roles(role_ids).await?;
        let names: BTreeSet<_> = self
            .store
            .permission_names_for_roles(role_ids)
            .await?
            .into_iter()
            .collect();
        Ok(self.policy.is_privileged(&roles, &names))
    }

    /// Privileged in at least one organization.
    pub async fn is_privileged_anywhere(&self, user_id: UserId) -> IdentityResult<bool> {
        Ok(self.resolve_permissions(user_id, None).await?.is_privileged)
    }
}
