//! First-run seeding of an administrator account.

use tracing::info;

use bizgate_auth::{
    ALL_ACCESS, CreateOrganization, CreatePermission, CreateRole, CreateUser, PermissionName,
    admin, hash_password,
};
use bizgate_core::{PermissionId, UserId};

use crate::assignment::AssignmentEngine;
use crate::identity_store::{IdentityError, IdentityResult, IdentityStore};

pub const SUPER_ADMIN_ROLE: &str = "Super Administrator";

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub organization_name: String,
}

impl BootstrapAdmin {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            display_name: "Administrator".to_string(),
            organization_name: "Default Organization".to_string(),
        }
    }
}

/// Create the administrator, its organization and a role holding every
/// management permission plus `ALL_ACCESS`.
///
/// Returns `None` when a user with that email already exists. Existing
/// organizations, roles and permissions with matching names are reused.
pub async fn seed_bootstrap_admin<S: IdentityStore>(
    engine: &AssignmentEngine<S>,
    seed: &BootstrapAdmin,
) -> IdentityResult<Option<UserId>> {
    let store = engine.store();

    if store.get_user_by_email(&seed.email).await?.is_some() {
        info!(email = %seed.email, "bootstrap admin already present");
        return Ok(None);
    }

    let organization = match store
        .list_organizations()
        .await?
        .into_iter()
        .find(|o| o.name == seed.organization_name)
    {
        Some(existing) => existing,
        None => {
            store
                .create_organization(CreateOrganization {
                    name: seed.organization_name.clone(),
                    description: "Created at first start".to_string(),
                })
                .await?
        }
    };

    let role = match store
        .list_roles()
        .await?
        .into_iter()
        .find(|r| r.name == SUPER_ADMIN_ROLE)
    {
        Some(existing) => existing,
        None => {
            store
                .create_role(CreateRole {
                    name: SUPER_ADMIN_ROLE.to_string(),
                    description: "Full access to every organization it is granted in".to_string(),
                })
                .await?
        }
    };

    let wanted: Vec<PermissionName> = admin::all()
        .into_iter()
        .chain(std::iter::once(ALL_ACCESS))
        .collect();
    let existing = store.list_permissions().await?;
    let mut permission_ids: Vec<PermissionId> = Vec::with_capacity(wanted.len());
    for name in wanted {
        let id = match existing.iter().find(|p| p.name == name) {
            Some(p) => p.id,
            None => {
                store
                    .create_permission(CreatePermission {
                        name: name.to_string(),
                        description: String::new(),
                        group_id: None,
                    })
                    .await?
                    .id
            }
        };
        permission_ids.push(id);
    }

    let credential_hash =
        hash_password(&seed.password).map_err(|e| IdentityError::Validation(e.to_string()))?;
    let user = store
        .create_user(CreateUser {
            display_name: seed.display_name.clone(),
            email: seed.email.clone(),
            credential_hash,
        })
        .await?;

    engine.set_role_permissions(role.id, &permission_ids).await?;
    engine.set_user_organizations(user.id, &[organization.id]).await?;
    engine
        .set_user_roles_in_organization(user.id, organization.id, &[role.id])
        .await?;

    info!(
        user_id = %user.id,
        organization_id = %organization.id,
        "bootstrap admin created"
    );
    Ok(Some(user.id))
}
