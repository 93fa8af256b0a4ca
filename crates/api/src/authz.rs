//! Route-boundary authorization guards.
//!
//! Handlers call these before touching the store; the principal was resolved
//! fresh by the auth middleware for this request.
//!
//! Reads are checked in the active organization. Writes that touch one
//! organization are checked in that organization, and writes to the global
//! catalog need a privileged principal.

use axum::response::Response;

use bizgate_auth::CommandAuthorization;
use bizgate_core::{OrganizationId, RoleId, UserId};
use bizgate_infra::IdentityStore;

use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

pub fn authorize_command<S, C>(
    services: &AppServices<S>,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), Response>
where
    S: IdentityStore,
    C: CommandAuthorization + ?Sized,
{
    services
        .gate
        .check_command(principal.principal(), command)
        .map_err(errors::authz_error_to_response)
}

/// Check `command` in every one of `organizations` (the active organization
/// when empty).
pub async fn authorize_in_organizations<S, C>(
    services: &AppServices<S>,
    principal: &PrincipalContext,
    organizations: &[OrganizationId],
    command: &C,
) -> Result<(), Response>
where
    S: IdentityStore,
    C: CommandAuthorization + ?Sized,
{
    services
        .gate
        .check_in_organizations(
            principal.principal(),
            organizations,
            command.required_permissions(),
            command.match_mode(),
        )
        .await
        .map_err(errors::gate_error_to_response)
}

/// Global catalog writes: the command's permissions plus privilege.
pub fn authorize_catalog_write<S, C>(
    services: &AppServices<S>,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), Response>
where
    S: IdentityStore,
    C: CommandAuthorization + ?Sized,
{
    authorize_command(services, principal, command)?;
    require_privileged(services, principal)
}

pub fn require_privileged<S: IdentityStore>(
    services: &AppServices<S>,
    principal: &PrincipalContext,
) -> Result<(), Response> {
    services
        .gate
        .require_privileged(principal.principal())
        .map_err(errors::authz_error_to_response)
}

/// Writes to an existing user are checked in every organization the user
/// belongs to. Privileged users can only be changed by privileged callers.
pub async fn authorize_user_write<S, C>(
    services: &AppServices<S>,
    principal: &PrincipalContext,
    user_id: UserId,
    command: &C,
) -> Result<(), Response>
where
    S: IdentityStore,
    C: CommandAuthorization + ?Sized,
{
    authorize_command(services, principal, command)?;

    let organizations: Vec<OrganizationId> = services
        .store
        .list_user_organizations(user_id)
        .await
        .map_err(errors::identity_error_to_response)?
        .into_iter()
        .map(|o| o.id)
        .collect();
    authorize_in_organizations(services, principal, &organizations, command).await?;

    let target_privileged = services
        .gate
        .resolver()
        .is_privileged_anywhere(user_id)
        .await
        .map_err(errors::identity_error_to_response)?;
    if target_privileged {
        require_privileged(services, principal)?;
    }
    Ok(())
}

/// Granting roles that confer privilege needs a privileged caller.
pub async fn authorize_role_grant<S: IdentityStore>(
    services: &AppServices<S>,
    principal: &PrincipalContext,
    role_ids: &[RoleId],
) -> Result<(), Response> {
    let privileged = services
        .gate
        .resolver()
        .grants_privilege(role_ids)
        .await
        .map_err(errors::identity_error_to_response)?;
    if privileged {
        require_privileged(services, principal)?;
    }
    Ok(())
}
