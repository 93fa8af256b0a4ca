//! User administration, memberships and per-organization role grants.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, put},
};

use bizgate_auth::admin;
use bizgate_core::{OrganizationId, UserId};
use bizgate_infra::IdentityStore;

use crate::app::dto::{
    CreateUserRequest, OrganizationQuery, SetUserOrganizationsRequest, SetUserRolesRequest,
    UpdateUserRequest,
};
use crate::app::routes::common::{CmdAuth, json_result, no_content};
use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router<S: IdentityStore + 'static>() -> Router {
    Router::new()
        .route("/", get(list_users::<S>).post(create_user::<S>))
        .route(
            "/:id",
            get(get_user::<S>)
                .patch(update_user::<S>)
                .delete(delete_user::<S>),
        )
        .route(
            "/:id/organizations",
            get(list_user_organizations::<S>).put(set_user_organizations::<S>),
        )
        .route("/:id/organizations/:org_id/roles", put(set_user_roles::<S>))
        .route("/:id/grants", get(list_user_grants::<S>))
        .route("/:id/permissions", get(user_permissions::<S>))
}

pub async fn list_users<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::USER_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.list_users().await)
}

pub async fn create_user<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<CreateUserRequest>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::USER_WRITE);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    let input = match cmd.inner.into_input() {
        Ok(input) => input,
        Err(e) => return errors::password_error_to_response(e),
    };

    json_result(StatusCode::CREATED, services.store.create_user(input).await)
}

pub async fn get_user<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::USER_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.get_user(id).await)
}

pub async fn update_user<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
    Json(body): Json<UpdateUserRequest>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::USER_WRITE);
    if let Err(resp) = authz::authorize_user_write(&services, &principal, id, &cmd).await {
        return resp;
    }

    let patch = match cmd.inner.into_patch() {
        Ok(patch) => patch,
        Err(e) => return errors::password_error_to_response(e),
    };

    json_result(StatusCode::OK, services.store.update_user(id, patch).await)
}

pub async fn delete_user<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::USER_WRITE);
    if let Err(resp) = authz::authorize_user_write(&services, &principal, id, &cmd).await {
        return resp;
    }

    no_content(services.store.delete_user(id).await)
}

pub async fn list_user_organizations<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::USER_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    if let Err(e) = services.store.get_user(id).await {
        return errors::identity_error_to_response(e);
    }
    json_result(StatusCode::OK, services.store.list_user_organizations(id).await)
}

/// PUT /admin/users/:id/organizations (replace memberships)
///
/// The caller needs `USER_WRITE` in every organization added or removed.
pub async fn set_user_organizations<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
    Json(body): Json<SetUserOrganizationsRequest>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::USER_WRITE);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    let current: BTreeSet<OrganizationId> = match services.store.list_user_organizations(id).await
    {
        Ok(orgs) => orgs.into_iter().map(|o| o.id).collect(),
        Err(e) => return errors::identity_error_to_response(e),
    };
    let target: BTreeSet<OrganizationId> = cmd.inner.organization_ids.iter().copied().collect();
    let changed: Vec<OrganizationId> = current.symmetric_difference(&target).copied().collect();
    if !changed.is_empty() {
        if let Err(resp) =
            authz::authorize_in_organizations(&services, &principal, &changed, &cmd).await
        {
            return resp;
        }
    }

    if let Err(e) = services
        .engine
        .set_user_organizations(id, &cmd.inner.organization_ids)
        .await
    {
        return errors::identity_error_to_response(e);
    }
    json_result(StatusCode::OK, services.store.list_user_organizations(id).await)
}

/// PUT /admin/users/:id/organizations/:org_id/roles (replace grants in one organization)
///
/// Checked in `org_id`, not the caller's active organization.
pub async fn set_user_roles<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, organization_id)): Path<(UserId, OrganizationId)>,
    Json(body): Json<SetUserRolesRequest>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::USER_WRITE);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }
    if let Err(resp) =
        authz::authorize_in_organizations(&services, &principal, &[organization_id], &cmd).await
    {
        return resp;
    }
    if let Err(resp) = authz::authorize_role_grant(&services, &principal, &cmd.inner.role_ids).await
    {
        return resp;
    }

    if let Err(e) = services
        .engine
        .set_user_roles_in_organization(id, organization_id, &cmd.inner.role_ids)
        .await
    {
        return errors::identity_error_to_response(e);
    }
    json_result(
        StatusCode::OK,
        services.store.list_user_grants(id, Some(organization_id)).await,
    )
}

/// GET /admin/users/:id/grants?organization_id=
pub async fn list_user_grants<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
    Query(query): Query<OrganizationQuery>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::USER_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    if let Err(e) = services.store.get_user(id).await {
        return errors::identity_error_to_response(e);
    }
    json_result(
        StatusCode::OK,
        services.store.list_user_grants(id, query.organization_id).await,
    )
}

/// GET /admin/users/:id/permissions?organization_id=
///
/// Resolution inspection; an absent organization resolves across all of them.
pub async fn user_permissions<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
    Query(query): Query<OrganizationQuery>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::USER_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    if let Err(e) = services.store.get_user(id).await {
        return errors::identity_error_to_response(e);
    }
    json_result(
        StatusCode::OK,
        services
            .gate
            .resolver()
            .resolve_permissions(id, query.organization_id)
            .await,
    )
}
