use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::get,
};

use bizgate_auth::{CreateOrganization, UpdateOrganization, admin};
use bizgate_core::OrganizationId;
use bizgate_infra::IdentityStore;

use crate::app::routes::common::{CmdAuth, json_result, no_content};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router<S: IdentityStore + 'static>() -> Router {
    Router::new()
        .route("/", get(list_organizations::<S>).post(create_organization::<S>))
        .route(
            "/:id",
            get(get_organization::<S>)
                .patch(update_organization::<S>)
                .delete(delete_organization::<S>),
        )
}

pub async fn list_organizations<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::ORGANIZATION_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.list_organizations().await)
}

/// Creating an organization is a global write.
pub async fn create_organization<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<CreateOrganization>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::ORGANIZATION_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    json_result(
        StatusCode::CREATED,
        services.store.create_organization(cmd.inner).await,
    )
}

pub async fn get_organization<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<OrganizationId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::ORGANIZATION_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.get_organization(id).await)
}

pub async fn update_organization<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<OrganizationId>,
    Json(body): Json<UpdateOrganization>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::ORGANIZATION_WRITE);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }
    if let Err(resp) = authz::authorize_in_organizations(&services, &principal, &[id], &cmd).await {
        return resp;
    }

    json_result(
        StatusCode::OK,
        services.store.update_organization(id, cmd.inner).await,
    )
}

/// Deleting an organization drops its memberships and grants.
pub async fn delete_organization<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<OrganizationId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::ORGANIZATION_WRITE);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }
    if let Err(resp) = authz::authorize_in_organizations(&services, &principal, &[id], &cmd).await {
        return resp;
    }

    no_content(services.store.delete_organization(id).await)
}
