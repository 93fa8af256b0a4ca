use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::get,
};

use bizgate_auth::{CreateRole, UpdateRole, admin};
use bizgate_core::RoleId;
use bizgate_infra::IdentityStore;

use crate::app::dto::SetRolePermissionsRequest;
use crate::app::routes::common::{CmdAuth, json_result, no_content};
use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router<S: IdentityStore + 'static>() -> Router {
    Router::new()
        .route("/", get(list_roles::<S>).post(create_role::<S>))
        .route(
            "/:id",
            get(get_role::<S>)
                .patch(update_role::<S>)
                .delete(delete_role::<S>),
        )
        .route(
            "/:id/permissions",
            get(list_role_permissions::<S>).put(set_role_permissions::<S>),
        )
}

pub async fn list_roles<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::ROLE_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.list_roles().await)
}

pub async fn create_role<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<CreateRole>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::ROLE_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::CREATED, services.store.create_role(cmd.inner).await)
}

pub async fn get_role<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::ROLE_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.get_role(id).await)
}

pub async fn update_role<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
    Json(body): Json<UpdateRole>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::ROLE_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.update_role(id, cmd.inner).await)
}

/// Deleting a role removes every grant of it and its permission links.
pub async fn delete_role<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::ROLE_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    no_content(services.store.delete_role(id).await)
}

pub async fn list_role_permissions<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::ROLE_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    if let Err(e) = services.store.get_role(id).await {
        return errors::identity_error_to_response(e);
    }
    json_result(StatusCode::OK, services.store.list_role_permissions(id).await)
}

/// PUT /admin/roles/:id/permissions (replace the role's permission set)
pub async fn set_role_permissions<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
    Json(body): Json<SetRolePermissionsRequest>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::ROLE_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    if let Err(e) = services
        .engine
        .set_role_permissions(id, &cmd.inner.permission_ids)
        .await
    {
        return errors::identity_error_to_response(e);
    }
    json_result(StatusCode::OK, services.store.list_role_permissions(id).await)
}
