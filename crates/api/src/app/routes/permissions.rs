//! Permission and permission-group catalogue.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::get,
};

use bizgate_auth::{
    CreatePermission, CreatePermissionGroup, UpdatePermission, UpdatePermissionGroup, admin,
};
use bizgate_core::{PermissionGroupId, PermissionId};
use bizgate_infra::IdentityStore;

use crate::app::routes::common::{CmdAuth, json_result, no_content};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router<S: IdentityStore + 'static>() -> Router {
    Router::new()
        .route("/", get(list_permissions::<S>).post(create_permission::<S>))
        .route(
            "/:id",
            get(get_permission::<S>)
                .patch(update_permission::<S>)
                .delete(delete_permission::<S>),
        )
}

pub fn groups_router<S: IdentityStore + 'static>() -> Router {
    Router::new()
        .route("/", get(list_groups::<S>).post(create_group::<S>))
        .route(
            "/:id",
            get(get_group::<S>)
                .patch(update_group::<S>)
                .delete(delete_group::<S>),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

pub async fn list_permissions<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::PERMISSION_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.list_permissions().await)
}

pub async fn create_permission<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<CreatePermission>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::PERMISSION_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    json_result(
        StatusCode::CREATED,
        services.store.create_permission(cmd.inner).await,
    )
}

pub async fn get_permission<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::PERMISSION_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.get_permission(id).await)
}

pub async fn update_permission<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionId>,
    Json(body): Json<UpdatePermission>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::PERMISSION_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    json_result(
        StatusCode::OK,
        services.store.update_permission(id, cmd.inner).await,
    )
}

pub async fn delete_permission<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::PERMISSION_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    no_content(services.store.delete_permission(id).await)
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission groups
// ─────────────────────────────────────────────────────────────────────────────

pub async fn list_groups<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::PERMISSION_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.list_permission_groups().await)
}

pub async fn create_group<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<CreatePermissionGroup>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::PERMISSION_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    json_result(
        StatusCode::CREATED,
        services.store.create_permission_group(cmd.inner).await,
    )
}

pub async fn get_group<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionGroupId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::PERMISSION_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    json_result(StatusCode::OK, services.store.get_permission_group(id).await)
}

pub async fn update_group<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionGroupId>,
    Json(body): Json<UpdatePermissionGroup>,
) -> Response {
    let cmd = CmdAuth::requiring(body, admin::PERMISSION_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    json_result(
        StatusCode::OK,
        services.store.update_permission_group(id, cmd.inner).await,
    )
}

/// Permissions in the group stay, ungrouped.
pub async fn delete_group<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PermissionGroupId>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::PERMISSION_WRITE);
    if let Err(resp) = authz::authorize_catalog_write(&services, &principal, &cmd) {
        return resp;
    }

    no_content(services.store.delete_permission_group(id).await)
}
