use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use bizgate_infra::IdentityStore;

use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let user = match services.store.get_user(principal.user_id()).await {
        Ok(user) => user,
        Err(e) => return errors::identity_error_to_response(e),
    };

    Json(serde_json::json!({
        "user_id": user.id,
        "display_name": user.display_name,
        "email": user.email,
        "organization_id": principal.organization_id(),
    }))
    .into_response()
}

/// The caller's own effective permissions in the active organization.
pub async fn my_permissions(Extension(principal): Extension<PrincipalContext>) -> Response {
    Json(&principal.principal().resolved).into_response()
}
