//! RBAC audit endpoint for authorization debugging.
//!
//! Answers "why would this user be denied?" for administrators. Ordinary
//! callers only ever see opaque 403s.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use bizgate_auth::admin;
use bizgate_core::UserId;
use bizgate_infra::IdentityStore;

use crate::app::dto::ExplainQuery;
use crate::app::routes::common::CmdAuth;
use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router<S: IdentityStore + 'static>() -> Router {
    Router::new().route("/explain/:user_id", get(explain_user_authorization::<S>))
}

/// GET /admin/rbac/explain/:user_id?permission=A,B&mode=any&organization_id=
pub async fn explain_user_authorization<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Query(query): Query<ExplainQuery>,
) -> Response {
    let cmd = CmdAuth::requiring((), admin::USER_READ);
    if let Err(resp) = authz::authorize_command(&services, &principal, &cmd) {
        return resp;
    }

    let required = query.required();
    if required.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "permission must name at least one permission",
        );
    }

    match services
        .gate
        .explain(user_id, query.organization_id, &required, query.mode)
        .await
    {
        Ok(explanation) => (StatusCode::OK, Json(explanation)).into_response(),
        Err(e) => errors::identity_error_to_response(e),
    }
}
