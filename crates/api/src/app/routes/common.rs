use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde::Serialize;

use bizgate_auth::{CommandAuthorization, MatchMode, PermissionName};
use bizgate_infra::IdentityResult;

use crate::app::errors;

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<PermissionName>,
    pub mode: MatchMode,
}

impl<C> CmdAuth<C> {
    /// Require a single permission.
    pub fn requiring(inner: C, permission: PermissionName) -> Self {
        Self {
            inner,
            required: vec![permission],
            mode: MatchMode::All,
        }
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[PermissionName] {
        &self.required
    }

    fn match_mode(&self) -> MatchMode {
        self.mode
    }
}

pub fn json_result<T: Serialize>(status: StatusCode, result: IdentityResult<T>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::identity_error_to_response(e),
    }
}

pub fn no_content(result: IdentityResult<()>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::identity_error_to_response(e),
    }
}
