use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bizgate_auth::{AuthzError, PasswordError, SessionError};
use bizgate_infra::{GateError, IdentityError};

pub fn identity_error_to_response(err: IdentityError) -> axum::response::Response {
    match err {
        IdentityError::NotFound { entity, id } => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{entity} {id} not found"))
        }
        IdentityError::IntegrityViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "integrity_violation", msg)
        }
        IdentityError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        IdentityError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        IdentityError::StoreUnavailable(msg) => {
            tracing::warn!(error = %msg, "identity store unavailable");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "identity store unavailable",
            )
        }
    }
}

/// Denials stay opaque: the body never names the missing permission.
pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    match err {
        AuthzError::Unauthenticated => {
            json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "unauthenticated")
        }
        AuthzError::Forbidden => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
    }
}

pub fn gate_error_to_response(err: GateError) -> axum::response::Response {
    match err {
        GateError::Denied(e) => authz_error_to_response(e),
        GateError::Store(e) => identity_error_to_response(e),
    }
}

pub fn session_error_to_response(err: SessionError) -> axum::response::Response {
    match err {
        SessionError::Encoding(msg) => {
            tracing::error!(error = %msg, "failed to issue session token");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "session_error",
                "could not issue session",
            )
        }
        _ => authz_error_to_response(AuthzError::Unauthenticated),
    }
}

pub fn password_error_to_response(err: PasswordError) -> axum::response::Response {
    match err {
        PasswordError::Empty => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        other => {
            tracing::error!(error = %other, "password hashing failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "password_error",
                "could not process password",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
