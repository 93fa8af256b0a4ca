use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};

use bizgate_core::OrganizationId;
use bizgate_infra::IdentityStore;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, SessionContext};

pub const SESSION_COOKIE: &str = "bizgate_session";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

pub struct AuthState<S> {
    pub services: Arc<AppServices<S>>,
}

impl<S> Clone for AuthState<S> {
    fn clone(&self) -> Self {
        Self {
            services: Arc::clone(&self.services),
        }
    }
}

/// Resolve the session into a [`PrincipalContext`] or reject with 401.
pub async fn auth_middleware<S>(
    State(state): State<AuthState<S>>,
    mut req: Request,
    next: Next,
) -> Response
where
    S: IdentityStore + 'static,
{
    let token = extract_session_token(req.headers());
    let explicit_organization = match extract_organization(req.headers()) {
        Ok(org) => org,
        Err(resp) => return resp,
    };

    let principal = match state
        .services
        .gate
        .authenticate(token.as_deref(), explicit_organization, Utc::now())
        .await
    {
        Ok(principal) => principal,
        Err(e) => return errors::gate_error_to_response(e),
    };

    if let Some(token) = token {
        req.extensions_mut().insert(SessionContext::new(token));
    }
    req.extensions_mut().insert(PrincipalContext::new(principal));

    next.run(req).await
}

/// Session token from `Authorization: Bearer` or, failing that, the session cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer(headers).or_else(|| extract_cookie(headers, SESSION_COOKIE))
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn extract_organization(headers: &HeaderMap) -> Result<Option<OrganizationId>, Response> {
    let Some(raw) = headers.get(ORGANIZATION_HEADER) else {
        return Ok(None);
    };

    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<OrganizationId>().ok())
        .map(Some)
        .ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_organization",
                "X-Organization-Id must be a UUID",
            )
        })
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{secure}",
        max_age.num_seconds().max(0)
    ))
    .ok()
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("bizgate_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
