//! Login, logout and organization switching.
//!
//! Tokens are stateless; logout only clears the cookie. Revoking access is done
//! by changing grants, which the next request picks up.

use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, info};

use bizgate_auth::{AuthzError, IssuedSession, verify_password};
use bizgate_core::{OrganizationId, UserId};
use bizgate_infra::IdentityStore;

use crate::app::dto::{LoginRequest, SessionResponse, SwitchOrganizationRequest};
use crate::app::{errors, services::AppServices};
use crate::context::{PrincipalContext, SessionContext};
use crate::middleware;

/// POST /auth/login
pub async fn login<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let user = match services.store.get_user_by_email(&body.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!("login for unknown email");
            return invalid_credentials();
        }
        Err(e) => return errors::identity_error_to_response(e),
    };

    match verify_password(&body.password, &user.credential_hash) {
        Ok(true) => {}
        Ok(false) => {
            debug!(user_id = %user.id, "login with wrong password");
            return invalid_credentials();
        }
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "stored credential hash is unusable");
            return invalid_credentials();
        }
    }

    let organization_id = match body.organization_id {
        Some(org) => match ensure_member(&services, user.id, org).await {
            Ok(()) => Some(org),
            Err(resp) => return resp,
        },
        None => match services.gate.default_organization(user.id).await {
            Ok(org) => org,
            Err(e) => return errors::identity_error_to_response(e),
        },
    };

    let session = match services
        .gate
        .sessions()
        .issue(user.id, organization_id, Utc::now())
    {
        Ok(session) => session,
        Err(e) => return errors::session_error_to_response(e),
    };

    info!(user_id = %user.id, organization_id = ?organization_id, "session issued");
    session_response(&services, &session)
}

/// POST /auth/logout
pub async fn logout() -> Response {
    let mut resp = StatusCode::NO_CONTENT.into_response();
    resp.headers_mut()
        .insert(header::SET_COOKIE, middleware::clear_session_cookie());
    resp
}

/// POST /session/organization
///
/// Re-issues the caller's token for another organization they belong to. The
/// original expiry is kept.
pub async fn switch_organization<S: IdentityStore + 'static>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(session): Extension<SessionContext>,
    Json(body): Json<SwitchOrganizationRequest>,
) -> Response {
    if let Err(resp) = ensure_member(&services, principal.user_id(), body.organization_id).await {
        return resp;
    }

    let session = match services.gate.sessions().switch_organization(
        session.token(),
        body.organization_id,
        Utc::now(),
    ) {
        Ok(session) => session,
        Err(e) => return errors::session_error_to_response(e),
    };

    info!(
        user_id = %principal.user_id(),
        organization_id = %body.organization_id,
        "organization switched"
    );
    session_response(&services, &session)
}

async fn ensure_member<S: IdentityStore>(
    services: &AppServices<S>,
    user_id: UserId,
    organization_id: OrganizationId,
) -> Result<(), Response> {
    let organizations = services
        .store
        .list_user_organizations(user_id)
        .await
        .map_err(errors::identity_error_to_response)?;

    if organizations.iter().any(|o| o.id == organization_id) {
        Ok(())
    } else {
        debug!(%user_id, %organization_id, "not a member of requested organization");
        Err(errors::authz_error_to_response(AuthzError::Forbidden))
    }
}

fn session_response<S>(services: &AppServices<S>, session: &IssuedSession) -> Response {
    let max_age = session.claims.expires_at - Utc::now();
    let mut resp = (StatusCode::OK, Json(SessionResponse::from(session))).into_response();
    if let Some(cookie) = middleware::session_cookie(&session.token, max_age, services.secure_cookies)
    {
        resp.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    resp
}

fn invalid_credentials() -> Response {
    errors::json_error(
        StatusCode::UNAUTHORIZED,
        "invalid_credentials",
        "invalid email or password",
    )
}
