//! Authorization gate: session -> principal -> allow/deny.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, instrument};

use bizgate_auth::{
    AuthorizationExplanation, AuthzError, CommandAuthorization, MatchMode, PermissionName,
    Principal, SessionResolver, authorize, explain_authorization,
};
use bizgate_core::{OrganizationId, UserId};

use crate::identity_store::{IdentityError, IdentityStore};
use crate::resolver::PermissionResolver;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Denied(#[from] AuthzError),

    #[error(transparent)]
    Store(#[from] IdentityError),
}

/// Composes session resolution and permission resolution.
///
/// Nothing is cached; every call decodes the session and re-reads grants.
#[derive(Clone)]
pub struct AuthorizationGate<S> {
    sessions: SessionResolver,
    resolver: PermissionResolver<S>,
}

impl<S> AuthorizationGate<S>
where
    S: IdentityStore,
{
    pub fn new(sessions: SessionResolver, resolver: PermissionResolver<S>) -> Self {
        Self { sessions, resolver }
    }

    pub fn sessions(&self) -> &SessionResolver {
        &self.sessions
    }

    pub fn resolver(&self) -> &PermissionResolver<S> {
        &self.resolver
    }

    /// First organization (by name) the user belongs to, if any.
    pub async fn default_organization(
        &self,
        user_id: UserId,
    ) -> Result<Option<OrganizationId>, IdentityError> {
        let organizations = self.resolver.store().list_user_organizations(user_id).await?;
        Ok(organizations.first().map(|o| o.id))
    }

    /// Build a principal for `user_id`, scoped to `organization_id` or the
    /// user's default organization.
    pub async fn principal_for(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Result<Principal, IdentityError> {
        let organization_id = match organization_id {
            Some(id) => Some(id),
            None => self.default_organization(user_id).await?,
        };

        let resolved = self
            .resolver
            .resolve_permissions(user_id, organization_id)
            .await?;

        Ok(Principal {
            user_id,
            organization_id,
            resolved,
        })
    }

    /// Resolve the request's principal from its session token.
    ///
    /// A missing/invalid/expired session, or a session whose user no longer
    /// exists, is `Unauthenticated`.
    #[instrument(skip(self, token), fields(explicit_organization = ?explicit_organization))]
    pub async fn authenticate(
        &self,
        token: Option<&str>,
        explicit_organization: Option<OrganizationId>,
        now: DateTime<Utc>,
    ) -> Result<Principal, GateError> {
        let identity = self
            .sessions
            .resolve(token, explicit_organization, now)
            .map_err(|e| {
                debug!(error = %e, "session rejected");
                AuthzError::Unauthenticated
            })?;

        match self.resolver.store().get_user(identity.user_id).await {
            Ok(_) => {}
            Err(IdentityError::NotFound { .. }) => {
                debug!(user_id = %identity.user_id, "session refers to a deleted user");
                return Err(AuthzError::Unauthenticated.into());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(self
            .principal_for(identity.user_id, identity.organization_id)
            .await?)
    }

    /// Check `required` under `mode` for an already-resolved principal.
    pub fn check(
        &self,
        principal: &Principal,
        required: &[PermissionName],
        mode: MatchMode,
    ) -> Result<(), AuthzError> {
        let decision = authorize(Some(principal), required, mode);
        if !decision.is_allowed() {
            // Server side only; responses stay opaque.
            debug!(
                user_id = %principal.user_id,
                organization_id = ?principal.organization_id,
                required = ?required.iter().map(PermissionName::as_str).collect::<Vec<_>>(),
                mode = ?mode,
                "authorization denied"
            );
        }
        decision.into_result()
    }

    /// Authenticate and authorize in one step.
    pub async fn allow(
        &self,
        token: Option<&str>,
        explicit_organization: Option<OrganizationId>,
        required: &[PermissionName],
        mode: MatchMode,
        now: DateTime<Utc>,
    ) -> Result<Principal, GateError> {
        let principal = self.authenticate(token, explicit_organization, now).await?;
        self.check(&principal, required, mode)?;
        Ok(principal)
    }

    pub fn check_command<C: CommandAuthorization + ?Sized>(
        &self,
        principal: &Principal,
        command: &C,
    ) -> Result<(), AuthzError> {
        self.check(principal, command.required_permissions(), command.match_mode())
    }

    /// Privileged principals administer every organization and the global
    /// catalog (roles, permissions, groups, organization creation).
    pub fn require_privileged(&self, principal: &Principal) -> Result<(), AuthzError> {
        if principal.resolved.is_privileged {
            return Ok(());
        }
        debug!(
            user_id = %principal.user_id,
            organization_id = ?principal.organization_id,
            "privileged operation denied"
        );
        Err(AuthzError::Forbidden)
    }

    /// Check `required` in each of `organizations`, resolving the caller's
    /// grants there rather than in the active organization.
    ///
    /// An empty list checks the principal as-is. Privileged principals pass.
    pub async fn check_in_organizations(
        &self,
        principal: &Principal,
        organizations: &[OrganizationId],
        required: &[PermissionName],
        mode: MatchMode,
    ) -> Result<(), GateError> {
        if principal.resolved.is_privileged {
            return Ok(());
        }
        if organizations.is_empty() {
            return Ok(self.check(principal, required, mode)?);
        }
        for &organization_id in organizations {
            if principal.organization_id == Some(organization_id) {
                self.check(principal, required, mode)?;
                continue;
            }
            let scoped = self
                .principal_for(principal.user_id, Some(organization_id))
                .await?;
            self.check(&scoped, required, mode)?;
        }
        Ok(())
    }

    /// Audit explanation for `user_id` without a session (administrators only).
    pub async fn explain(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
        required: &[PermissionName],
        mode: MatchMode,
    ) -> Result<AuthorizationExplanation, IdentityError> {
        // 404 for unknown users rather than an empty explanation.
        self.resolver.store().get_user(user_id).await?;
        let principal = self.principal_for(user_id, organization_id).await?;
        Ok(explain_authorization(&principal, required, mode))
    }
}
