//! Session tokens: opaque string at the boundary, fixed record inside.
//!
//! The decoded record is `{sub, organization_id?, issued_at, expires_at}`.
//! [`SessionCodec`] hides the concrete encoding; [`Hs256SessionCodec`] is the
//! shipped implementation (HMAC-signed JWT).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bizgate_core::{OrganizationId, UserId};

/// Session claims model (transport-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the authenticated user.
    pub sub: UserId,

    /// Organization previously selected by the client, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,

    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session token presented")]
    Missing,

    #[error("malformed session token: {0}")]
    Malformed(String),

    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("session encoding failed: {0}")]
    Encoding(String),
}

/// Deterministically validate session claims against `now`.
///
/// Signature verification / decoding happens in the codec, not here.
pub fn validate_claims(claims: &SessionClaims, now: DateTime<Utc>) -> Result<(), SessionError> {
    if claims.expires_at <= claims.issued_at {
        return Err(SessionError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(SessionError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(SessionError::Expired);
    }
    Ok(())
}

/// Token encoding contract: opaque string <-> [`SessionClaims`].
pub trait SessionCodec: Send + Sync {
    fn encode(&self, claims: &SessionClaims) -> Result<String, SessionError>;

    /// Decode and verify integrity. Time validity is checked separately.
    fn decode(&self, token: &str) -> Result<SessionClaims, SessionError>;
}

impl<C> SessionCodec for Arc<C>
where
    C: SessionCodec + ?Sized,
{
    fn encode(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        (**self).encode(claims)
    }

    fn decode(&self, token: &str) -> Result<SessionClaims, SessionError> {
        (**self).decode(token)
    }
}

/// HMAC-SHA256 signed JWT codec.
pub struct Hs256SessionCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Hs256SessionCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        if secret.len() < 32 {
            tracing::warn!("session secret is shorter than recommended (32 bytes)");
        }

        // Expiry lives in `expires_at` and is checked by `validate_claims`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl SessionCodec for Hs256SessionCodec {
    fn encode(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| SessionError::Encoding(e.to_string()))
    }

    fn decode(&self, token: &str) -> Result<SessionClaims, SessionError> {
        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| SessionError::Malformed(e.to_string()))
    }
}

/// Identity a request acts as: output of session resolution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued token with its claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
}

/// Maps opaque tokens to identities and issues new tokens.
#[derive(Clone)]
pub struct SessionResolver {
    codec: Arc<dyn SessionCodec>,
    ttl: Duration,
}

impl SessionResolver {
    pub fn new(codec: Arc<dyn SessionCodec>, ttl: Duration) -> Self {
        Self { codec, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve `token` into an identity.
    ///
    /// `explicit_organization` overrides the token's stored organization for
    /// this call only; nothing is persisted.
    pub fn resolve(
        &self,
        token: Option<&str>,
        explicit_organization: Option<OrganizationId>,
        now: DateTime<Utc>,
    ) -> Result<SessionIdentity, SessionError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(SessionError::Missing)?;

        let claims = self.codec.decode(token)?;
        validate_claims(&claims, now)?;

        Ok(SessionIdentity {
            user_id: claims.sub,
            organization_id: explicit_organization.or(claims.organization_id),
            expires_at: claims.expires_at,
        })
    }

    /// Issue a new session for `user_id` valid for the configured TTL.
    pub fn issue(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionError> {
        self.encode(SessionClaims {
            sub: user_id,
            organization_id,
            issued_at: now,
            expires_at: now + self.ttl,
        })
    }

    /// Re-issue `token` with a new selected organization.
    ///
    /// The original expiry is kept, so switching never extends a session.
    /// Membership in `organization_id` must be checked by the caller.
    pub fn switch_organization(
        &self,
        token: &str,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionError> {
        let identity = self.resolve(Some(token), None, now)?;

        self.encode(SessionClaims {
            sub: identity.user_id,
            organization_id: Some(organization_id),
            issued_at: now,
            expires_at: identity.expires_at,
        })
    }

    fn encode(&self, claims: SessionClaims) -> Result<IssuedSession, SessionError> {
        let token = self.codec.encode(&claims)?;
        Ok(IssuedSession { token, claims })
    }
}
