use bizgate_auth::Principal;
use bizgate_core::{OrganizationId, UserId};

/// Resolved principal for a request (identity + fresh permission set).
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.principal.organization_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

/// The raw session token the request authenticated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    token: String,
}

impl SessionContext {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}
