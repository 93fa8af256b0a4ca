use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bizgate_auth::{
    CreateUser, IssuedSession, MatchMode, PasswordError, PermissionName, UpdateUser, hash_password,
};
use bizgate_core::{OrganizationId, PermissionId, RoleId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchOrganizationRequest {
    pub organization_id: OrganizationId,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub expires_at: DateTime<Utc>,
}

impl From<&IssuedSession> for SessionResponse {
    fn from(session: &IssuedSession) -> Self {
        Self {
            token: session.token.clone(),
            user_id: session.claims.sub,
            organization_id: session.claims.organization_id,
            expires_at: session.claims.expires_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub display_name: String,
    pub email: String,
    pub password: String,
}

impl CreateUserRequest {
    /// Hash the password; the plaintext goes no further than this.
    pub fn into_input(self) -> Result<CreateUser, PasswordError> {
        Ok(CreateUser {
            display_name: self.display_name,
            email: self.email,
            credential_hash: hash_password(&self.password)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl UpdateUserRequest {
    pub fn into_patch(self) -> Result<UpdateUser, PasswordError> {
        Ok(UpdateUser {
            display_name: self.display_name,
            email: self.email,
            credential_hash: self.password.as_deref().map(hash_password).transpose()?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetRolePermissionsRequest {
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Deserialize)]
pub struct SetUserOrganizationsRequest {
    pub organization_ids: Vec<OrganizationId>,
}

#[derive(Debug, Deserialize)]
pub struct SetUserRolesRequest {
    pub role_ids: Vec<RoleId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct OrganizationQuery {
    pub organization_id: Option<OrganizationId>,
}

/// `?permission=A,B&mode=any&organization_id=...`
#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub permission: String,
    #[serde(default)]
    pub mode: MatchMode,
    pub organization_id: Option<OrganizationId>,
}

impl ExplainQuery {
    pub fn required(&self) -> Vec<PermissionName> {
        self.permission
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| PermissionName::new(p.to_string()))
            .collect()
    }
}
