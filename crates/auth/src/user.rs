//! User identity records.
//!
//! Users are global; organization membership and grants live in the
//! association tables managed by the assignment engine.

use serde::{Deserialize, Serialize};

use bizgate_core::{DomainError, DomainResult, Entity, UserId};

/// A registered user.
///
/// The credential hash is never serialized; API responses can return a `User`
/// directly without leaking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
}

impl Entity for User {
    type Id = UserId;
    const KIND: &'static str = "user";

    fn id(&self) -> UserId {
        self.id
    }
}

/// Input for creating a user. The credential is already hashed by the caller.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub display_name: String,
    pub email: String,
    pub credential_hash: String,
}

impl CreateUser {
    /// Validate and normalize (trimmed display name, lowercase email).
    pub fn normalized(self) -> DomainResult<Self> {
        let email = normalize_email(&self.email)?;

        if self.display_name.trim().is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }

        if self.credential_hash.is_empty() {
            return Err(DomainError::validation("credential hash cannot be empty"));
        }

        Ok(Self {
            display_name: self.display_name.trim().to_string(),
            email,
            credential_hash: self.credential_hash,
        })
    }
}

/// Partial profile update.
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub credential_hash: Option<String>,
}

impl UpdateUser {
    pub fn normalized(self) -> DomainResult<Self> {
        let email = self.email.as_deref().map(normalize_email).transpose()?;

        let display_name = match self.display_name {
            Some(name) if name.trim().is_empty() => {
                return Err(DomainError::validation("display name cannot be empty"));
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };

        Ok(Self {
            display_name,
            email,
            credential_hash: self.credential_hash,
        })
    }

    pub fn apply_to(&self, user: &mut User) {
        if let Some(display_name) = &self.display_name {
            user.display_name = display_name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(hash) = &self.credential_hash {
            user.credential_hash = hash.clone();
        }
    }
}

/// Emails are unique case-insensitively, so they are stored lowercase.
pub fn normalize_email(email: &str) -> DomainResult<String> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(email.to_lowercase())
}
