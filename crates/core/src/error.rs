//! Input errors for identity records.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rejected input for a user, organization, role or permission record.
///
/// Raised before anything reaches a store. Missing rows, uniqueness conflicts
/// and denied access are reported by the store and gate error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Blank display or entity names, malformed emails, empty credential
    /// hashes, unknown privilege policies.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A `UserId`, `OrganizationId`, `RoleId`, `PermissionId` or
    /// `PermissionGroupId` that is not a UUID.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
