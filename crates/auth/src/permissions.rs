use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use bizgate_core::{DomainError, DomainResult, Entity, PermissionGroupId, PermissionId};

/// Permission name: a short machine token such as `ORDER_DELETE`.
///
/// Names are what the gate compares against, so they are modeled as opaque
/// strings rather than a closed enum. The store does not enforce a grammar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionName(Cow<'static, str>);

impl PermissionName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sentinel permission that grants everything on its own.
    pub fn is_all_access(&self) -> bool {
        self.as_str() == ALL_ACCESS.as_str()
    }
}

impl core::fmt::Display for PermissionName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PermissionName {
    fn from(value: &str) -> Self {
        Self(Cow::Owned(value.to_string()))
    }
}

impl From<String> for PermissionName {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// Sentinel permission name that triggers privileged bypass.
pub const ALL_ACCESS: PermissionName = PermissionName::from_static("ALL_ACCESS");

/// Permissions guarding the identity management surface itself.
pub mod admin {
    use super::PermissionName;

    pub const USER_READ: PermissionName = PermissionName::from_static("USER_READ");
    pub const USER_WRITE: PermissionName = PermissionName::from_static("USER_WRITE");
    pub const ORGANIZATION_READ: PermissionName = PermissionName::from_static("ORGANIZATION_READ");
    pub const ORGANIZATION_WRITE: PermissionName =
        PermissionName::from_static("ORGANIZATION_WRITE");
    pub const ROLE_READ: PermissionName = PermissionName::from_static("ROLE_READ");
    pub const ROLE_WRITE: PermissionName = PermissionName::from_static("ROLE_WRITE");
    pub const PERMISSION_READ: PermissionName = PermissionName::from_static("PERMISSION_READ");
    pub const PERMISSION_WRITE: PermissionName = PermissionName::from_static("PERMISSION_WRITE");

    /// Every management permission, in a stable order (used by bootstrap seeding).
    pub fn all() -> [PermissionName; 8] {
        [
            USER_READ,
            USER_WRITE,
            ORGANIZATION_READ,
            ORGANIZATION_WRITE,
            ROLE_READ,
            ROLE_WRITE,
            PERMISSION_READ,
            PERMISSION_WRITE,
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission
// ─────────────────────────────────────────────────────────────────────────────

/// A permission a role may confer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: PermissionName,
    pub description: String,
    pub group_id: Option<PermissionGroupId>,
}

impl Entity for Permission {
    type Id = PermissionId;
    const KIND: &'static str = "permission";

    fn id(&self) -> PermissionId {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermission {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub group_id: Option<PermissionGroupId>,
}

impl CreatePermission {
    pub fn validate(&self) -> DomainResult<()> {
        validate_token_name("permission", &self.name)
    }
}

/// Partial update; `group_id: Some(None)` clears the group reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePermission {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, with = "double_option")]
    pub group_id: Option<Option<PermissionGroupId>>,
}

impl UpdatePermission {
    pub fn validate(&self) -> DomainResult<()> {
        match &self.name {
            Some(name) => validate_token_name("permission", name),
            None => Ok(()),
        }
    }

    pub fn apply_to(&self, permission: &mut Permission) {
        if let Some(name) = &self.name {
            permission.name = PermissionName::from(name.trim());
        }
        if let Some(description) = &self.description {
            permission.description = description.clone();
        }
        if let Some(group_id) = self.group_id {
            permission.group_id = group_id;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission Group
// ─────────────────────────────────────────────────────────────────────────────

/// Presentation-only partition over permissions. Carries no authorization meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    pub id: PermissionGroupId,
    pub name: String,
    pub description: String,
}

impl Entity for PermissionGroup {
    type Id = PermissionGroupId;
    const KIND: &'static str = "permission_group";

    fn id(&self) -> PermissionGroupId {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermissionGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CreatePermissionGroup {
    pub fn validate(&self) -> DomainResult<()> {
        validate_display_name("permission group", &self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePermissionGroup {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl UpdatePermissionGroup {
    pub fn validate(&self) -> DomainResult<()> {
        match &self.name {
            Some(name) => validate_display_name("permission group", name),
            None => Ok(()),
        }
    }

    pub fn apply_to(&self, group: &mut PermissionGroup) {
        if let Some(name) = &self.name {
            group.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            group.description = description.clone();
        }
    }
}

pub(crate) fn validate_display_name(kind: &str, name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation(format!("{kind} name cannot be empty")));
    }
    Ok(())
}

fn validate_token_name(kind: &str, name: &str) -> DomainResult<()> {
    validate_display_name(kind, name)?;
    if name.trim().chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!(
            "{kind} name must not contain whitespace"
        )));
    }
    Ok(())
}

/// Distinguishes an absent field from an explicit `null` in JSON patches.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
