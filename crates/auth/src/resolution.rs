//! Resolved (effective) permissions for an identity.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use bizgate_core::{DomainError, OrganizationId};

use crate::{PermissionName, Role};

/// How the privileged-bypass flag is derived from roles and permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivilegePolicy {
    /// A role name containing "super", a permission name containing "admin"
    /// (both case-insensitive), or the `ALL_ACCESS` sentinel.
    #[default]
    NameHeuristic,

    /// Only the `ALL_ACCESS` sentinel permission.
    SentinelOnly,
}

impl PrivilegePolicy {
    pub fn is_privileged<'a>(
        &self,
        roles: impl IntoIterator<Item = &'a Role>,
        permissions: &BTreeSet<PermissionName>,
    ) -> bool {
        if permissions.iter().any(PermissionName::is_all_access) {
            return true;
        }

        match self {
            PrivilegePolicy::SentinelOnly => false,
            PrivilegePolicy::NameHeuristic => {
                roles
                    .into_iter()
                    .any(|r| r.name.to_lowercase().contains("super"))
                    || permissions
                        .iter()
                        .any(|p| p.as_str().to_lowercase().contains("admin"))
            }
        }
    }
}

impl FromStr for PrivilegePolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name-heuristic" => Ok(Self::NameHeuristic),
            "sentinel-only" => Ok(Self::SentinelOnly),
            other => Err(DomainError::validation(format!(
                "unknown privilege policy '{other}' (expected name-heuristic or sentinel-only)"
            ))),
        }
    }
}

/// Effective permission set for `(user, organization?)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedPermissions {
    /// Organization the resolution was scoped to; `None` means every organization.
    pub organization_id: Option<OrganizationId>,
    pub permissions: BTreeSet<PermissionName>,
    pub roles: Vec<Role>,
    pub is_privileged: bool,
}

impl ResolvedPermissions {
    /// Resolution for an identity with no grants in scope.
    pub fn empty(organization_id: Option<OrganizationId>) -> Self {
        Self {
            organization_id,
            ..Default::default()
        }
    }

    /// Build from held roles and the (deduplicated) names they confer.
    pub fn from_parts(
        organization_id: Option<OrganizationId>,
        mut roles: Vec<Role>,
        permissions: impl IntoIterator<Item = PermissionName>,
        policy: PrivilegePolicy,
    ) -> Self {
        roles.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        roles.dedup_by_key(|r| r.id);

        let permissions: BTreeSet<PermissionName> = permissions.into_iter().collect();
        let is_privileged = policy.is_privileged(&roles, &permissions);

        Self {
            organization_id,
            permissions,
            roles,
            is_privileged,
        }
    }

    pub fn contains(&self, permission: &PermissionName) -> bool {
        self.permissions.contains(permission)
    }
}
