use serde::{Deserialize, Serialize};

use bizgate_core::{DomainResult, Entity, RoleId};

use crate::permissions::validate_display_name;

/// Role definition.
///
/// Roles are global; a role is *granted* to a user within one organization,
/// and its permission set is the same everywhere it is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
}

impl Entity for Role {
    type Id = RoleId;
    const KIND: &'static str = "role";

    fn id(&self) -> RoleId {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CreateRole {
    pub fn validate(&self) -> DomainResult<()> {
        validate_display_name("role", &self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl UpdateRole {
    pub fn validate(&self) -> DomainResult<()> {
        match &self.name {
            Some(name) => validate_display_name("role", name),
            None => Ok(()),
        }
    }

    pub fn apply_to(&self, role: &mut Role) {
        if let Some(name) = &self.name {
            role.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            role.description = description.clone();
        }
    }
}
