use serde::{Deserialize, Serialize};

use bizgate_core::{DomainResult, Entity, OrganizationId};

use crate::permissions::validate_display_name;

/// An organization (tenant). Names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub description: String,
}

impl Entity for Organization {
    type Id = OrganizationId;
    const KIND: &'static str = "organization";

    fn id(&self) -> OrganizationId {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CreateOrganization {
    pub fn validate(&self) -> DomainResult<()> {
        validate_display_name("organization", &self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl UpdateOrganization {
    pub fn validate(&self) -> DomainResult<()> {
        match &self.name {
            Some(name) => validate_display_name("organization", name),
            None => Ok(()),
        }
    }

    pub fn apply_to(&self, organization: &mut Organization) {
        if let Some(name) = &self.name {
            organization.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            organization.description = description.clone();
        }
    }
}
