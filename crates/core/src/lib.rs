//! `bizgate-core`: identity foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{OrganizationId, PermissionGroupId, PermissionId, RoleId, UserId};
