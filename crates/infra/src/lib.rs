//! Infrastructure layer: identity storage, assignment, resolution and the gate.

pub mod assignment;
pub mod bootstrap;
pub mod gate;
pub mod identity_store;
pub mod resolver;

pub use assignment::AssignmentEngine;
pub use bootstrap::{BootstrapAdmin, SUPER_ADMIN_ROLE, seed_bootstrap_admin};
pub use gate::{AuthorizationGate, GateError};
pub use identity_store::{
    Grant, IdentityError, IdentityResult, IdentityStore, IdentityTransaction,
    InMemoryIdentityStore, PostgresIdentityStore,
};
pub use resolver::PermissionResolver;
