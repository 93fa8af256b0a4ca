//! Identity store boundary.
//!
//! Typed CRUD over users, organizations, roles, permissions and permission
//! groups, plus the association tables binding them. Parent deletes cascade
//! to their association rows atomically.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryIdentityStore, InMemoryTransaction};
pub use postgres::{PostgresIdentityStore, PostgresTransaction};
pub use r#trait::{
    Grant, IdentityError, IdentityResult, IdentityStore, IdentityTransaction,
};
