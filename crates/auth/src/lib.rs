//! `bizgate-auth`: pure authentication/authorization boundary.
//!
//! This crate is decoupled from HTTP and storage: it defines the identity
//! model, the privileged-bypass policy, the gate decision table and session
//! tokens. Resolution against a store lives in `bizgate-infra`.

pub mod authorize;
pub mod organization;
pub mod password;
pub mod permissions;
pub mod resolution;
pub mod roles;
pub mod session;
pub mod user;

pub use authorize::{
    AuthorizationExplanation, AuthzDecision, AuthzError, CommandAuthorization, MatchMode,
    Principal, authorize, authorize_command, explain_authorization,
};
pub use organization::{CreateOrganization, Organization, UpdateOrganization};
pub use password::{PasswordError, hash_password, verify_password};
pub use permissions::{
    ALL_ACCESS, CreatePermission, CreatePermissionGroup, Permission, PermissionGroup,
    PermissionName, UpdatePermission, UpdatePermissionGroup, admin,
};
pub use resolution::{PrivilegePolicy, ResolvedPermissions};
pub use roles::{CreateRole, Role, UpdateRole};
pub use session::{
    Hs256SessionCodec, IssuedSession, SessionClaims, SessionCodec, SessionError, SessionIdentity,
    SessionResolver, validate_claims,
};
pub use user::{CreateUser, UpdateUser, User, normalize_email};
