use axum::{
    Router,
    routing::{get, post},
};

use bizgate_infra::IdentityStore;

pub mod common;
pub mod organizations;
pub mod permissions;
pub mod rbac;
pub mod roles;
pub mod session;
pub mod system;
pub mod users;

/// Router for all authenticated endpoints.
pub fn router<S: IdentityStore + 'static>() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami::<S>))
        .route("/me/permissions", get(system::my_permissions))
        .route("/session/organization", post(session::switch_organization::<S>))
        .nest("/admin/users", users::router::<S>())
        .nest("/admin/organizations", organizations::router::<S>())
        .nest("/admin/roles", roles::router::<S>())
        .nest("/admin/permissions", permissions::router::<S>())
        .nest("/admin/permission-groups", permissions::groups_router::<S>())
        .nest("/admin/rbac", rbac::router::<S>())
}

/// Routes reachable without a session.
pub fn public_router<S: IdentityStore + 'static>() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/auth/login", post(session::login::<S>))
        .route("/auth/logout", post(session::logout))
}
