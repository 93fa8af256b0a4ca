//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, assignment engine and authorization gate
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use bizgate_infra::{IdentityStore, seed_bootstrap_admin};

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Seeds the bootstrap administrator first when one is configured.
pub async fn build_app<S: IdentityStore + 'static>(
    config: &AppConfig,
    store: S,
) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(config, store));

    if let Some(seed) = &config.bootstrap_admin {
        seed_bootstrap_admin(&services.engine, seed).await?;
    }

    let auth_state = middleware::AuthState {
        services: Arc::clone(&services),
    };

    // Protected routes: require a resolvable session.
    let protected = routes::router::<S>().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware::<S>,
    ));

    Ok(Router::new()
        .merge(routes::public_router::<S>())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services))))
}
