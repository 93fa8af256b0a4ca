//! HTTP API: server wiring, session middleware, route guards and handlers.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;

pub use app::build_app;
pub use config::{AppConfig, ConfigError};
