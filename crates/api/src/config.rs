//! Process configuration, read from the environment.

use chrono::Duration;
use thiserror::Error;

use bizgate_auth::PrivilegePolicy;
use bizgate_infra::BootstrapAdmin;

const DEV_SESSION_SECRET: &str = "bizgate-dev-session-secret-change-me!!";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("{0} must be set together with {1}")]
    Incomplete(&'static str, &'static str),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub session_secret: String,
    pub session_ttl: Duration,
    /// `None` selects the in-memory identity store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub privilege_policy: PrivilegePolicy,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    /// Adds `Secure` to the session cookie.
    pub secure_cookies: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            session_secret: DEV_SESSION_SECRET.to_string(),
            session_ttl: Duration::minutes(480),
            database_url: None,
            database_max_connections: 10,
            privilege_policy: PrivilegePolicy::default(),
            bootstrap_admin: None,
            secure_cookies: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let session_secret = match get("SESSION_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!("SESSION_SECRET not set; using insecure dev default");
                defaults.session_secret
            }
        };

        let session_ttl = match get("SESSION_TTL_MINUTES") {
            Some(raw) => {
                let minutes: i64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: "SESSION_TTL_MINUTES",
                    message: format!("'{raw}' is not a whole number of minutes"),
                })?;
                if minutes <= 0 {
                    return Err(ConfigError::Invalid {
                        key: "SESSION_TTL_MINUTES",
                        message: "must be positive".to_string(),
                    });
                }
                Duration::minutes(minutes)
            }
            None => defaults.session_ttl,
        };

        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                message: format!("'{raw}' is not a valid connection count"),
            })?,
            None => defaults.database_max_connections,
        };

        let privilege_policy = match get("PRIVILEGE_POLICY") {
            Some(raw) => raw.parse().map_err(|e: bizgate_core::DomainError| ConfigError::Invalid {
                key: "PRIVILEGE_POLICY",
                message: e.to_string(),
            })?,
            None => defaults.privilege_policy,
        };

        let bootstrap_admin = match (get("BOOTSTRAP_ADMIN_EMAIL"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => {
                let mut seed = BootstrapAdmin::new(email, password);
                if let Some(org) = get("BOOTSTRAP_ORGANIZATION") {
                    seed.organization_name = org;
                }
                Some(seed)
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Incomplete("BOOTSTRAP_ADMIN_EMAIL", "BOOTSTRAP_ADMIN_PASSWORD"));
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete("BOOTSTRAP_ADMIN_PASSWORD", "BOOTSTRAP_ADMIN_EMAIL"));
            }
        };

        Ok(Self {
            bind_addr: get("BIZGATE_BIND").unwrap_or(defaults.bind_addr),
            session_secret,
            session_ttl,
            database_url: get("DATABASE_URL"),
            database_max_connections,
            privilege_policy,
            bootstrap_admin,
            secure_cookies: get("SESSION_COOKIE_SECURE").is_some_and(|v| v == "true" || v == "1"),
        })
    }
}
