use std::sync::Arc;

use bizgate_auth::{Hs256SessionCodec, SessionResolver};
use bizgate_infra::{AssignmentEngine, AuthorizationGate, IdentityStore, PermissionResolver};

use crate::config::AppConfig;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices<S> {
    pub store: Arc<S>,
    pub engine: AssignmentEngine<Arc<S>>,
    pub gate: AuthorizationGate<Arc<S>>,
    pub secure_cookies: bool,
}

pub fn build_services<S: IdentityStore + 'static>(config: &AppConfig, store: S) -> AppServices<S> {
    let store = Arc::new(store);

    let sessions = SessionResolver::new(
        Arc::new(Hs256SessionCodec::new(config.session_secret.as_bytes())),
        config.session_ttl,
    );
    let resolver = PermissionResolver::new(Arc::clone(&store), config.privilege_policy);

    AppServices {
        engine: AssignmentEngine::new(Arc::clone(&store)),
        gate: AuthorizationGate::new(sessions, resolver),
        store,
        secure_cookies: config.secure_cookies,
    }
}
