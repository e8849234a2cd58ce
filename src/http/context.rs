//! Application state shared by every request handler.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Config;
use crate::oauth::{AuthorizationServer, TokenVerifier};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Token issuance facade behind the `/oauth2` endpoints
    pub auth_server: Arc<AuthorizationServer>,
    /// Verifier backing the bearer-token gate, local or remote
    pub verifier: Arc<dyn TokenVerifier>,
}

impl FromRef<AppState> for Arc<AuthorizationServer> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_server.clone()
    }
}

impl FromRef<AppState> for Arc<dyn TokenVerifier> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.verifier.clone()
    }
}
