//! Shared state and the HTTP router.

use axum::Router;
use axum::routing::{any, get};
use portcullis_access::UserFilter;
use portcullis_core::Result;
use portcullis_identity::OidcAuthenticator;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{self, CALLBACK_PATH, INFO_PATH, LOGOUT_PATH, UNALLOWED_PATH};
use crate::config::{GatewayConfig, SessionConfig};
use crate::error::StartupError;
use crate::pages::Pages;
use crate::passthrough::PassthroughMatcher;
use crate::proxy::Forwarder;
use crate::session::SessionStore;

/// Shared application state.
pub struct AppState {
    /// Provider client for building login URLs and exchanging codes.
    pub authenticator: OidcAuthenticator,
    /// Live allow-list.
    pub filter: UserFilter,
    pub sessions: SessionStore,
    pub forwarder: Forwarder,
    pub passthroughs: PassthroughMatcher,
    pub pages: Pages,
    pub session_config: SessionConfig,
    /// Show the token page after login instead of redirecting.
    pub token_display: bool,
}

impl AppState {
    /// Assembles the state from its two slow-to-build parts and the validated configuration.
    ///
    /// # Errors
    ///
    /// Fails if the upstream client or the page templates cannot be built.
    pub fn new(
        authenticator: OidcAuthenticator,
        filter: UserFilter,
        config: &GatewayConfig,
    ) -> Result<Self, StartupError> {
        let forwarder = Forwarder::new(config.target_url.clone())?;
        let pages = Pages::new().map_err(|e| StartupError::Init {
            component: "page templates".to_string(),
            details: e.to_string(),
        })?;
        Ok(Self {
            authenticator,
            filter,
            sessions: SessionStore::from_config(&config.session),
            forwarder,
            passthroughs: PassthroughMatcher::new(&config.passthroughs),
            pages,
            session_config: config.session.clone(),
            token_display: config.token_display,
        })
    }
}

/// Builds the gateway router.
///
/// Reserved paths are explicit routes so they always win over passthrough
/// patterns; everything else lands in the gate.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, any(auth::callback))
        .route(LOGOUT_PATH, get(auth::logout))
        .route(INFO_PATH, get(auth::info))
        .route(UNALLOWED_PATH, get(auth::unallowed))
        .fallback(auth::gate)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
