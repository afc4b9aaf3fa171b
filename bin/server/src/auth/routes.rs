//! Handlers for the gateway's reserved endpoints.

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use portcullis_identity::{CallbackError, CallbackParams};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::UNALLOWED_PATH;
use crate::app::AppState;
use crate::paths::is_local_path;
use crate::session::{Session, removal_cookie, session_cookie, session_id_from};

/// Where to send the browser when no landing URL was recorded.
const DEFAULT_LANDING_URL: &str = "/";

/// Completes a login started by the gate.
///
/// The session is left untouched unless the callback is valid and the code
/// exchange succeeds. A denied identity is redirected rather than shown a
/// page, so the single-use callback URL does not stay in the address bar.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    method: Method,
    Query(params): Query<CallbackParams>,
) -> Result<Response, CallbackFailure> {
    let session = load_session(&state, &jar).await;
    let pending = session.as_ref().and_then(|s| s.pending_login().cloned());

    let code = state
        .authenticator
        .check_callback_request(&method, &params, pending.as_ref().map(|p| p.state.as_str()))
        .map_err(CallbackFailure::Rejected)?;
    let (Some(mut session), Some(pending)) = (session, pending) else {
        return Err(CallbackFailure::Rejected(CallbackError::NoPendingLogin));
    };

    let token = state
        .authenticator
        .handle_callback_request(&code, &pending.nonce)
        .await
        .map_err(|e| CallbackFailure::Provider {
            details: e.to_string(),
        })?;
    debug!(claims = %token.raw_claims, "Received claims");

    let landing_url = session
        .landing_url()
        .filter(|url| is_local_path(url))
        .unwrap_or(DEFAULT_LANDING_URL)
        .to_string();

    if !state.filter.validate(&token.claims) {
        session.abandon_login();
        state.sessions.save(&session).await;
        return Ok(Redirect::to(UNALLOWED_PATH).into_response());
    }

    let previous = session.id().clone();
    session.complete_login(token.access_token.clone(), token.raw_claims.clone());
    session.renew_id();
    state.sessions.destroy(&previous).await;
    state.sessions.save(&session).await;
    info!(user = %token.claims.display_name(), "User logged in");

    let jar = jar.add(session_cookie(&state.session_config, session.id()));
    if state.token_display {
        debug!(landing_url = %landing_url, "Displaying token page");
        Ok((jar, state.pages.token(&token, &landing_url)).into_response())
    } else {
        debug!(landing_url = %landing_url, "Redirecting to landing URL");
        Ok((jar, Redirect::to(&landing_url)).into_response())
    }
}

/// Destroys the session and confirms.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let mut landing_url = DEFAULT_LANDING_URL.to_string();
    if let Some(id) = session_id_from(&jar, &state.session_config) {
        if let Some(url) = state
            .sessions
            .load(&id)
            .await
            .and_then(|s| s.landing_url().map(str::to_string))
            .filter(|url| is_local_path(url))
        {
            landing_url = url;
        }
        state.sessions.destroy(&id).await;
    }

    let jar = jar.add(removal_cookie(&state.session_config));
    (jar, state.pages.logout(&landing_url)).into_response()
}

/// Shows the stored access token and claims.
pub async fn info(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = load_session(&state, &jar).await;
    let access_token = session.as_ref().and_then(Session::access_token).unwrap_or_default();
    let claims = session.as_ref().and_then(Session::claims).unwrap_or_default();
    state.pages.info(access_token, claims)
}

/// Static denial page.
pub async fn unallowed(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = load_session(&state, &jar).await;
    let landing_url = session
        .as_ref()
        .and_then(Session::landing_url)
        .filter(|url| is_local_path(url))
        .unwrap_or(DEFAULT_LANDING_URL);
    state.pages.unallowed(landing_url)
}

async fn load_session(state: &AppState, jar: &CookieJar) -> Option<Session> {
    let id = session_id_from(jar, &state.session_config)?;
    state.sessions.load(&id).await
}

/// A callback that could not complete.
#[derive(Debug)]
pub enum CallbackFailure {
    /// The request itself is unacceptable (400).
    Rejected(CallbackError),
    /// The provider exchange failed (500).
    Provider { details: String },
}

impl IntoResponse for CallbackFailure {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected(e) => {
                warn!(error = %e, "Rejected callback request");
                (StatusCode::BAD_REQUEST, e.to_string()).into_response()
            }
            Self::Provider { details } => {
                error!(error = %details, "Login failed");
                (StatusCode::INTERNAL_SERVER_ERROR, details).into_response()
            }
        }
    }
}
