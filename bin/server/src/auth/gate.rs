//! The per-request decision: passthrough, forward, or start a login.

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

use crate::app::AppState;
use crate::paths::{clean_path, is_local_path};
use crate::session::{PendingLogin, Session, session_cookie, session_id_from};

/// Fallback handler for every non-reserved path.
pub async fn gate(State(state): State<Arc<AppState>>, jar: CookieJar, request: Request) -> Response {
    if let Cow::Owned(cleaned) = clean_path(request.uri().path()) {
        return redirect_to_clean(cleaned, request.uri().query());
    }

    if let Some(pattern) = state.passthroughs.matches(request.uri().path()) {
        debug!(method = %request.method(), uri = %request.uri(), pattern, "Forward to target (passthrough)");
        return forward(&state, request).await;
    }

    let session = match session_id_from(&jar, &state.session_config) {
        Some(id) => state.sessions.load(&id).await,
        None => None,
    };

    match session {
        Some(session) if session.is_authenticated() => {
            debug!(method = %request.method(), uri = %request.uri(), "Forward to target (authenticated)");
            forward(&state, request).await
        }
        session => start_login(&state, jar, session, request).await,
    }
}

/// Sends the browser to the canonical spelling of its path, as a mux would.
fn redirect_to_clean(mut cleaned: String, query: Option<&str>) -> Response {
    if let Some(query) = query {
        cleaned.push('?');
        cleaned.push_str(query);
    }
    debug!(location = %cleaned, "Redirecting to canonical path");
    Redirect::permanent(&cleaned).into_response()
}

async fn forward(state: &AppState, request: Request) -> Response {
    match state.forwarder.forward(request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Remembers where the browser wanted to go and sends it to the provider.
async fn start_login(
    state: &AppState,
    jar: CookieJar,
    session: Option<Session>,
    request: Request,
) -> Response {
    let login = state.authenticator.new_login_url();
    let landing_url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|url| is_local_path(url))
        .unwrap_or("/")
        .to_string();

    let (jar, mut session) = match session {
        Some(session) => (jar, session),
        None => {
            let session = Session::new();
            let jar = jar.add(session_cookie(&state.session_config, session.id()));
            (jar, session)
        }
    };
    session.begin_login(
        landing_url,
        PendingLogin {
            state: login.state,
            nonce: login.nonce,
        },
    );
    state.sessions.save(&session).await;

    debug!(method = %request.method(), uri = %request.uri(), "Not logged in, redirecting to provider");
    (jar, Redirect::to(&login.url)).into_response()
}
