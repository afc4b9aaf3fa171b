//! Server-side sessions.
//!
//! The browser only carries an opaque ULID in a cookie; everything else lives
//! in the in-process [`SessionStore`]. A session is valid while both clocks
//! hold: the idle timeout, reset on every access, and the absolute lifetime,
//! counted from creation and never extended.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::SessionConfig;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Anti-forgery values of the login attempt in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub state: String,
    pub nonce: String,
}

/// One browser's server-side state.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    /// Access marker; present iff the session is authenticated.
    access_token: Option<String>,
    /// Raw ID token claims as issued.
    claims: Option<String>,
    landing_url: Option<String>,
    pending_login: Option<PendingLogin>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates an empty, unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            created_at: now,
            last_seen: now,
            access_token: None,
            claims: None,
            landing_url: None,
            pending_login: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Returns true if the session carries an access marker.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn claims(&self) -> Option<&str> {
        self.claims.as_deref()
    }

    #[must_use]
    pub fn landing_url(&self) -> Option<&str> {
        self.landing_url.as_deref()
    }

    #[must_use]
    pub fn pending_login(&self) -> Option<&PendingLogin> {
        self.pending_login.as_ref()
    }

    /// Records a new login attempt, replacing any earlier one.
    pub fn begin_login(&mut self, landing_url: String, pending: PendingLogin) {
        self.landing_url = Some(landing_url);
        self.pending_login = Some(pending);
    }

    /// Stores the access marker and claims of a successful login.
    pub fn complete_login(&mut self, access_token: String, claims: String) {
        self.access_token = Some(access_token);
        self.claims = Some(claims);
        self.pending_login = None;
    }

    /// Forgets the pending login attempt; its `state` is single use.
    pub fn abandon_login(&mut self) {
        self.pending_login = None;
    }

    /// Moves the session to a fresh identifier, keeping its contents and clocks.
    pub fn renew_id(&mut self) {
        self.id = SessionId::generate();
    }

    /// Returns true if either the idle timeout or the lifetime has elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, idle_timeout: Duration, lifetime: Duration) -> bool {
        now - self.last_seen >= idle_timeout || now - self.created_at >= lifetime
    }
}

/// In-process session storage.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    idle_timeout: Duration,
    lifetime: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(idle_timeout: Duration, lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
            lifetime,
        }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.idle_timeout(), config.lifetime())
    }

    /// Returns the live session for `id`, refreshing its idle clock.
    ///
    /// An expired session is deleted and reported as absent.
    pub async fn load(&self, id: &SessionId) -> Option<Session> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        if sessions.get(id)?.is_expired(now, self.idle_timeout, self.lifetime) {
            debug!(session = %id, "Session expired");
            sessions.remove(id);
            return None;
        }
        let session = sessions.get_mut(id)?;
        session.last_seen = now;
        Some(session.clone())
    }

    /// Stores `session` under its identifier.
    pub async fn save(&self, session: &Session) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
    }

    /// Deletes a session. Returns true if it existed.
    pub async fn destroy(&self, id: &SessionId) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Deletes every expired session and returns how many were removed.
    pub async fn delete_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.idle_timeout, self.lifetime));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Reads the session identifier from the request cookies.
#[must_use]
pub fn session_id_from(jar: &CookieJar, config: &SessionConfig) -> Option<SessionId> {
    jar.get(&config.cookie_name)
        .map(Cookie::value)
        .filter(|v| !v.is_empty())
        .map(SessionId::from)
}

/// Builds the cookie carrying `id`.
#[must_use]
pub fn session_cookie(config: &SessionConfig, id: &SessionId) -> Cookie<'static> {
    let max_age = i64::try_from(config.lifetime_seconds).unwrap_or(i64::MAX);
    Cookie::build((config.cookie_name.clone(), id.to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age))
        .build()
}

/// Builds a cookie that clears the session cookie.
#[must_use]
pub fn removal_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

#[cfg(test)]
impl Session {
    /// Shifts both clocks into the past.
    pub(crate) fn backdated(mut self, age: Duration) -> Self {
        self.created_at -= age;
        self.last_seen -= age;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::minutes(30), Duration::hours(8))
    }

    #[test]
    fn session_id_display() {
        let id = SessionId::from("01J0000000000000000000000");
        assert_eq!(id.to_string(), "01J0000000000000000000000");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn new_session_is_not_authenticated() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert!(session.landing_url().is_none());
    }

    #[test]
    fn login_lifecycle() {
        let mut session = Session::new();
        session.begin_login(
            "/reports?q=1".to_string(),
            PendingLogin {
                state: "s".to_string(),
                nonce: "n".to_string(),
            },
        );
        assert_eq!(session.pending_login().map(|p| p.state.as_str()), Some("s"));
        assert!(!session.is_authenticated());

        session.complete_login("at".to_string(), r#"{"name":"alice"}"#.to_string());

        assert!(session.is_authenticated());
        assert!(session.pending_login().is_none());
        assert_eq!(session.landing_url(), Some("/reports?q=1"));
    }

    #[test]
    fn empty_access_token_is_not_a_marker() {
        let mut session = Session::new();
        session.complete_login(String::new(), "{}".to_string());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn expiry_uses_both_clocks() {
        let session = Session::new();
        let idle = Duration::minutes(30);
        let lifetime = Duration::hours(8);
        let created = session.created_at();

        assert!(!session.is_expired(created + Duration::minutes(29), idle, lifetime));
        assert!(session.is_expired(created + Duration::minutes(31), idle, lifetime));

        let mut active = session.clone();
        active.last_seen = created + Duration::hours(8);
        assert!(active.is_expired(created + Duration::hours(8) + Duration::minutes(1), idle, lifetime));
    }

    #[tokio::test]
    async fn load_refreshes_idle_clock() {
        let store = store();
        let session = Session::new().backdated(Duration::minutes(20));
        let before = session.last_seen();
        store.save(&session).await;

        let loaded = store.load(session.id()).await.expect("live");

        assert!(loaded.last_seen() > before);
    }

    #[tokio::test]
    async fn idle_session_is_dropped_on_load() {
        let store = store();
        let session = Session::new().backdated(Duration::minutes(31));
        store.save(&session).await;

        assert!(store.load(session.id()).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn renewed_id_replaces_old_one() {
        let store = store();
        let mut session = Session::new();
        store.save(&session).await;
        let old = session.id().clone();

        session.renew_id();
        store.destroy(&old).await;
        store.save(&session).await;

        assert!(store.load(&old).await.is_none());
        assert!(store.load(session.id()).await.is_some());
    }

    #[tokio::test]
    async fn delete_expired_sweeps_only_expired() {
        let store = store();
        store.save(&Session::new()).await;
        store.save(&Session::new().backdated(Duration::hours(9))).await;
        store.save(&Session::new().backdated(Duration::minutes(45))).await;

        assert_eq!(store.delete_expired().await, 2);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn cookie_attributes() {
        let config = SessionConfig::default();
        let id = SessionId::generate();

        let cookie = session_cookie(&config, &id);

        assert_eq!(cookie.name(), "pc_session");
        assert_eq!(cookie.value(), id.as_str());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(86400)));
    }

    #[test]
    fn reads_session_id_from_jar() {
        let config = SessionConfig::default();
        let jar = CookieJar::new().add(Cookie::new("pc_session", "abc"));

        assert_eq!(session_id_from(&jar, &config), Some(SessionId::from("abc")));
        assert_eq!(session_id_from(&CookieJar::new(), &config), None);
    }
}
