//! Gateway routing.
//!
//! Four reserved paths are owned by the gateway itself:
//!
//! - [`CALLBACK_PATH`]: where the identity provider returns the browser. It
//!   validates the callback, exchanges the code, authorizes the identity and
//!   marks the session authenticated.
//! - [`LOGOUT_PATH`]: destroys the session.
//! - [`INFO_PATH`]: shows what the session holds (debug aid).
//! - [`UNALLOWED_PATH`]: where denied identities are sent.
//!
//! Every other request goes through [`gate`], which either forwards it
//! (passthrough path, or authenticated session) or starts a login.

pub mod gate;
pub mod routes;

pub use gate::gate;
pub use routes::{CallbackFailure, callback, info, logout, unallowed};

pub const CALLBACK_PATH: &str = "/_auth/callback";
pub const LOGOUT_PATH: &str = "/_auth/logout";
pub const INFO_PATH: &str = "/_auth/info";
pub const UNALLOWED_PATH: &str = "/_auth/unallowed";

/// Paths that can never be configured as passthroughs.
pub const RESERVED_PATHS: [&str; 4] = [CALLBACK_PATH, LOGOUT_PATH, INFO_PATH, UNALLOWED_PATH];
