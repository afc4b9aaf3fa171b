//! Portcullis: an authenticating reverse proxy.
//!
//! Every request is either forwarded to the configured upstream (passthrough
//! paths, or a browser holding an authenticated session) or answered with a
//! redirect into an OpenID Connect login. Identities returned by the
//! provider are checked against a live allow-list before a session is
//! granted.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod pages;
pub mod passthrough;
pub mod paths;
pub mod proxy;
pub mod session;
pub mod telemetry;
