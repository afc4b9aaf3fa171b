//! Error types for the identity crate.
//!
//! - `OidcError`: provider-side or configuration failures. At startup these
//!   are fatal; during a callback they map to a server error.
//! - `CallbackError`: a callback request the gateway refuses to act on.
//!   These are always the client's fault.

use std::fmt;

/// Errors from talking to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidcError {
    /// Invalid configuration (URLs, CA bundle, HTTP client setup).
    Configuration { details: String },
    /// Provider metadata could not be fetched or was malformed.
    Discovery { issuer: String, details: String },
    /// A configured scope is not advertised by the provider.
    UnsupportedScope { scope: String },
    /// The authorization code could not be exchanged.
    TokenExchange { details: String },
    /// The returned ID token failed verification or could not be decoded.
    TokenValidation { details: String },
}

impl fmt::Display for OidcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { details } => {
                write!(f, "OIDC configuration error: {details}")
            }
            Self::Discovery { issuer, details } => {
                write!(f, "failed to query provider '{issuer}': {details}")
            }
            Self::UnsupportedScope { scope } => {
                write!(f, "scope '{scope}' is not supported by this OIDC server")
            }
            Self::TokenExchange { details } => {
                write!(f, "failed to get token: {details}")
            }
            Self::TokenValidation { details } => {
                write!(f, "failed to verify ID token: {details}")
            }
        }
    }
}

impl std::error::Error for OidcError {}

/// Reasons a callback request is rejected before any token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// Only `GET` callbacks are accepted.
    MethodNotAllowed { method: String },
    /// The provider reported an error instead of issuing a code.
    Provider { error: String, description: String },
    /// No authorization code was present.
    MissingCode,
    /// No login attempt is pending for this session.
    NoPendingLogin,
    /// The `state` parameter does not match the pending login attempt.
    StateMismatch { received: Option<String> },
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotAllowed { method } => {
                write!(f, "method not implemented: {method}")
            }
            Self::Provider { error, description } => {
                write!(f, "{error}: {description}")
            }
            Self::MissingCode => write!(f, "no code in request"),
            Self::NoPendingLogin => write!(f, "no login in progress for this session"),
            Self::StateMismatch { received: Some(state) } => {
                write!(f, "unexpected state {state:?}")
            }
            Self::StateMismatch { received: None } => write!(f, "no state in request"),
        }
    }
}

impl std::error::Error for CallbackError {}
