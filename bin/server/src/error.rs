//! Error types for the gateway process.
//!
//! - `ConfigError`: configuration that cannot be loaded or is inconsistent.
//! - `StartupError`: anything that prevents the listener from opening.
//!
//! Both are fatal. Per-request failures have their own HTTP-aware types next
//! to the handlers that produce them.

use std::fmt;

/// Errors from loading and validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Sources could not be read or deserialized.
    Load { details: String },
    /// A setting is missing or has an unusable value.
    Invalid { field: String, details: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, details: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            details: details.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { details } => write!(f, "unable to load configuration: {details}"),
            Self::Invalid { field, details } => write!(f, "invalid '{field}': {details}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors that abort the process before it serves traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    Config { details: String },
    /// The identity provider is unusable.
    Identity { details: String },
    /// The users configuration could not be loaded.
    Users { name: String, details: String },
    /// A component failed to initialize.
    Init { component: String, details: String },
    Bind { addr: String, details: String },
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "{details}"),
            Self::Identity { details } => {
                write!(f, "unable to instantiate OIDC subsystem: {details}")
            }
            Self::Users { name, details } => {
                write!(f, "unable to load '{name}': {details}")
            }
            Self::Init { component, details } => {
                write!(f, "unable to initialize {component}: {details}")
            }
            Self::Bind { addr, details } => write!(f, "unable to listen on '{addr}': {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_names_the_field() {
        let err = ConfigError::invalid("oidc.client_id", "must be set");
        assert_eq!(err.to_string(), "invalid 'oidc.client_id': must be set");
    }

    #[test]
    fn users_error_names_the_source() {
        let err = StartupError::Users {
            name: "file:///etc/portcullis/users.yml".to_string(),
            details: "not found".to_string(),
        };
        assert!(err.to_string().contains("file:///etc/portcullis/users.yml"));
    }
}
