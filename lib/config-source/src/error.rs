//! Error types for configuration sources.

use std::fmt;

/// Errors from reading or subscribing to a configuration source.
///
/// Construction and initial-read failures are fatal to the gateway; errors
/// seen later by a background watch are only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Reading the current content failed.
    Read { name: String, details: String },
    /// The backing object does not exist.
    NotFound { name: String },
    /// The backing object exists but lacks the configured key.
    MissingKey { name: String, key: String },
    /// Could not build a client for the backend.
    Connect { details: String },
    /// The change subscription could not be established.
    Watch { name: String, details: String },
    /// `watch` was called a second time on the same source.
    AlreadyWatching { name: String },
    /// The source has been closed.
    Closed { name: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { name, details } => {
                write!(f, "unable to read '{name}': {details}")
            }
            Self::NotFound { name } => write!(f, "'{name}' does not exist"),
            Self::MissingKey { name, key } => {
                write!(f, "'{name}' has no key '{key}'")
            }
            Self::Connect { details } => {
                write!(f, "unable to initialize cluster client: {details}")
            }
            Self::Watch { name, details } => {
                write!(f, "unable to watch '{name}': {details}")
            }
            Self::AlreadyWatching { name } => {
                write!(f, "'{name}' is already being watched")
            }
            Self::Closed { name } => write!(f, "'{name}' has been closed"),
        }
    }
}

impl std::error::Error for SourceError {}
