//! Error types for the access crate.

use std::fmt;

/// Errors from loading policy or evaluating claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The allow-list text could not be parsed.
    InvalidPolicy { details: String },
    /// The policy source could not be read or watched.
    Source { details: String },
    /// The claims presented for validation were malformed.
    InvalidClaims { details: String },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPolicy { details } => {
                write!(f, "invalid allow-list: {details}")
            }
            Self::Source { details } => {
                write!(f, "allow-list source error: {details}")
            }
            Self::InvalidClaims { details } => {
                write!(f, "unable to decode claims: {details}")
            }
        }
    }
}

impl std::error::Error for AccessError {}
