//! Identity claims used for authorization decisions.
//!
//! The gateway decodes the ID token payload exactly once, at the OIDC
//! callback boundary, into a [`Claims`] value. The raw JSON text is kept
//! alongside it for display in the session, but authorization only ever
//! sees the typed value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subset of the ID token claims the allow-list is evaluated against.
///
/// Every field is optional in the token; providers omit what they do not
/// know. Empty strings are treated the same as absent values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    groups: Option<Vec<String>>,
}

impl Claims {
    /// Decodes claims from the JSON payload of an ID token.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimsError::Malformed`] if the text is not a JSON object
    /// or one of the checked fields has the wrong type.
    pub fn from_json(text: &str) -> crate::Result<Self, ClaimsError> {
        Ok(serde_json::from_str(text).map_err(|e| ClaimsError::Malformed {
            details: e.to_string(),
        })?)
    }

    /// Returns the user name, if present and non-empty.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Returns the email address, if present and non-empty.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.is_empty())
    }

    /// Returns true if the provider asserted the email address is verified.
    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    /// Returns the group memberships (empty when the claim is absent).
    #[must_use]
    pub fn groups(&self) -> &[String] {
        self.groups.as_deref().unwrap_or_default()
    }

    /// Sets the user name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the email address and its verification flag.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    /// Sets the group memberships.
    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Short identifier for log lines.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name().or_else(|| self.email()).unwrap_or("<anonymous>")
    }
}

/// Errors from decoding identity claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    /// The claims payload could not be decoded.
    Malformed { details: String },
}

impl fmt::Display for ClaimsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { details } => write!(f, "malformed claims: {details}"),
        }
    }
}

impl std::error::Error for ClaimsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_provider_payload_and_ignores_unknown_claims() {
        let claims = Claims::from_json(
            r#"{
                "iss": "https://dex.example.com",
                "sub": "CgVhbGljZRIEbGRhcA",
                "aud": "gateway",
                "name": "alice",
                "email": "alice@example.com",
                "email_verified": true,
                "groups": ["ops", "dev"]
            }"#,
        )
        .expect("decode");

        assert_eq!(claims.name(), Some("alice"));
        assert_eq!(claims.email(), Some("alice@example.com"));
        assert!(claims.email_verified());
        assert_eq!(claims.groups(), ["ops".to_string(), "dev".to_string()]);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let claims = Claims::from_json(r#"{"sub": "x", "groups": null}"#).expect("decode");

        assert_eq!(claims.name(), None);
        assert_eq!(claims.email(), None);
        assert!(!claims.email_verified());
        assert!(claims.groups().is_empty());
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let claims = Claims::from_json(r#"{"name": "", "email": ""}"#).expect("decode");
        assert_eq!(claims.name(), None);
        assert_eq!(claims.email(), None);
        assert_eq!(claims.display_name(), "<anonymous>");
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(Claims::from_json("not json").is_err());
        assert!(Claims::from_json(r#"{"groups": "ops"}"#).is_err());
        assert!(Claims::from_json(r#"{"email_verified": "yes"}"#).is_err());
    }

    #[test]
    fn builders_set_fields() {
        let claims = Claims::default()
            .with_name("bob")
            .with_email("bob@example.com", false)
            .with_groups(["qa"]);

        assert_eq!(claims.display_name(), "bob");
        assert!(!claims.email_verified());
        assert_eq!(claims.groups(), ["qa".to_string()]);
    }
}
