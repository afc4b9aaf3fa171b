//! Parsed allow-list policy.

use portcullis_core::{Claims, Result};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::info;

use crate::AccessError;

/// On-disk shape of the policy.
///
/// ```yaml
/// allowedUsers: [alice]
/// allowedGroups: [ops, dev]
/// allowedEmails: [bob@example.com]
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Document {
    #[serde(default)]
    allowed_users: Vec<String>,
    #[serde(default)]
    allowed_groups: Vec<String>,
    #[serde(default)]
    allowed_emails: Vec<String>,
}

/// Immutable snapshot of who may pass the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    users: HashSet<String>,
    groups: HashSet<String>,
    emails: HashSet<String>,
}

/// The rule that admitted an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    User(String),
    Group(String),
    Email(String),
}

impl AllowList {
    /// Parses policy text. Blank or comment-only text yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidPolicy`] on malformed YAML or unknown keys.
    pub fn parse(text: &str) -> Result<Self, AccessError> {
        if is_blank(text) {
            return Ok(Self::default());
        }
        let document: Document =
            serde_yaml::from_str(text).map_err(|e| AccessError::InvalidPolicy {
                details: e.to_string(),
            })?;
        Ok(Self {
            users: document.allowed_users.into_iter().collect(),
            groups: document.allowed_groups.into_iter().collect(),
            emails: document.allowed_emails.into_iter().collect(),
        })
    }

    /// Returns the rule admitting `claims`, or `None` when denied.
    #[must_use]
    pub fn authorize(&self, claims: &Claims) -> Option<Grant> {
        if let Some(name) = claims.name().filter(|n| self.users.contains(*n)) {
            return Some(Grant::User(name.to_string()));
        }
        if let Some(group) = claims.groups().iter().find(|g| self.groups.contains(*g)) {
            return Some(Grant::Group(group.clone()));
        }
        if let Some(email) = claims.email().filter(|e| self.emails.contains(*e)) {
            if claims.email_verified() {
                return Some(Grant::Email(email.to_string()));
            }
            info!(
                user = %claims.display_name(),
                email = %email,
                "Email is allowed but not verified, ignoring it"
            );
        }
        None
    }

    /// Number of entries across all three categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len() + self.groups.len() + self.emails.len()
    }

    /// Returns true if nothing is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_blank(text: &str) -> bool {
    text.lines().map(str::trim).all(|line| line.is_empty() || line.starts_with('#'))
}
