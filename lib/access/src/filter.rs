//! Live user filter backed by a watched configuration source.

use portcullis_config_source::{Change, ConfigSource};
use portcullis_core::{Claims, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{AccessError, AllowList, Grant};

/// Authorizes identities against the current allow-list.
///
/// The current [`AllowList`] is an immutable snapshot published through a
/// single-writer watch channel: reloads replace it wholesale, so a
/// validation in flight always sees one consistent policy. A reload that
/// fails to parse is logged and the previous snapshot stays in force.
pub struct UserFilter {
    current: Arc<watch::Sender<Arc<AllowList>>>,
    source: Arc<dyn ConfigSource>,
}

impl UserFilter {
    /// Loads the initial policy from `source` and subscribes to its changes.
    ///
    /// # Errors
    ///
    /// Fails if the source cannot be read or watched, or if the initial
    /// content is not a valid allow-list. The gateway must not start
    /// without a defined policy.
    pub async fn new(source: Arc<dyn ConfigSource>) -> Result<Self, AccessError> {
        let text = source.get().await.map_err(|e| AccessError::Source {
            details: e.to_string(),
        })?;
        let initial = AllowList::parse(&text)?;
        info!(
            source = %source.name(),
            entries = initial.len(),
            "Loaded initial users configuration"
        );

        let (sender, _) = watch::channel(Arc::new(initial));
        let current = Arc::new(sender);

        let target = current.clone();
        let name = source.name().to_string();
        source
            .watch(Box::new(move |change| reload(&target, &name, &change)))
            .await
            .map_err(|e| AccessError::Source {
                details: e.to_string(),
            })?;

        Ok(Self { current, source })
    }

    /// Returns true if `claims` are admitted by the current policy.
    #[must_use]
    pub fn validate(&self, claims: &Claims) -> bool {
        let policy = self.snapshot();
        match policy.authorize(claims) {
            Some(Grant::User(name)) => {
                info!(user = %name, "User is allowed to access");
                true
            }
            Some(Grant::Group(group)) => {
                info!(user = %claims.display_name(), group = %group, "User is allowed to access as group member");
                true
            }
            Some(Grant::Email(email)) => {
                info!(user = %claims.display_name(), email = %email, "User is allowed to access with verified email");
                true
            }
            None => {
                info!(
                    user = %claims.display_name(),
                    email = claims.email().unwrap_or_default(),
                    groups = ?claims.groups(),
                    "User is NOT allowed to access this service"
                );
                false
            }
        }
    }

    /// Decodes raw claims JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidClaims`] if the text cannot be decoded.
    pub fn validate_user(&self, claims_text: &str) -> Result<bool, AccessError> {
        let claims = Claims::from_json(claims_text).map_err(|e| AccessError::InvalidClaims {
            details: e.to_string(),
        })?;
        Ok(self.validate(&claims))
    }

    /// Returns the policy currently in force.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AllowList> {
        self.current.borrow().clone()
    }

    /// Returns a receiver notified on every successful reload.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<AllowList>> {
        self.current.subscribe()
    }

    /// Name of the backing source.
    #[must_use]
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Stops watching the backing source.
    pub fn close(&self) {
        self.source.close();
    }
}

impl Drop for UserFilter {
    fn drop(&mut self) {
        self.source.close();
    }
}

fn reload(current: &watch::Sender<Arc<AllowList>>, name: &str, change: &Change) {
    match AllowList::parse(change.content()) {
        Ok(policy) => {
            if let Change::Deleted = change {
                warn!(source = %name, "Users configuration deleted, nobody is allowed any more");
            }
            info!(source = %name, entries = policy.len(), "Reloaded users configuration");
            current.send_replace(Arc::new(policy));
        }
        Err(e) => {
            error!(
                source = %name,
                error = %e,
                "Error on reloading users configuration, keeping previous version"
            );
        }
    }
}
