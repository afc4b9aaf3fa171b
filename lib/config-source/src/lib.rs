//! Watchable sources of textual configuration.
//!
//! A [`ConfigSource`] is "a piece of text that can change over time". The
//! gateway reads it once synchronously at startup (so a broken initial
//! policy aborts the process) and then subscribes to changes, receiving the
//! full new content on each one.
//!
//! Two backends are provided:
//! - [`FileSource`]: a local file, watched through the OS notification API.
//!   A dropped watch is logged and not re-established.
//! - [`ConfigMapSource`]: one key of a Kubernetes ConfigMap. A dropped watch
//!   is re-established with a fixed backoff until it succeeds.

pub mod configmap;
mod delivery;
pub mod error;
pub mod file;

use async_trait::async_trait;
use portcullis_core::Result;

pub use configmap::{ConfigMapSource, RECONNECT_BACKOFF};
pub use error::SourceError;
pub use file::FileSource;

/// A change observed on a configuration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The source now holds this full content.
    Updated(String),
    /// The backing object was deleted (or lost the configured key).
    Deleted,
}

impl Change {
    /// Returns the new content; a deletion reads as empty content.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Updated(text) => text,
            Self::Deleted => "",
        }
    }
}

/// Callback invoked once per detected change.
pub type OnChange = Box<dyn Fn(Change) + Send + Sync>;

/// A subscription to one external configuration object.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Returns the current full content.
    async fn get(&self) -> Result<String, SourceError>;

    /// Starts a background subscription delivering every change to `on_change`.
    ///
    /// Fails only if the subscription cannot be established. Errors seen
    /// later by the background task are logged and never surface here.
    async fn watch(&self, on_change: OnChange) -> Result<(), SourceError>;

    /// Stable human-readable identifier, used in logs.
    fn name(&self) -> &str;

    /// Releases the subscription.
    ///
    /// Idempotent. Once this returns the callback will not be invoked again.
    fn close(&self);
}
