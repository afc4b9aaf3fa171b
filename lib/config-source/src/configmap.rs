//! Kubernetes ConfigMap-backed configuration source.
//!
//! The source follows a single key of a single named ConfigMap. The watch is
//! kept alive across control-plane disconnects: whenever the event stream
//! ends or reports an error, a new watch is opened, retrying every
//! [`RECONNECT_BACKOFF`] until one succeeds. The gateway keeps authorizing
//! with the last delivered policy in the meantime.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use portcullis_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::delivery::Delivery;
use crate::{Change, ConfigSource, OnChange, SourceError};

/// Delay between attempts to re-establish a dropped watch.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Error type of an event feed.
pub type FeedError = Box<dyn std::error::Error + Send + Sync>;

/// Stream of watch events for ConfigMaps.
pub type EventStream = BoxStream<'static, std::result::Result<WatchEvent<ConfigMap>, FeedError>>;

/// Opens watch streams. Implemented by the Kubernetes API; replaced in tests.
#[async_trait]
pub trait EventFeed: Send + Sync + 'static {
    /// Opens a fresh event stream for the watched object.
    async fn open(&self) -> std::result::Result<EventStream, FeedError>;

    /// Fetches the current state of the watched object.
    async fn fetch(&self) -> std::result::Result<Option<ConfigMap>, FeedError>;
}

struct ApiFeed {
    api: Api<ConfigMap>,
    object: String,
}

#[async_trait]
impl EventFeed for ApiFeed {
    async fn open(&self) -> std::result::Result<EventStream, FeedError> {
        let params = WatchParams::default().fields(&format!("metadata.name={}", self.object));
        let stream = self.api.watch(&params, "0").await?;
        Ok(stream.map_err(FeedError::from).boxed())
    }

    async fn fetch(&self) -> std::result::Result<Option<ConfigMap>, FeedError> {
        Ok(self.api.get_opt(&self.object).await?)
    }
}

/// Follows one key of a namespaced ConfigMap.
pub struct ConfigMapSource {
    feed: Arc<dyn EventFeed>,
    object: String,
    key: String,
    name: String,
    backoff: Duration,
    delivery: Arc<Delivery>,
}

impl ConfigMapSource {
    /// Connects using the ambient cluster configuration (in-cluster service
    /// account, or `KUBECONFIG`).
    ///
    /// An empty or absent `namespace` resolves to the namespace this process
    /// runs in, as reported by the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connect`] if no cluster configuration is usable.
    pub async fn connect(
        namespace: Option<&str>,
        object: &str,
        key: &str,
    ) -> Result<Self, SourceError> {
        let client = Client::try_default()
            .await
            .map_err(|e| SourceError::Connect {
                details: e.to_string(),
            })?;
        Ok(Self::with_client(client, namespace, object, key))
    }

    /// Builds a source on an existing client.
    #[must_use]
    pub fn with_client(client: Client, namespace: Option<&str>, object: &str, key: &str) -> Self {
        let namespace = namespace
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| client.default_namespace().to_string());
        let feed = ApiFeed {
            api: Api::namespaced(client, &namespace),
            object: object.to_string(),
        };
        Self::with_feed(Arc::new(feed), &namespace, object, key)
    }

    /// Builds a source on an arbitrary event feed.
    #[must_use]
    pub fn with_feed(feed: Arc<dyn EventFeed>, namespace: &str, object: &str, key: &str) -> Self {
        let name = format!("configmap:{namespace}/{object}/{key}");
        Self {
            feed,
            object: object.to_string(),
            key: key.to_string(),
            delivery: Arc::new(Delivery::new(name.clone())),
            name,
            backoff: RECONNECT_BACKOFF,
        }
    }

    /// Overrides the reconnect delay.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl ConfigSource for ConfigMapSource {
    async fn get(&self) -> Result<String, SourceError> {
        let config_map = self
            .feed
            .fetch()
            .await
            .map_err(|e| SourceError::Read {
                name: self.name.clone(),
                details: e.to_string(),
            })?
            .ok_or_else(|| SourceError::NotFound {
                name: self.name.clone(),
            })?;
        Ok(value_of(&config_map, &self.key)
            .ok_or_else(|| SourceError::MissingKey {
                name: self.name.clone(),
                key: self.key.clone(),
            })?
            .to_string())
    }

    async fn watch(&self, on_change: OnChange) -> Result<(), SourceError> {
        let stream = self.feed.open().await.map_err(|e| SourceError::Watch {
            name: self.name.clone(),
            details: e.to_string(),
        })?;
        self.delivery.arm(on_change)?;

        let task = WatchTask {
            feed: self.feed.clone(),
            object: self.object.clone(),
            key: self.key.clone(),
            name: self.name.clone(),
            backoff: self.backoff,
            delivery: self.delivery.clone(),
        };
        tokio::spawn(task.run(stream));
        info!(source = %self.name, "Watching ConfigMap for changes");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) {
        self.delivery.close();
    }
}

fn value_of<'a>(config_map: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(String::as_str)
}

/// What the watch loop should do after an event.
enum Next {
    Continue,
    Reconnect,
}

struct WatchTask {
    feed: Arc<dyn EventFeed>,
    object: String,
    key: String,
    name: String,
    backoff: Duration,
    delivery: Arc<Delivery>,
}

impl WatchTask {
    async fn run(self, mut stream: EventStream) {
        let token = self.delivery.token();
        // Whether the current stream has produced a usable event.
        let mut productive = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = stream.next() => next,
            };

            let outcome = match next {
                Some(Ok(event)) => self.handle(event),
                Some(Err(e)) => {
                    warn!(source = %self.name, error = %e, "ConfigMap watch failed");
                    Next::Reconnect
                }
                None => {
                    warn!(source = %self.name, "ConfigMap watch stopped");
                    Next::Reconnect
                }
            };

            match outcome {
                Next::Continue => productive = true,
                Next::Reconnect => {
                    // An unproductive stream waits one backoff before reopening.
                    if !productive && !self.pause().await {
                        break;
                    }
                    match self.reconnect().await {
                        Some(fresh) => stream = fresh,
                        None => break,
                    }
                    productive = false;
                }
            }
        }
        debug!(source = %self.name, "ConfigMap watch closed");
    }

    fn handle(&self, event: WatchEvent<ConfigMap>) -> Next {
        let change = match event {
            WatchEvent::Added(config_map) | WatchEvent::Modified(config_map) => {
                if !self.is_watched(&config_map) {
                    return Next::Continue;
                }
                match value_of(&config_map, &self.key) {
                    Some(text) => Change::Updated(text.to_string()),
                    None => {
                        error!(source = %self.name, key = %self.key, "Key missing from ConfigMap");
                        Change::Deleted
                    }
                }
            }
            WatchEvent::Deleted(config_map) => {
                if !self.is_watched(&config_map) {
                    return Next::Continue;
                }
                warn!(source = %self.name, "ConfigMap has been deleted");
                Change::Deleted
            }
            WatchEvent::Bookmark(_) => return Next::Continue,
            WatchEvent::Error(e) => {
                warn!(source = %self.name, code = e.code, message = %e.message, "ConfigMap watch error event");
                return Next::Reconnect;
            }
        };
        debug!(source = %self.name, "ConfigMap changed");
        self.delivery.deliver(change);
        Next::Continue
    }

    fn is_watched(&self, config_map: &ConfigMap) -> bool {
        config_map.metadata.name.as_deref() == Some(self.object.as_str())
    }

    /// Opens a new watch, retrying until it succeeds or the source closes.
    async fn reconnect(&self) -> Option<EventStream> {
        let token = self.delivery.token();
        loop {
            if token.is_cancelled() {
                return None;
            }
            match self.feed.open().await {
                Ok(stream) => {
                    info!(source = %self.name, "ConfigMap watch restarted");
                    return Some(stream);
                }
                Err(e) => {
                    error!(
                        source = %self.name,
                        error = %e,
                        retry_in_secs = self.backoff.as_secs(),
                        "Unable to restart ConfigMap watch"
                    );
                }
            }
            if !self.pause().await {
                return None;
            }
        }
    }

    /// Waits one backoff period. Returns false if the source closed meanwhile.
    async fn pause(&self) -> bool {
        let token = self.delivery.token();
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}
