//! File-backed configuration source.

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use portcullis_core::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::delivery::Delivery;
use crate::{Change, ConfigSource, OnChange, SourceError};

/// Watches a local file and re-reads it whole on every write.
///
/// OS-level file watches are assumed to last for the life of the process: if
/// the notification channel closes, the loss is logged and automatic reload
/// stops.
pub struct FileSource {
    path: PathBuf,
    name: String,
    delivery: Arc<Delivery>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileSource {
    /// Creates a source for the file at `path`. Nothing is read until [`ConfigSource::get`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file://{}", path.display());
        Self {
            delivery: Arc::new(Delivery::new(name.clone())),
            path,
            name,
            watcher: Mutex::new(None),
        }
    }

    /// Returns the watched path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn get(&self) -> Result<String, SourceError> {
        Ok(read(&self.path, &self.name).await?)
    }

    async fn watch(&self, on_change: OnChange) -> Result<(), SourceError> {
        self.delivery.arm(on_change)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| SourceError::Watch {
            name: self.name.clone(),
            details: e.to_string(),
        })?;
        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| SourceError::Watch {
                name: self.name.clone(),
                details: e.to_string(),
            })?;
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);

        tokio::spawn(watch_file(
            self.path.clone(),
            self.name.clone(),
            self.delivery.clone(),
            rx,
        ));
        info!(source = %self.name, "Watching file for changes");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) {
        self.delivery.close();
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn read(path: &Path, name: &str) -> std::result::Result<String, SourceError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SourceError::Read {
            name: name.to_string(),
            details: e.to_string(),
        })
}

async fn watch_file(
    path: PathBuf,
    name: String,
    delivery: Arc<Delivery>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    let token = delivery.token();
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            None => {
                error!(source = %name, "File watch channel closed, automatic reload disabled");
                break;
            }
            Some(Err(e)) => {
                error!(source = %name, error = %e, "File watch error");
            }
            Some(Ok(event)) if matches!(event.kind, EventKind::Modify(_)) => {
                debug!(source = %name, paths = ?event.paths, "File modified");
                match read(&path, &name).await {
                    Ok(text) => {
                        delivery.deliver(Change::Updated(text));
                    }
                    Err(e) => {
                        error!(source = %name, error = %e, "Unable to re-read file, keeping previous content");
                    }
                }
            }
            Some(Ok(_)) => {}
        }
    }
    debug!(source = %name, "File watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn get_returns_file_content() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, "allowedUsers: [alice]").expect("write");

        let source = FileSource::new(file.path());
        assert_eq!(source.get().await.expect("get"), "allowedUsers: [alice]");
        assert!(source.name().starts_with("file://"));
    }

    #[tokio::test]
    async fn get_on_missing_file_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = FileSource::new(dir.path().join("absent.yml"));
        let err = source.get().await.expect_err("missing file");
        assert!(err.to_string().contains("absent.yml"));
    }

    #[tokio::test]
    async fn write_delivers_new_content() {
        let file = NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), "first").expect("write");

        let source = FileSource::new(file.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        source
            .watch(Box::new(move |change| {
                let _ = tx.send(change);
            }))
            .await
            .expect("watch");

        std::fs::write(file.path(), "second").expect("rewrite");

        let change = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(Change::Updated(text)) if text == "second" => break text,
                    Some(_) => continue,
                    None => panic!("channel closed"),
                }
            }
        })
        .await
        .expect("change delivered");
        assert_eq!(change, "second");

        source.close();
    }

    #[tokio::test]
    async fn watch_twice_is_rejected() {
        let file = NamedTempFile::new().expect("temp file");
        let source = FileSource::new(file.path());
        source.watch(Box::new(|_| {})).await.expect("watch");
        assert!(source.watch(Box::new(|_| {})).await.is_err());
        source.close();
    }

    #[tokio::test]
    async fn no_delivery_after_close() {
        let file = NamedTempFile::new().expect("temp file");
        let source = FileSource::new(file.path());
        let (tx, mut rx) = mpsc::unbounded_channel::<Change>();
        source
            .watch(Box::new(move |change| {
                let _ = tx.send(change);
            }))
            .await
            .expect("watch");

        source.close();
        source.close();
        std::fs::write(file.path(), "after close").expect("write");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(rx.try_recv().is_err());
    }
}
