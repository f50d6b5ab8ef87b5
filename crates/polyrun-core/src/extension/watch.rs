//! Debounced watch of an extensions directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::loader::ExtensionLoader;
use super::registry::ExtensionRegistry;

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Reports batches of changed paths in one directory.
pub struct ExtensionWatcher {
    /// Debouncer handle (kept alive to maintain the watch).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    dir: PathBuf,
}

impl ExtensionWatcher {
    /// Watch `dir` (non-recursively).
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events
                        .into_iter()
                        .map(|event| event.path)
                        .filter(|path| {
                            !path
                                .file_name()
                                .is_some_and(|name| name.to_string_lossy().starts_with('.'))
                        })
                        .collect();
                    if !paths.is_empty() {
                        let _ = tx.send(paths);
                    }
                }
                Err(e) => tracing::warn!("Extension watch error: {}", e),
            }
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watch(e.to_string()))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Wait for the next batch of changes.
    pub async fn changed(&mut self) -> Option<Vec<PathBuf>> {
        self.rx.recv().await
    }

    /// Rescan into `registry` after every change until the watcher stops.
    pub async fn drive(mut self, registry: &ExtensionRegistry, loader: &ExtensionLoader) {
        while let Some(paths) = self.changed().await {
            tracing::debug!("Extension directory changed: {:?}", paths);
            if let Err(e) = registry.rescan(loader, &self.dir).await {
                tracing::warn!("Rescan of {} failed: {}", self.dir.display(), e);
            }
        }
    }
}

impl std::fmt::Debug for ExtensionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watcher_creation() {
        let temp = TempDir::new().unwrap();
        let watcher = ExtensionWatcher::new(temp.path()).unwrap();
        assert_eq!(watcher.dir(), temp.path());
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let err = ExtensionWatcher::new(temp.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::Watch(_)));
    }
}
