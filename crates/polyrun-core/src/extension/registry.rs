//! Process-wide extension registry.
//!
//! Readers get an `Arc` to the record that was current when they looked; a
//! rescan swaps whole entries, so nobody observes a half-updated extension.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};

use super::loader::{Extension, ExtensionLoader, ExtensionRecord};
use super::manifest::ActionSpec;
use super::process::ActionOutput;

static GLOBAL: LazyLock<ExtensionRegistry> = LazyLock::new(ExtensionRegistry::new);

/// A loaded extension and its record.
#[derive(Debug)]
pub struct RegisteredExtension {
    pub record: ExtensionRecord,
    pub extension: Extension,
}

#[derive(Debug, Default)]
struct State {
    /// Loaded extensions by id.
    loaded: FxHashMap<String, Arc<RegisteredExtension>>,
    /// Latest failure per candidate path.
    failed: FxHashMap<PathBuf, ExtensionRecord>,
}

/// Extensions keyed by id.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    state: RwLock<State>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static ExtensionRegistry {
        &GLOBAL
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan `dir` and merge the results.
    ///
    /// - a loaded candidate replaces the entry for its id
    /// - a failed candidate is recorded but never evicts a loaded extension
    /// - extensions from `dir` whose file is gone are dropped
    /// - entries from other directories are untouched
    ///
    /// Returns the records of this scan in file-name order.
    pub async fn rescan(
        &self,
        loader: &ExtensionLoader,
        dir: &Path,
    ) -> Result<Vec<ExtensionRecord>> {
        let scanned = loader.scan(dir).await?;
        let listed: FxHashSet<PathBuf> = scanned.iter().map(|s| s.record.path.clone()).collect();
        let records: Vec<ExtensionRecord> = scanned.iter().map(|s| s.record.clone()).collect();

        let mut state = self.write();
        state.failed.retain(|path, _| path.parent() != Some(dir));
        state.loaded.retain(|id, entry| {
            let path = &entry.record.path;
            let keep = path.parent() != Some(dir) || listed.contains(path);
            if !keep {
                tracing::info!("Extension {} removed ({} is gone)", id, path.display());
            }
            keep
        });

        for scanned in scanned {
            let record = scanned.record;
            match scanned.extension {
                Some(extension) => {
                    // The file may now provide a different id
                    state
                        .loaded
                        .retain(|id, entry| entry.record.path != record.path || *id == record.id);
                    let id = record.id.clone();
                    let entry = Arc::new(RegisteredExtension { record, extension });
                    if let Some(previous) = state.loaded.insert(id.clone(), entry) {
                        tracing::debug!(
                            "Extension {} replaced (was {})",
                            id,
                            previous.record.path.display()
                        );
                    }
                }
                None => {
                    state.failed.insert(record.path.clone(), record);
                }
            }
        }
        Ok(records)
    }

    /// Loaded extension by id.
    pub fn get(&self, id: &str) -> Option<Arc<RegisteredExtension>> {
        self.read().loaded.get(id).cloned()
    }

    /// All records: loaded extensions plus candidates whose latest load
    /// failed, sorted by path.
    pub fn list(&self) -> Vec<ExtensionRecord> {
        let state = self.read();
        let mut records: Vec<ExtensionRecord> = state
            .loaded
            .values()
            .map(|entry| entry.record.clone())
            .chain(state.failed.values().cloned())
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Ids of loaded extensions, sorted.
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().loaded.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Actions exposed by a loaded extension.
    pub fn actions(&self, id: &str) -> Result<Vec<ActionSpec>> {
        let entry = self
            .get(id)
            .ok_or_else(|| Error::ExtensionNotFound(id.to_string()))?;
        Ok(entry.extension.manifest().actions.clone())
    }

    /// Run an action of a loaded extension.
    ///
    /// Native actions run on the blocking pool; their output goes straight
    /// to the host's stdio, so only the code is captured.
    pub async fn invoke(&self, id: &str, action: &str, payload: &str) -> Result<ActionOutput> {
        let entry = self
            .get(id)
            .ok_or_else(|| Error::ExtensionNotFound(id.to_string()))?;
        if !entry.extension.manifest().has_action(action) {
            return Err(Error::ActionNotFound {
                extension: id.to_string(),
                action: action.to_string(),
            });
        }
        tracing::debug!("Invoking {}::{}", id, action);

        match &entry.extension {
            Extension::Process(process) => process.invoke(action, payload).await,
            Extension::Native(native) => {
                let native = Arc::clone(native);
                let action = action.to_string();
                let payload = payload.to_string();
                let code = tokio::task::spawn_blocking(move || native.invoke(&action, &payload))
                    .await
                    .map_err(|e| {
                        Error::InvalidOperation(format!("extension '{}' crashed: {}", id, e))
                    })??;
                Ok(ActionOutput {
                    code,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().loaded.is_empty()
    }
}
