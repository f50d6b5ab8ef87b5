//! Extension discovery and loading.
//!
//! Every candidate is loaded inside its own task with a time bound. Errors,
//! panics and timeouts become a [`LoadStatus::Failed`] record; a scan never
//! stops early.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::config::DEFAULT_EXTENSION_LOAD_TIMEOUT_MS;
use crate::error::{Error, Result};

use super::manifest::ExtensionManifest;
use super::native::NativeExtension;
use super::process::ProcessExtension;

/// How an extension is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    /// Dynamic library loaded into the host process.
    Native,
    /// Executable run as a child process per action.
    Process,
}

/// Outcome of loading one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    Failed(String),
}

/// What the loader learned about one candidate file.
#[derive(Debug, Clone)]
pub struct ExtensionRecord {
    pub path: PathBuf,
    /// Manifest id, or the file stem when loading failed.
    pub id: String,
    pub kind: ExtensionKind,
    pub load_status: LoadStatus,
    pub actions: Vec<String>,
    pub manifest: Option<ExtensionManifest>,
}

impl ExtensionRecord {
    pub fn is_loaded(&self) -> bool {
        self.load_status == LoadStatus::Loaded
    }

    fn failed(path: &Path, kind: ExtensionKind, message: String) -> Self {
        Self {
            path: path.to_path_buf(),
            id: file_stem(path),
            kind,
            load_status: LoadStatus::Failed(message),
            actions: Vec::new(),
            manifest: None,
        }
    }

    fn loaded(path: &Path, kind: ExtensionKind, manifest: &ExtensionManifest) -> Self {
        Self {
            path: path.to_path_buf(),
            id: manifest.id.clone(),
            kind,
            load_status: LoadStatus::Loaded,
            actions: manifest.action_names(),
            manifest: Some(manifest.clone()),
        }
    }
}

/// A live extension.
#[derive(Debug)]
pub enum Extension {
    Native(Arc<NativeExtension>),
    Process(ProcessExtension),
}

impl Extension {
    pub fn manifest(&self) -> &ExtensionManifest {
        match self {
            Self::Native(native) => native.manifest(),
            Self::Process(process) => process.manifest(),
        }
    }

    pub fn kind(&self) -> ExtensionKind {
        match self {
            Self::Native(_) => ExtensionKind::Native,
            Self::Process(_) => ExtensionKind::Process,
        }
    }
}

/// One scan result: the record plus the extension when it loaded.
#[derive(Debug)]
pub struct ScannedExtension {
    pub record: ExtensionRecord,
    pub extension: Option<Extension>,
}

/// Scans directories for extensions.
#[derive(Debug, Clone)]
pub struct ExtensionLoader {
    load_timeout: Duration,
}

impl Default for ExtensionLoader {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_EXTENSION_LOAD_TIMEOUT_MS))
    }
}

impl ExtensionLoader {
    pub fn new(load_timeout: Duration) -> Self {
        Self { load_timeout }
    }

    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    /// Candidate files in `dir`, sorted by file name.
    ///
    /// Hidden files, directories and files that are neither libraries nor
    /// executables are skipped. A missing directory has no candidates.
    pub fn candidates(&self, dir: &Path) -> Result<Vec<(PathBuf, ExtensionKind)>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::scratch(dir, e)),
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::scratch(dir, e))?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(metadata) = fs::metadata(&path) else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            if let Some(kind) = classify(&path, &metadata) {
                candidates.push((path, kind));
            }
        }
        candidates.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
        Ok(candidates)
    }

    /// Load every candidate in `dir`, in file-name order.
    pub async fn scan(&self, dir: &Path) -> Result<Vec<ScannedExtension>> {
        let candidates = self.candidates(dir)?;
        let mut results = Vec::with_capacity(candidates.len());
        let mut seen: FxHashMap<String, PathBuf> = FxHashMap::default();

        for (path, kind) in candidates {
            let mut scanned = self.load(&path, kind).await;

            if scanned.record.is_loaded() {
                let id = scanned.record.id.clone();
                if let Some(first) = seen.get(&id) {
                    let message = format!(
                        "duplicate id '{}' (already provided by {})",
                        id,
                        first.display()
                    );
                    scanned = ScannedExtension {
                        record: ExtensionRecord::failed(&path, kind, message),
                        extension: None,
                    };
                } else {
                    seen.insert(id, path.clone());
                }
            }

            if let LoadStatus::Failed(ref message) = scanned.record.load_status {
                tracing::warn!("Extension {} failed to load: {}", path.display(), message);
            }
            results.push(scanned);
        }

        let loaded = results.iter().filter(|s| s.record.is_loaded()).count();
        tracing::info!(
            "Scanned {}: {} loaded, {} failed",
            dir.display(),
            loaded,
            results.len() - loaded
        );
        Ok(results)
    }

    /// Load one candidate inside a failure boundary.
    pub async fn load(&self, path: &Path, kind: ExtensionKind) -> ScannedExtension {
        let task = match kind {
            ExtensionKind::Native => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    NativeExtension::load(&path)
                        .map(|native| Extension::Native(Arc::new(native)))
                })
            }
            ExtensionKind::Process => {
                let path = path.to_path_buf();
                tokio::spawn(async move {
                    ProcessExtension::describe(&path)
                        .await
                        .map(Extension::Process)
                })
            }
        };
        let abort = task.abort_handle();

        let outcome = match tokio::time::timeout(self.load_timeout, task).await {
            Ok(Ok(Ok(extension))) => Ok(extension),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err("extension panicked while loading".to_string())
            }
            Ok(Err(join_error)) => Err(format!("load task failed: {}", join_error)),
            Err(_) => {
                // Stops a describe call; a blocking native load runs on but is discarded
                abort.abort();
                Err(format!(
                    "load timed out after {}ms",
                    self.load_timeout.as_millis()
                ))
            }
        };

        match outcome {
            Ok(extension) => ScannedExtension {
                record: ExtensionRecord::loaded(path, kind, extension.manifest()),
                extension: Some(extension),
            },
            Err(message) => ScannedExtension {
                record: ExtensionRecord::failed(path, kind, message),
                extension: None,
            },
        }
    }
}

fn classify(path: &Path, metadata: &fs::Metadata) -> Option<ExtensionKind> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    if extension.as_deref() == Some(std::env::consts::DLL_EXTENSION) {
        return Some(ExtensionKind::Native);
    }
    if is_executable(extension.as_deref(), metadata) {
        return Some(ExtensionKind::Process);
    }
    None
}

#[cfg(unix)]
fn is_executable(_extension: Option<&str>, metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(extension: Option<&str>, _metadata: &fs::Metadata) -> bool {
    matches!(extension, Some("exe" | "bat" | "cmd"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let loader = ExtensionLoader::default();
        let scanned = loader.scan(&temp.path().join("absent")).await.unwrap();
        assert!(scanned.is_empty());
    }

    #[test]
    fn test_candidates_skip_hidden_and_plain_files() {
        let temp = TempDir::new().unwrap();
        let lib = format!("plugin.{}", std::env::consts::DLL_EXTENSION);
        fs::write(temp.path().join(&lib), b"").unwrap();
        fs::write(temp.path().join("README.md"), b"docs").unwrap();
        fs::write(
            temp.path().join(format!(".hidden.{}", std::env::consts::DLL_EXTENSION)),
            b"",
        )
        .unwrap();
        fs::create_dir(temp.path().join(format!("dir.{}", std::env::consts::DLL_EXTENSION)))
            .unwrap();

        let candidates = ExtensionLoader::default().candidates(temp.path()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0, temp.path().join(lib));
        assert_eq!(candidates[0].1, ExtensionKind::Native);
    }

    #[tokio::test]
    async fn test_garbage_library_is_recorded_as_failed() {
        let temp = TempDir::new().unwrap();
        let path = temp
            .path()
            .join(format!("broken.{}", std::env::consts::DLL_EXTENSION));
        fs::write(&path, b"not a library").unwrap();

        let scanned = ExtensionLoader::default().scan(temp.path()).await.unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].record.id, "broken");
        assert!(matches!(scanned[0].record.load_status, LoadStatus::Failed(_)));
        assert!(scanned[0].extension.is_none());
    }
}
