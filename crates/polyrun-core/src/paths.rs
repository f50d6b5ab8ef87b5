//! Working directory management.
//!
//! Provides a consistent directory structure so the CLI and any embedding
//! host use the same scratch and extension locations.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory structure used by polyrun.
///
/// ```text
/// <root>/
/// ├── scratch/     # Per-run artifact directories (run-<pid>-<n>/)
/// └── extensions/  # Default extension scan directory
/// ```
#[derive(Debug, Clone)]
pub struct StudioDirs {
    /// The root directory itself.
    pub root: PathBuf,

    /// Shared scratch area; every run gets its own subdirectory.
    pub scratch_dir: PathBuf,

    /// Directory scanned for extensions.
    pub extensions_dir: PathBuf,
}

impl StudioDirs {
    /// Create the directory structure under `root`.
    ///
    /// Creates all necessary directories if they don't exist.
    ///
    /// # Errors
    /// Returns [`Error::Scratch`] if directory creation fails.
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let dirs = Self {
            scratch_dir: root.join("scratch"),
            extensions_dir: root.join("extensions"),
            root,
        };
        dirs.ensure()?;
        Ok(dirs)
    }

    /// Default location: the platform's local data directory, falling back
    /// to the system temp directory.
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("polyrun")
    }

    /// Create the default directory structure.
    pub fn open_default() -> Result<Self> {
        Self::from_root(Self::default_root())
    }

    /// Override the scratch directory (e.g. from configuration).
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        self.scratch_dir = scratch_dir.into();
        self.ensure()?;
        Ok(self)
    }

    /// Override the extensions directory (e.g. from configuration).
    pub fn with_extensions_dir(mut self, extensions_dir: impl Into<PathBuf>) -> Result<Self> {
        self.extensions_dir = extensions_dir.into();
        self.ensure()?;
        Ok(self)
    }

    /// Remove run directories left behind by processes that have exited.
    ///
    /// Directories of this process and of live processes are kept, as is
    /// anything not named `run-<pid>-<n>`. Returns how many were removed.
    pub fn clean_stale_runs(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.scratch_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::scratch(&self.scratch_dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| Error::scratch(&self.scratch_dir, e))?;
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(run_dir_owner) else {
                continue;
            };
            if pid == std::process::id() || process_alive(pid) {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            tracing::info!(
                "Removed {} stale run directories from {}",
                removed,
                self.scratch_dir.display()
            );
        }
        Ok(removed)
    }

    fn ensure(&self) -> Result<()> {
        for dir in [&self.scratch_dir, &self.extensions_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::scratch(dir, e))?;
        }
        Ok(())
    }
}

/// Owning pid of a `run-<pid>-<n>` directory name.
fn run_dir_owner(name: &str) -> Option<u32> {
    let (pid, run) = name.strip_prefix("run-")?.split_once('-')?;
    run.parse::<u64>().ok()?;
    pid.parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

// Without a cheap liveness check, assume the owner may still be running
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_root() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = StudioDirs::from_root(temp.path()).expect("Failed to create dirs");

        assert!(dirs.scratch_dir.ends_with("scratch"));
        assert!(dirs.scratch_dir.exists());
        assert!(dirs.extensions_dir.exists());
    }

    #[test]
    fn test_run_dir_owner() {
        assert_eq!(run_dir_owner("run-4242-7"), Some(4242));
        assert_eq!(run_dir_owner("run-4242"), None);
        assert_eq!(run_dir_owner("run-x-1"), None);
        assert_eq!(run_dir_owner("notes"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_stale_runs_keeps_live_owners() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = StudioDirs::from_root(temp.path()).expect("Failed to create dirs");

        let mut exited = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = exited.id();
        exited.wait().unwrap();

        let stale = dirs.scratch_dir.join(format!("run-{}-1", dead_pid));
        let ours = dirs
            .scratch_dir
            .join(format!("run-{}-1", std::process::id()));
        let other = dirs.scratch_dir.join("notes");
        for dir in [&stale, &ours, &other] {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(stale.join("index.html"), "<p>left over</p>").unwrap();

        assert_eq!(dirs.clean_stale_runs().expect("Failed to clean"), 1);
        assert!(!stale.exists());
        assert!(ours.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_overrides() {
        let temp = TempDir::new().unwrap();
        let dirs = StudioDirs::from_root(temp.path().join("root"))
            .unwrap()
            .with_scratch_dir(temp.path().join("elsewhere"))
            .unwrap();
        assert!(temp.path().join("elsewhere").exists());
        assert_eq!(dirs.scratch_dir, temp.path().join("elsewhere"));
    }
}
