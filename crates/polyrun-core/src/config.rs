//! User configuration.
//!
//! Stored as pretty-printed JSON at `<config dir>/polyrun/config.json`.
//! Every field has a default, so partial files are fine; a corrupt file is
//! logged and replaced by defaults rather than aborting startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::StudioDirs;

/// Default wall-clock limit for one run.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 30;

/// Default limit for a build step.
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 120;

/// Default delay between the termination signal and the forced kill.
pub const DEFAULT_KILL_GRACE_MS: u64 = 500;

/// Default bound for loading one extension candidate.
pub const DEFAULT_EXTENSION_LOAD_TIMEOUT_MS: u64 = 5_000;

/// User-editable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Per-run wall-clock limit in seconds. `None` disables the limit.
    pub run_timeout_secs: Option<u64>,

    /// Build step limit in seconds.
    pub build_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL, in milliseconds.
    pub kill_grace_ms: u64,

    /// Keep run directories instead of deleting them after each run.
    pub keep_temp_files: bool,

    /// Scratch directory override.
    pub scratch_dir: Option<PathBuf>,

    /// Extensions directory override.
    pub extensions_dir: Option<PathBuf>,

    /// Bound for loading a single extension, in milliseconds.
    pub extension_load_timeout_ms: u64,

    /// Extra recipe table merged over the built-in languages.
    pub recipes_file: Option<PathBuf>,

    /// Shell used by terminal sessions (defaults to `$SHELL` / `cmd.exe`).
    pub shell: Option<String>,

    /// Language the block editor emits; the `blockly` id resolves to it.
    pub blockly_target: String,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: Some(DEFAULT_RUN_TIMEOUT_SECS),
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            keep_temp_files: false,
            scratch_dir: None,
            extensions_dir: None,
            extension_load_timeout_ms: DEFAULT_EXTENSION_LOAD_TIMEOUT_MS,
            recipes_file: None,
            shell: None,
            blockly_target: "javascript".to_string(),
        }
    }
}

impl StudioConfig {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(StudioDirs::default_root)
            .join("polyrun")
            .join("config.json")
    }

    /// Load from the default location.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::try_load_from(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Config load error ({}), using defaults: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from `path`, reporting parse errors.
    pub fn try_load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::scratch(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Write to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::scratch(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to encode config: {}", e)))?;
        fs::write(path, text).map_err(|e| Error::scratch(path, e))
    }

    /// Run timeout as a duration.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Build timeout as a duration.
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Kill grace period as a duration.
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Extension load bound as a duration.
    pub fn extension_load_timeout(&self) -> Duration {
        Duration::from_millis(self.extension_load_timeout_ms)
    }

    /// Resolve the working directories, applying overrides.
    pub fn studio_dirs(&self) -> Result<StudioDirs> {
        let mut dirs = StudioDirs::open_default()?;
        if let Some(ref scratch) = self.scratch_dir {
            dirs = dirs.with_scratch_dir(scratch)?;
        }
        if let Some(ref extensions) = self.extensions_dir {
            dirs = dirs.with_extensions_dir(extensions)?;
        }
        Ok(dirs)
    }
}
