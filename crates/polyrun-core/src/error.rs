//! Error types for polyrun-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for polyrun-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in polyrun-core.
///
/// A run that is cancelled or times out is not an error: it ends with
/// [`ExecutionStatus::Killed`](crate::runner::ExecutionStatus::Killed).
#[derive(Debug, Error)]
pub enum Error {
    /// No recipe registered for the language id.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// Scratch file or directory could not be written or read.
    #[error("IO error at {}: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error without a meaningful path.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The build step of a compiled language exited nonzero.
    #[error("build failed for {language}:\n{diagnostics}")]
    Build {
        language: String,
        diagnostics: String,
    },

    /// The executable could not be started.
    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },

    /// An extension candidate failed to load.
    #[error("failed to load extension {}: {message}", path.display())]
    ExtensionLoad { path: PathBuf, message: String },

    /// Extension manifest is malformed.
    #[error("invalid extension manifest: {0}")]
    Manifest(String),

    /// No loaded extension with this id.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// Extension does not expose the requested action.
    #[error("extension {extension} has no action '{action}'")]
    ActionNotFound { extension: String, action: String },

    /// Directory watch could not be set up.
    #[error("watch error: {0}")]
    Watch(String),

    /// Configuration or recipe table could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation on a terminal session that has been closed.
    #[error("terminal session {0} is closed")]
    SessionClosed(u64),

    /// The run was cancelled while it was still being built.
    #[error("run cancelled before it started")]
    Cancelled,

    /// Invalid operation (e.g., writing to a run started without stdin).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Wrap an IO error with the scratch path it happened on.
    pub fn scratch(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Scratch {
            path: path.into(),
            source,
        }
    }

    /// Recovery hint shown to users alongside the error, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnknownLanguage(_) => {
                Some("run `polyrun languages` to list supported language ids")
            }
            Self::Spawn { .. } => Some(
                "the interpreter or compiler was not found; install it or add it to PATH",
            ),
            Self::Scratch { .. } => {
                Some("check that the scratch directory is writable or set `scratch_dir`")
            }
            Self::ExtensionLoad { .. } | Self::Manifest(_) => Some(
                "extensions must export a JSON manifest; see the polyrun-extension crate",
            ),
            Self::Config(_) => Some("fix or delete the configuration file to restore defaults"),
            _ => None,
        }
    }

    /// Format the error followed by its hint.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
