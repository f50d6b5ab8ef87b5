//! Core engine for polyrun, a multi-language code runner.
//!
//! This crate provides:
//! - Language registry mapping language ids to build/run recipes
//! - Artifact materialization into namespaced scratch directories
//! - Sandboxed process runs with merged, ordered output and cancellation
//! - Persistent terminal sessions
//! - Extension discovery and loading (native libraries and executables)

pub mod config;
pub mod error;
pub mod extension;
pub mod language;
pub mod materialize;
pub mod paths;
pub mod runner;
pub mod terminal;

pub use config::StudioConfig;
pub use error::{Error, Result};
pub use extension::{
    ActionOutput, ExtensionKind, ExtensionLoader, ExtensionManifest, ExtensionRecord,
    ExtensionRegistry, ExtensionWatcher, LoadStatus,
};
pub use language::{CleanupPolicy, CommandTemplate, LanguageRecipe, LanguageRegistry, RecipeKind};
pub use materialize::{Artifact, Materializer};
pub use paths::StudioDirs;
pub use runner::{
    Channel, Deadline, ExecutionHandle, ExecutionRequest, ExecutionStatus, FailureKind,
    FailureReason, KillHandle, OutputChunk, OutputStream, ProcessRunner, RunSlots, RunnerOptions,
    StdinPolicy,
};
pub use terminal::{CommandHistory, ShellOptions, TerminalSession};
