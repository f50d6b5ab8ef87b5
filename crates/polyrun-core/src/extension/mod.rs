//! Extension discovery, loading and dispatch.
//!
//! Two kinds of extension live in the extensions directory:
//!
//! - native: dynamic libraries exporting the `polyrun-extension` ABI
//! - process: executables answering `--describe` and `invoke <action>`

mod loader;
mod manifest;
mod native;
mod process;
mod registry;
mod watch;

pub use loader::{
    Extension, ExtensionKind, ExtensionLoader, ExtensionRecord, LoadStatus, ScannedExtension,
};
pub use manifest::{ActionSpec, ExtensionManifest};
pub use native::NativeExtension;
pub use process::{ActionOutput, DEFAULT_INVOKE_TIMEOUT, ProcessExtension};
pub use registry::{ExtensionRegistry, RegisteredExtension};
pub use watch::ExtensionWatcher;
