//! Native (dynamic library) extensions.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use polyrun_extension::{
    ABI_VERSION, ABI_VERSION_SYMBOL, AbiVersionFn, INVOKE_SYMBOL, InvokeFn, MANIFEST_SYMBOL,
    ManifestFn,
};

use crate::error::{Error, Result};

use super::manifest::ExtensionManifest;

/// A loaded dynamic library exporting the polyrun extension ABI.
pub struct NativeExtension {
    path: PathBuf,
    manifest: ExtensionManifest,
    /// Copied out of the library; valid while `_library` is alive.
    invoke: Option<InvokeFn>,
    _library: Library,
}

impl std::fmt::Debug for NativeExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeExtension")
            .field("path", &self.path)
            .field("id", &self.manifest.id)
            .field("invokable", &self.invoke.is_some())
            .finish()
    }
}

impl NativeExtension {
    /// Load `path` and read its manifest.
    ///
    /// Blocking; library initializers run on the calling thread.
    ///
    /// # Errors
    /// [`Error::ExtensionLoad`] if the library cannot be opened, lacks the
    /// required symbols or was built for another ABI version;
    /// [`Error::Manifest`] if the manifest is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let load_error = |message: String| Error::ExtensionLoad {
            path: path.to_path_buf(),
            message,
        };

        // SAFETY: loading runs the library's initializers; extensions in the
        // extensions directory are trusted to be well-behaved native code
        let library = unsafe { Library::new(path) }.map_err(|e| load_error(e.to_string()))?;

        let version = {
            let func: Symbol<AbiVersionFn> = unsafe { library.get(ABI_VERSION_SYMBOL.as_bytes()) }
                .map_err(|e| load_error(format!("missing {}: {}", ABI_VERSION_SYMBOL, e)))?;
            unsafe { func() }
        };
        if version != ABI_VERSION {
            return Err(load_error(format!(
                "built for extension ABI {}, host speaks {}",
                version, ABI_VERSION
            )));
        }

        let manifest_text = {
            let func: Symbol<ManifestFn> = unsafe { library.get(MANIFEST_SYMBOL.as_bytes()) }
                .map_err(|e| load_error(format!("missing {}: {}", MANIFEST_SYMBOL, e)))?;
            let ptr = unsafe { func() };
            if ptr.is_null() {
                return Err(load_error("manifest symbol returned null".to_string()));
            }
            // SAFETY: the ABI requires a NUL-terminated string with static lifetime
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
        };
        let manifest = ExtensionManifest::from_json(&manifest_text)?;

        let invoke = unsafe { library.get::<InvokeFn>(INVOKE_SYMBOL.as_bytes()) }
            .ok()
            .map(|symbol| *symbol);

        tracing::debug!(
            "Loaded native extension {} from {}",
            manifest.id,
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            invoke,
            _library: library,
        })
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call an action. Blocking; run it off the async executor.
    ///
    /// Returns the extension's status code.
    pub fn invoke(&self, action: &str, payload: &str) -> Result<i32> {
        let invoke = self.invoke.ok_or_else(|| {
            Error::InvalidOperation(format!(
                "extension '{}' does not export {}",
                self.manifest.id, INVOKE_SYMBOL
            ))
        })?;
        let action = CString::new(action)
            .map_err(|_| Error::InvalidOperation("action name contains NUL".to_string()))?;
        let payload = CString::new(payload)
            .map_err(|_| Error::InvalidOperation("payload contains NUL".to_string()))?;

        // SAFETY: both strings outlive the call; the library is still loaded
        Ok(unsafe { invoke(action.as_ptr(), payload.as_ptr()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_garbage_library_fails_to_load() {
        let temp = TempDir::new().unwrap();
        let path = temp
            .path()
            .join(format!("broken{}", std::env::consts::DLL_SUFFIX));
        std::fs::write(&path, b"this is not a shared object").unwrap();

        let err = NativeExtension::load(&path).unwrap_err();
        assert!(matches!(err, Error::ExtensionLoad { .. }));
    }
}
