//! ABI for native polyrun extensions.
//!
//! A native extension is a `cdylib` dropped into the extensions directory.
//! The host looks up three symbols:
//!
//! - [`ABI_VERSION_SYMBOL`] - `extern "C" fn() -> u32`, must return [`ABI_VERSION`]
//! - [`MANIFEST_SYMBOL`] - `extern "C" fn() -> *const c_char`, a NUL-terminated
//!   JSON manifest with `'static` lifetime
//! - [`INVOKE_SYMBOL`] (optional) - `extern "C" fn(*const c_char, *const c_char) -> i32`,
//!   called with the action name and a JSON payload
//!
//! The [`export_extension!`] macro generates all three.
//!
//! # Example
//!
//! ```ignore
//! fn invoke(action: &str, _payload: &str) -> i32 {
//!     match action {
//!         "greet" => { println!("hello"); 0 }
//!         _ => polyrun_extension::INVOKE_UNKNOWN_ACTION,
//!     }
//! }
//!
//! polyrun_extension::export_extension! {
//!     manifest: cr#"{"id":"hello","name":"Hello","version":"0.1.0","actions":[{"name":"greet"}]}"#,
//!     invoke: invoke,
//! }
//! ```

use std::ffi::{CStr, c_char};

/// Current ABI version. Bumped on any incompatible symbol change.
pub const ABI_VERSION: u32 = 1;

/// Symbol returning the ABI version the extension was built against.
pub const ABI_VERSION_SYMBOL: &str = "polyrun_extension_abi_version";

/// Symbol returning the JSON manifest.
pub const MANIFEST_SYMBOL: &str = "polyrun_extension_manifest";

/// Symbol dispatching an action.
pub const INVOKE_SYMBOL: &str = "polyrun_extension_invoke";

/// Signature of [`ABI_VERSION_SYMBOL`].
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// Signature of [`MANIFEST_SYMBOL`].
pub type ManifestFn = unsafe extern "C" fn() -> *const c_char;

/// Signature of [`INVOKE_SYMBOL`].
pub type InvokeFn = unsafe extern "C" fn(*const c_char, *const c_char) -> i32;

/// Return code for a successful invocation.
pub const INVOKE_OK: i32 = 0;

/// Return code when the action name is not handled.
pub const INVOKE_UNKNOWN_ACTION: i32 = -1;

/// Return code when the action handler panicked.
pub const INVOKE_PANICKED: i32 = -2;

/// Convert a borrowed C string argument to an owned Rust string.
///
/// Null pointers become the empty string.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
#[doc(hidden)]
pub unsafe fn __cstr_arg(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Export the extension entry points from a `cdylib`.
///
/// `manifest` must be a C string literal (`c"..."`) holding the JSON manifest.
/// `invoke` is a `fn(&str, &str) -> i32` receiving the action name and payload.
/// Panics inside `invoke` are caught and reported as [`INVOKE_PANICKED`].
#[macro_export]
macro_rules! export_extension {
    (manifest: $manifest:expr, invoke: $invoke:path $(,)?) => {
        $crate::export_extension!(manifest: $manifest);

        #[unsafe(no_mangle)]
        pub extern "C" fn polyrun_extension_invoke(
            action: *const ::std::ffi::c_char,
            payload: *const ::std::ffi::c_char,
        ) -> i32 {
            let action = unsafe { $crate::__cstr_arg(action) };
            let payload = unsafe { $crate::__cstr_arg(payload) };
            match ::std::panic::catch_unwind(|| $invoke(&action, &payload)) {
                Ok(code) => code,
                Err(_) => $crate::INVOKE_PANICKED,
            }
        }
    };
    (manifest: $manifest:expr $(,)?) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn polyrun_extension_abi_version() -> u32 {
            $crate::ABI_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn polyrun_extension_manifest() -> *const ::std::ffi::c_char {
            static MANIFEST: &::std::ffi::CStr = $manifest;
            MANIFEST.as_ptr()
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoke(action: &str, payload: &str) -> i32 {
        match action {
            "echo" => payload.len() as i32,
            "explode" => panic!("boom"),
            _ => INVOKE_UNKNOWN_ACTION,
        }
    }

    export_extension! {
        manifest: cr#"{"id":"test","name":"Test","version":"0.1.0","actions":[{"name":"echo"}]}"#,
        invoke: invoke,
    }

    #[test]
    fn test_exported_abi_version() {
        assert_eq!(polyrun_extension_abi_version(), ABI_VERSION);
    }

    #[test]
    fn test_exported_manifest_is_json() {
        let manifest = unsafe { CStr::from_ptr(polyrun_extension_manifest()) };
        let text = manifest.to_str().unwrap();
        assert!(text.starts_with('{'));
        assert!(text.contains("\"id\":\"test\""));
    }

    #[test]
    fn test_invoke_dispatch() {
        assert_eq!(polyrun_extension_invoke(c"echo".as_ptr(), c"abc".as_ptr()), 3);
        assert_eq!(
            polyrun_extension_invoke(c"missing".as_ptr(), std::ptr::null()),
            INVOKE_UNKNOWN_ACTION
        );
    }

    #[test]
    fn test_invoke_panic_is_contained() {
        assert_eq!(
            polyrun_extension_invoke(c"explode".as_ptr(), std::ptr::null()),
            INVOKE_PANICKED
        );
    }

    #[test]
    fn test_null_argument_is_empty() {
        assert_eq!(unsafe { __cstr_arg(std::ptr::null()) }, "");
    }
}
