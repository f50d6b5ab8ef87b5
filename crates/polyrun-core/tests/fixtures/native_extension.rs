//! Native extension used by `tests/native_extension.rs`.
//!
//! Built with `--cfg abi_mismatch` it claims a newer ABI than the host.

#[cfg(not(abi_mismatch))]
fn invoke(action: &str, payload: &str) -> i32 {
    match action {
        "greet" => polyrun_extension::INVOKE_OK,
        "count" => payload.len() as i32,
        "explode" => panic!("fixture exploded"),
        _ => polyrun_extension::INVOKE_UNKNOWN_ACTION,
    }
}

#[cfg(not(abi_mismatch))]
polyrun_extension::export_extension! {
    manifest: cr#"{"id":"fixture","name":"Fixture","version":"0.1.0","actions":[{"name":"greet"},{"name":"count"},{"name":"explode"}]}"#,
    invoke: invoke,
}

#[cfg(abi_mismatch)]
#[unsafe(no_mangle)]
pub extern "C" fn polyrun_extension_abi_version() -> u32 {
    polyrun_extension::ABI_VERSION + 1
}

#[cfg(abi_mismatch)]
#[unsafe(no_mangle)]
pub extern "C" fn polyrun_extension_manifest() -> *const std::ffi::c_char {
    cr#"{"id":"fixture","name":"Fixture","version":"0.2.0","actions":[{"name":"greet"}]}"#.as_ptr()
}
