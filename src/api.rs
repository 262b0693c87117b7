//! C ABI exported for the launcher
#![allow(clippy::missing_safety_doc)]

use crate::mapping::ParsedMappings;
use std::ffi::{CStr, CString, c_char};

const VERSION: &CStr = match CStr::from_bytes_with_nul(
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes(),
) {
    Ok(v) => v,
    Err(_) => panic!("version contains NUL"),
};

/// Library version, static and NUL-terminated
#[unsafe(no_mangle)]
pub extern "C" fn bundlehook_version() -> *const c_char {
    VERSION.as_ptr()
}

/// Describe how `value` parses as a mapping variable, as JSON
///
/// The returned string must be released with [`bundlehook_free_string`].
/// Returns null when `value` is null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bundlehook_describe_mappings(value: *const c_char) -> *mut c_char {
    if value.is_null() {
        return std::ptr::null_mut();
    }
    let value = unsafe { CStr::from_ptr(value) };
    match describe_mappings(value.to_bytes()) {
        Some(json) => json.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Release a string returned by this library
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bundlehook_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

fn describe_mappings(value: &[u8]) -> Option<CString> {
    let desc = ParsedMappings::parse(value).describe();
    let json = serde_json::to_string(&desc).ok()?;
    CString::new(json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_package() {
        let v = unsafe { CStr::from_ptr(bundlehook_version()) };
        assert_eq!(v.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn describe_round_trips_through_c_strings() {
        let input = CString::new("/usr:/b/usr;broken;").unwrap();
        let ptr = unsafe { bundlehook_describe_mappings(input.as_ptr()) };
        assert!(!ptr.is_null());
        let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        unsafe { bundlehook_free_string(ptr) };

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mappings"].as_array().unwrap().len(), 1);
        assert_eq!(value["mappings"][0]["target"], "/b/usr");
        assert_eq!(value["skipped"][0], "broken");
    }

    #[test]
    fn null_input_gives_null() {
        assert!(unsafe { bundlehook_describe_mappings(std::ptr::null()) }.is_null());
        unsafe { bundlehook_free_string(std::ptr::null_mut()) };
    }
}
