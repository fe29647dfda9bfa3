//! Library version queries.

use std::ffi::c_char;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
const VERSION_PRE: &str = concat!(env!("CARGO_PKG_VERSION_PRE"), "\0");

fn component(raw: &str) -> u8 {
    raw.parse().unwrap_or(0)
}

/// The full version, e.g. `"0.1.0"`, as a static NUL-terminated string.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_version() -> *const c_char {
    VERSION.as_ptr().cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_version_major() -> u8 {
    component(env!("CARGO_PKG_VERSION_MAJOR"))
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_version_minor() -> u8 {
    component(env!("CARGO_PKG_VERSION_MINOR"))
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_version_patch() -> u8 {
    component(env!("CARGO_PKG_VERSION_PATCH"))
}

/// The pre-release part of the version, empty for releases.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_version_pre() -> *const c_char {
    VERSION_PRE.as_ptr().cast()
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use super::*;

    #[test]
    fn test_version_matches_package() {
        let version = unsafe { CStr::from_ptr(wasmbed_version()) }.to_str().unwrap();
        assert_eq!(version, env!("CARGO_PKG_VERSION"));

        let expected = format!(
            "{}.{}.{}",
            wasmbed_version_major(),
            wasmbed_version_minor(),
            wasmbed_version_patch()
        );
        assert!(version.starts_with(&expected));
    }

    #[test]
    fn test_version_pre() {
        let pre = unsafe { CStr::from_ptr(wasmbed_version_pre()) }.to_str().unwrap();
        assert_eq!(pre, env!("CARGO_PKG_VERSION_PRE"));
    }
}
