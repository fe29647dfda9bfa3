//! The error channel.
//!
//! Each thread has its own last-error slot. A failing call overwrites it;
//! reading the message clears it. Errors raised on one thread are never
//! visible from another.

use std::cell::RefCell;
use std::ffi::c_char;
use std::fmt::Display;
use std::os::raw::c_int;
use std::ptr;

use tracing::debug;
use wasmbed_common::RuntimeError;

use crate::value::wasmbed_result_t;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Replace the calling thread's last error.
pub(crate) fn update_last_error(err: impl Display) {
    let message = err.to_string();
    debug!(error = %message, "C API call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Map a result onto the status code, recording the error if any.
pub(crate) fn handle_result<T>(
    result: Result<T, RuntimeError>,
    ok: impl FnOnce(T),
) -> wasmbed_result_t {
    match result {
        Ok(value) => {
            ok(value);
            wasmbed_result_t::WASMBED_OK
        }
        Err(err) => {
            update_last_error(err);
            wasmbed_result_t::WASMBED_ERROR
        }
    }
}

/// Unwrap a result, recording the error and returning `fallback` on
/// failure.
pub(crate) fn value_or<T>(result: Result<T, RuntimeError>, fallback: T) -> T {
    result.unwrap_or_else(|err| {
        update_last_error(err);
        fallback
    })
}

/// Unwrap a result into an owned pointer, recording the error and
/// returning null on failure.
pub(crate) fn into_raw_or_null<T>(result: Result<T, RuntimeError>) -> *mut T {
    match result {
        Ok(value) => Box::into_raw(Box::new(value)),
        Err(err) => {
            update_last_error(err);
            ptr::null_mut()
        }
    }
}

/// Length in bytes of the last error message, trailing NUL included.
///
/// Returns 0 when there is no pending error.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_last_error_length() -> c_int {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(0, |message| c_int::try_from(message.len() + 1).unwrap_or(c_int::MAX))
    })
}

/// Copy the last error message, NUL-terminated, into `buffer` and clear it.
///
/// Returns the number of bytes written, trailing NUL included, 0 if there
/// is no pending error, or -1 if `buffer` is null or shorter than
/// [`wasmbed_last_error_length`]. The message is kept on failure.
///
/// # Safety
///
/// `buffer` must be null or point to `length` writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_last_error_message(buffer: *mut c_char, length: c_int) -> c_int {
    if buffer.is_null() {
        return -1;
    }
    let Ok(capacity) = usize::try_from(length) else {
        return -1;
    };

    LAST_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        let Some(message) = slot.as_ref() else {
            return 0;
        };

        let needed = message.len() + 1;
        if capacity < needed {
            return -1;
        }

        // SAFETY: `buffer` has room for `capacity >= needed` bytes.
        let out = unsafe { crate::slice_from_raw_parts_mut(buffer.cast::<u8>(), needed) };
        out[..message.len()].copy_from_slice(message.as_bytes());
        out[message.len()] = 0;

        *slot = None;
        c_int::try_from(needed).unwrap_or(c_int::MAX)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_message() -> Option<String> {
        let len = wasmbed_last_error_length();
        if len == 0 {
            return None;
        }
        let mut buf = vec![0u8; usize::try_from(len).unwrap()];
        let written = unsafe { wasmbed_last_error_message(buf.as_mut_ptr().cast(), len) };
        assert_eq!(written, len);
        buf.pop();
        Some(String::from_utf8(buf).unwrap())
    }

    #[test]
    fn test_read_then_clear() {
        update_last_error("first");
        update_last_error("second");

        assert_eq!(wasmbed_last_error_length(), 7);
        assert_eq!(read_message().as_deref(), Some("second"));
        assert_eq!(wasmbed_last_error_length(), 0);
        assert_eq!(read_message(), None);
    }

    #[test]
    fn test_short_buffer_keeps_message() {
        update_last_error("message");

        let mut buf = [0u8; 4];
        let written = unsafe { wasmbed_last_error_message(buf.as_mut_ptr().cast(), 4) };
        assert_eq!(written, -1);
        assert_eq!(unsafe { wasmbed_last_error_message(ptr::null_mut(), 100) }, -1);

        assert_eq!(read_message().as_deref(), Some("message"));
    }

    #[test]
    fn test_errors_are_thread_local() {
        update_last_error("main thread");

        let other = std::thread::spawn(|| {
            let before = wasmbed_last_error_length();
            update_last_error("worker");
            (before, read_message())
        })
        .join()
        .unwrap();

        assert_eq!(other, (0, Some("worker".to_string())));
        assert_eq!(read_message().as_deref(), Some("main thread"));
    }
}
