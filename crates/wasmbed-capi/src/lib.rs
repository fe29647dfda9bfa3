//! The C API of the wasmbed WebAssembly embedding runtime.
//!
//! This crate is normally not used from Rust itself; use `wasmbed-core`
//! instead. It is built as a `cdylib` and a `staticlib` exposing one flat
//! `extern "C"` function per operation.
//!
//! # Conventions
//!
//! - Fallible functions return [`wasmbed_result_t`] (or null / `false`)
//!   and leave a message in the calling thread's error slot, read with
//!   [`wasmbed_last_error_length`] and [`wasmbed_last_error_message`].
//! - Every `_destroy` function accepts null as a no-op.
//! - Accessors tolerate null handles and return zero, null or an error.
//! - Objects created without an explicit store (memories, tables, globals,
//!   instances) live in one process-wide default store. Calls into that
//!   store are serialized.
//! - Inside a host function, reach the instance only through the
//!   `wasmbed_instance_context_t` it receives. Other handles into the
//!   default store fail with an error instead of blocking until the host
//!   function returns.

#![allow(non_camel_case_types)]
#![allow(unsafe_code)]

use std::sync::OnceLock;

use wasmbed_common::{RuntimeConfig, RuntimeError};
use wasmbed_core::{Store, WasmEngine};

mod descriptor;
mod error;
mod export;
mod global;
mod import;
mod instance;
mod memory;
mod module;
mod table;
mod value;
mod version;
mod wasi;

pub use crate::descriptor::*;
pub use crate::error::*;
pub use crate::export::*;
pub use crate::global::*;
pub use crate::import::*;
pub use crate::instance::*;
pub use crate::memory::*;
pub use crate::module::*;
pub use crate::table::*;
pub use crate::value::*;
pub use crate::version::*;
pub use crate::wasi::*;

/// The process-wide store every C handle lives in.
pub(crate) fn default_store() -> Result<&'static Store, RuntimeError> {
    static STORE: OnceLock<Result<Store, String>> = OnceLock::new();

    STORE
        .get_or_init(|| {
            WasmEngine::new(&RuntimeConfig::default())
                .map(|engine| Store::new(&engine))
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|reason| RuntimeError::invalid_config(reason.clone()))
}

/// Helper for creating Rust slices from C inputs.
///
/// A zero length yields an empty slice whatever `ptr` is, and so does a
/// null `ptr`.
pub(crate) unsafe fn slice_from_raw_parts<'a, T>(ptr: *const T, len: usize) -> &'a [T] {
    if len == 0 || ptr.is_null() {
        &[]
    } else {
        // SAFETY: the caller guarantees `ptr` points to `len` valid elements.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}

/// Same as above, but for `*mut`.
pub(crate) unsafe fn slice_from_raw_parts_mut<'a, T>(ptr: *mut T, len: usize) -> &'a mut [T] {
    if len == 0 || ptr.is_null() {
        &mut []
    } else {
        // SAFETY: the caller guarantees `ptr` points to `len` valid elements.
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }
}

/// Store `value` behind an out-pointer, failing if the pointer is null.
pub(crate) fn write_out<T>(out: Option<&mut *mut T>, value: T) -> Result<(), RuntimeError> {
    let out = out.ok_or_else(|| RuntimeError::invalid_config("null output pointer"))?;
    *out = Box::into_raw(Box::new(value));
    Ok(())
}
