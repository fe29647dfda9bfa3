//! Linear memories.

use wasmbed_common::{RuntimeError, WASM_PAGE_SIZE};
use wasmbed_core::Memory;

use crate::error::{handle_result, value_or};
use crate::value::{wasmbed_limits_t, wasmbed_result_t};
use crate::{default_store, write_out};

/// A linear memory.
///
/// Memories handed to a host function through its context are views of
/// the guest memory for the duration of the call; they cannot grow.
pub struct wasmbed_memory_t {
    inner: MemoryHandle,
}

enum MemoryHandle {
    Owned(Memory),
    View { data: *mut u8, data_len: usize },
}

impl wasmbed_memory_t {
    pub(crate) fn owned(memory: Memory) -> Self {
        Self {
            inner: MemoryHandle::Owned(memory),
        }
    }

    pub(crate) fn view(data: &mut [u8]) -> Self {
        Self {
            inner: MemoryHandle::View {
                data: data.as_mut_ptr(),
                data_len: data.len(),
            },
        }
    }

    /// The underlying memory, unless this is a view.
    pub(crate) fn as_owned(&self) -> Result<&Memory, RuntimeError> {
        match &self.inner {
            MemoryHandle::Owned(memory) => Ok(memory),
            MemoryHandle::View { .. } => Err(RuntimeError::invalid_config(
                "a memory borrowed from a host function context cannot be used here",
            )),
        }
    }

    fn pages(&self) -> Result<u32, RuntimeError> {
        match &self.inner {
            MemoryHandle::Owned(memory) => memory.size(),
            MemoryHandle::View { data_len, .. } => {
                Ok(u32::try_from(data_len / WASM_PAGE_SIZE).unwrap_or(u32::MAX))
            }
        }
    }

    fn data(&self) -> Result<(*mut u8, usize), RuntimeError> {
        match &self.inner {
            MemoryHandle::Owned(memory) => Ok((memory.data_ptr()?, memory.data_size()?)),
            MemoryHandle::View { data, data_len } => Ok((*data, *data_len)),
        }
    }
}

/// Create a standalone memory with the given page limits.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_memory_new(
    memory: Option<&mut *mut wasmbed_memory_t>,
    limits: wasmbed_limits_t,
) -> wasmbed_result_t {
    let result = default_store()
        .and_then(|store| Memory::new(store, limits.into()))
        .and_then(|created| write_out(memory, wasmbed_memory_t::owned(created)));
    handle_result(result, |()| {})
}

/// Grow by `delta` pages.
///
/// Fails without changing the size if the maximum would be exceeded.
/// Fails when called from inside a host function.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_memory_grow(
    memory: Option<&wasmbed_memory_t>,
    delta: u32,
) -> wasmbed_result_t {
    let result = memory
        .ok_or_else(|| RuntimeError::invalid_config("null memory"))
        .and_then(wasmbed_memory_t::as_owned)
        .and_then(|memory| memory.grow(delta));
    handle_result(result, |_previous| {})
}

/// Size in pages; 0 for null.
///
/// Also 0, with the error channel set, when called from a host function
/// on a memory that is not a view of its context.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_memory_length(memory: Option<&wasmbed_memory_t>) -> u32 {
    memory.map_or(0, |memory| value_or(memory.pages(), 0))
}

/// Start of the memory's bytes; null for null.
///
/// Invalidated by growth.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_memory_data(memory: Option<&wasmbed_memory_t>) -> *mut u8 {
    memory.map_or(std::ptr::null_mut(), |memory| {
        value_or(memory.data().map(|(data, _)| data), std::ptr::null_mut())
    })
}

/// Size in bytes; 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_memory_data_length(memory: Option<&wasmbed_memory_t>) -> u32 {
    memory.map_or(0, |memory| {
        let len = value_or(memory.data().map(|(_, len)| len), 0);
        u32::try_from(len).unwrap_or(u32::MAX)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_memory_destroy(_memory: Option<Box<wasmbed_memory_t>>) {}
