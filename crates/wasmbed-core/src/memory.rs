//! Linear memories.

use tracing::debug;
use wasmtime::MemoryType;

use crate::Store;
use wasmbed_common::{Limits, RuntimeError, WASM_MAX_PAGES};

/// A linear memory living in a [`Store`].
///
/// The memory is sized in 64 KiB pages and can only grow. Growing may
/// move the backing buffer, so pointers obtained from
/// [`data_ptr`](Self::data_ptr) are invalidated by [`grow`](Self::grow).
#[derive(Clone)]
pub struct Memory {
    store: Store,
    inner: wasmtime::Memory,
}

impl Memory {
    /// Create a standalone memory with the given page limits.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidLimits`] if `min > max` or either
    /// bound exceeds 65536 pages.
    pub fn new(store: &Store, limits: Limits) -> Result<Self, RuntimeError> {
        limits.validate(WASM_MAX_PAGES)?;

        let mut guard = store.lock()?;
        let inner = wasmtime::Memory::new(&mut *guard, MemoryType::new(limits.min, limits.max))
            .map_err(|e| RuntimeError::invalid_limits(format!("Memory creation failed: {e}")))?;

        debug!(min = limits.min, max = ?limits.max, "Memory created");

        Ok(Self {
            store: store.clone(),
            inner,
        })
    }

    pub(crate) fn from_parts(store: &Store, inner: wasmtime::Memory) -> Self {
        Self {
            store: store.clone(),
            inner,
        }
    }

    /// Grow the memory by `delta` pages, returning the previous size.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::GrowFailed`] if the new size would exceed
    /// the memory's maximum or the 65536-page ceiling. The size is
    /// unchanged on failure.
    pub fn grow(&self, delta: u32) -> Result<u32, RuntimeError> {
        let mut guard = self.store.lock()?;
        let current = self.inner.size(&*guard);
        let limits = limits_of(&self.inner.ty(&*guard));

        let requested = current + u64::from(delta);
        let ceiling = u64::from(limits.max.unwrap_or(WASM_MAX_PAGES).min(WASM_MAX_PAGES));
        if requested > ceiling {
            return Err(RuntimeError::grow_failed(format!(
                "cannot grow memory from {current} to {requested} pages (maximum {ceiling})"
            )));
        }

        let previous = self
            .inner
            .grow(&mut *guard, u64::from(delta))
            .map_err(|e| RuntimeError::grow_failed(e.to_string()))?;

        debug!(previous, delta, "Memory grown");
        Ok(pages(previous))
    }

    /// Current size in pages.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store; use its context instead.
    pub fn size(&self) -> Result<u32, RuntimeError> {
        Ok(pages(self.inner.size(&*self.store.lock()?)))
    }

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store.
    pub fn data_size(&self) -> Result<usize, RuntimeError> {
        Ok(self.inner.data_size(&*self.store.lock()?))
    }

    /// Base address of the memory's bytes.
    ///
    /// The pointer is valid until the next [`grow`](Self::grow) of this
    /// memory and must not be used while guest code runs in the store.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store.
    pub fn data_ptr(&self) -> Result<*mut u8, RuntimeError> {
        Ok(self.inner.data_ptr(&*self.store.lock()?))
    }

    /// Copy bytes out of the memory starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError::Trap`] with a memory out-of-bounds code if
    /// the range does not fit.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), RuntimeError> {
        self.inner
            .read(&*self.store.lock()?, offset, buf)
            .map_err(|_| out_of_bounds(offset, buf.len()))
    }

    /// Copy `bytes` into the memory starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError::Trap`] with a memory out-of-bounds code if
    /// the range does not fit.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), RuntimeError> {
        self.inner
            .write(&mut *self.store.lock()?, offset, bytes)
            .map_err(|_| out_of_bounds(offset, bytes.len()))
    }

    /// Current limits; `min` reflects the current size.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store.
    pub fn limits(&self) -> Result<Limits, RuntimeError> {
        let guard = self.store.lock()?;
        let mut limits = limits_of(&self.inner.ty(&*guard));
        limits.min = pages(self.inner.size(&*guard));
        Ok(limits)
    }

    /// The store this memory lives in.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn as_wasmtime(&self) -> &wasmtime::Memory {
        &self.inner
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("pages", &self.size().ok())
            .finish_non_exhaustive()
    }
}

pub(crate) fn limits_of(ty: &MemoryType) -> Limits {
    Limits {
        min: pages(ty.minimum()),
        max: ty.maximum().map(pages),
    }
}

// 32-bit memories never exceed `WASM_MAX_PAGES`
fn pages(raw: u64) -> u32 {
    u32::try_from(raw).unwrap_or(u32::MAX)
}

fn out_of_bounds(offset: usize, len: usize) -> RuntimeError {
    RuntimeError::Trap {
        message: format!("memory access out of bounds: {len} bytes at offset {offset}"),
        code: wasmbed_common::TrapCode::MemoryOutOfBounds,
        fault: None,
    }
}
