//! Function-reference tables.

use tracing::debug;
use wasmtime::{Ref, RefType, TableType};

use crate::Store;
use wasmbed_common::{Limits, RuntimeError};

/// Upper bound on table length accepted by this runtime.
pub const MAX_TABLE_ELEMENTS: u32 = 10_000_000;

/// A table of nullable function references living in a [`Store`].
///
/// Follows the same limits and grow contract as [`Memory`](crate::Memory),
/// counted in elements instead of pages. New slots are null.
#[derive(Clone)]
pub struct Table {
    store: Store,
    inner: wasmtime::Table,
}

impl Table {
    /// Create a standalone `funcref` table.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidLimits`] if `min > max` or a bound
    /// exceeds [`MAX_TABLE_ELEMENTS`].
    pub fn new(store: &Store, limits: Limits) -> Result<Self, RuntimeError> {
        limits.validate(MAX_TABLE_ELEMENTS)?;

        let mut guard = store.lock()?;
        let ty = TableType::new(RefType::FUNCREF, limits.min, limits.max);
        let inner = wasmtime::Table::new(&mut *guard, ty, Ref::Func(None))
            .map_err(|e| RuntimeError::invalid_limits(format!("Table creation failed: {e}")))?;

        debug!(min = limits.min, max = ?limits.max, "Table created");

        Ok(Self {
            store: store.clone(),
            inner,
        })
    }

    pub(crate) fn from_parts(store: &Store, inner: wasmtime::Table) -> Self {
        Self {
            store: store.clone(),
            inner,
        }
    }

    /// Grow the table by `delta` null elements, returning the previous length.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::GrowFailed`] if the new length would exceed
    /// the table's maximum. The length is unchanged on failure.
    pub fn grow(&self, delta: u32) -> Result<u32, RuntimeError> {
        let mut guard = self.store.lock()?;
        let current = self.inner.size(&*guard);
        let max = self.inner.ty(&*guard).maximum().unwrap_or(u64::from(MAX_TABLE_ELEMENTS));

        let requested = current + u64::from(delta);
        if requested > max {
            return Err(RuntimeError::grow_failed(format!(
                "cannot grow table from {current} to {requested} elements (maximum {max})"
            )));
        }

        let previous = self
            .inner
            .grow(&mut *guard, u64::from(delta), Ref::Func(None))
            .map_err(|e| RuntimeError::grow_failed(e.to_string()))?;

        debug!(previous, delta, "Table grown");
        Ok(elements(previous))
    }

    /// Current length in elements.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store.
    pub fn size(&self) -> Result<u32, RuntimeError> {
        Ok(elements(self.inner.size(&*self.store.lock()?)))
    }

    /// Current limits; `min` reflects the current length.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store.
    pub fn limits(&self) -> Result<Limits, RuntimeError> {
        let guard = self.store.lock()?;
        Ok(Limits {
            min: elements(self.inner.size(&*guard)),
            max: self.inner.ty(&*guard).maximum().map(elements),
        })
    }

    /// The store this table lives in.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn as_wasmtime(&self) -> &wasmtime::Table {
        &self.inner
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("size", &self.size().ok())
            .finish_non_exhaustive()
    }
}

fn elements(raw: u64) -> u32 {
    u32::try_from(raw).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;

    fn store() -> Store {
        Store::new(&WasmEngine::with_defaults().unwrap())
    }

    #[test]
    fn test_table_grow() {
        let table = Table::new(&store(), Limits::new(1, Some(3))).unwrap();
        assert_eq!(table.size().unwrap(), 1);

        assert_eq!(table.grow(2).unwrap(), 1);
        assert_eq!(table.size().unwrap(), 3);

        let err = table.grow(1).unwrap_err();
        assert!(matches!(err, RuntimeError::GrowFailed { .. }));
        assert_eq!(table.limits().unwrap(), Limits::new(3, Some(3)));
    }

    #[test]
    fn test_table_invalid_limits() {
        let err = Table::new(&store(), Limits::new(5, Some(1))).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidLimits { .. }));
    }
}
