//! The object arena and per-instance execution state.
//!
//! This module provides:
//! - [`Store`]: Shared handle to the Wasmtime store that owns every memory,
//!   table, global and instance created through it
//! - [`StoreData`]: State reachable from host functions during a call
//! - [`ExecutionMetrics`]: Fuel and call accounting

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;
use wasmbed_common::RuntimeError;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;

/// Identifier of an instance within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

/// Per-instance state kept inside the store.
///
/// Host functions reach this through the
/// [`InstanceContext`](crate::InstanceContext) of the calling instance.
#[derive(Default)]
pub(crate) struct InstanceState {
    /// Opaque user data attached by the embedder.
    pub(crate) user_data: Option<Box<dyn Any + Send>>,

    /// Memories in index order: imported first, then exported.
    pub(crate) memories: Vec<wasmtime::Memory>,

    /// Names of exported memories not yet in `memories`.
    ///
    /// Set while the instance is being created, so host functions called
    /// from the start function can still reach memories the module defines.
    pub(crate) pending_memory_exports: Vec<String>,

    /// WASI context built for this instance, if it was linked with WASI.
    pub(crate) wasi: Option<WasiP1Ctx>,
}

/// Execution metrics accumulated by a store.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Number of outermost calls into guest code.
    pub calls: u64,

    /// Number of calls that ended in a trap or error.
    pub traps: u64,

    /// Fuel consumed by the most recent outermost call.
    pub last_fuel_consumed: u64,
}

/// State owned by a Wasmtime store.
///
/// # Contents
///
/// - per-instance state (user data, memories, WASI context)
/// - the stack of instances currently executing guest code
/// - a fallback WASI context used when the active instance has none
/// - execution metrics
pub struct StoreData {
    instances: HashMap<InstanceId, InstanceState>,
    active: Vec<InstanceId>,
    fallback_wasi: WasiP1Ctx,
    next_instance: u64,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,
}

impl StoreData {
    /// Create empty store state.
    pub fn new() -> Self {
        Self {
            instances: HashMap::new(),
            active: Vec::new(),
            fallback_wasi: WasiCtxBuilder::new().build_p1(),
            next_instance: 0,
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Reserve an identifier and empty state for a new instance.
    pub(crate) fn allocate_instance(&mut self) -> InstanceId {
        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        self.instances.insert(id, InstanceState::default());
        id
    }

    pub(crate) fn release_instance(&mut self, id: InstanceId) {
        self.instances.remove(&id);
    }

    pub(crate) fn instance(&self, id: InstanceId) -> Option<&InstanceState> {
        self.instances.get(&id)
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> Option<&mut InstanceState> {
        self.instances.get_mut(&id)
    }

    /// Number of live instances in this store.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// The instance whose guest code is currently executing, if any.
    pub fn active_instance(&self) -> Option<InstanceId> {
        self.active.last().copied()
    }

    /// Depth of nested guest calls currently in progress.
    pub fn call_depth(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn push_active(&mut self, id: InstanceId) {
        self.active.push(id);
    }

    pub(crate) fn pop_active(&mut self) {
        self.active.pop();
    }

    /// WASI context of the active instance.
    ///
    /// Falls back to an empty context when the active instance was not
    /// linked with WASI, so WASI calls never observe another instance's
    /// arguments or preopens.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        let current = self.active.last().copied();
        match current
            .and_then(|id| self.instances.get_mut(&id))
            .and_then(|state| state.wasi.as_mut())
        {
            Some(ctx) => ctx,
            None => &mut self.fallback_wasi,
        }
    }
}

impl Default for StoreData {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a Wasmtime store.
///
/// Every runtime object (memory, table, global, instance) belongs to
/// exactly one store, and objects of different stores cannot be linked
/// together. Cloning a `Store` clones the handle, not the objects.
///
/// The store is guarded by a mutex that is held for the whole duration of
/// a guest call. Host functions must therefore access memories and user
/// data through their [`InstanceContext`](crate::InstanceContext) rather
/// than through handles captured from outside. Touching a handle of the
/// same store from inside a host function fails with
/// [`RuntimeError::StoreBusy`].
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<wasmtime::Store<StoreData>>>,
    released: Arc<Mutex<Vec<InstanceId>>>,
    engine: WasmEngine,
}

thread_local! {
    /// Stores locked by the current thread, by address.
    static HELD_STORES: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Exclusive access to a locked store.
///
/// Dropping the guard unlocks the store and forgets that this thread
/// holds it.
pub(crate) struct StoreGuard<'a> {
    guard: MutexGuard<'a, wasmtime::Store<StoreData>>,
    key: usize,
}

impl Deref for StoreGuard<'_> {
    type Target = wasmtime::Store<StoreData>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for StoreGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        HELD_STORES.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|key| *key == self.key) {
                held.remove(pos);
            }
        });
    }
}

impl Store {
    /// Create a new, empty store for the given engine.
    pub fn new(engine: &WasmEngine) -> Self {
        let store = wasmtime::Store::new(engine.inner(), StoreData::new());

        Self {
            inner: Arc::new(Mutex::new(store)),
            released: Arc::new(Mutex::new(Vec::new())),
            engine: engine.clone(),
        }
    }

    /// The engine this store belongs to.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Check whether two handles refer to the same store.
    pub fn same(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Lock the store for direct access.
    ///
    /// Instances released while the store was busy are dropped first.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] if this thread already holds
    /// the lock, which happens when a host function reaches back into
    /// its own store.
    pub(crate) fn lock(&self) -> Result<StoreGuard<'_>, RuntimeError> {
        let key = self.key();
        if HELD_STORES.with(|held| held.borrow().contains(&key)) {
            return Err(RuntimeError::StoreBusy);
        }

        let mut guard = self.inner.lock();
        HELD_STORES.with(|held| held.borrow_mut().push(key));

        let released = std::mem::take(&mut *self.released.lock());
        for id in released {
            guard.data_mut().release_instance(id);
        }

        Ok(StoreGuard { guard, key })
    }

    /// Drop the state of instance `id`, now or on the next lock.
    pub(crate) fn release_instance(&self, id: InstanceId) {
        match self.lock() {
            Ok(mut guard) => guard.data_mut().release_instance(id),
            Err(_) => {
                trace!(instance = %id, "Store busy, deferring instance release");
                self.released.lock().push(id);
            }
        }
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }

    /// Snapshot of the execution metrics.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] when called from a host
    /// function of this store.
    pub fn metrics(&self) -> Result<ExecutionMetrics, RuntimeError> {
        Ok(self.lock()?.data().metrics.clone())
    }

    /// Number of live instances in this store.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] when called from a host
    /// function of this store.
    pub fn instance_count(&self) -> Result<usize, RuntimeError> {
        Ok(self.lock()?.data().instance_count())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
