//! Host functions and the context they run in.
//!
//! A [`HostFunction`] is an embedder callback with an explicit signature.
//! Every invocation receives an [`InstanceContext`] for the instance that
//! imported it, giving access to that instance's user data, its memories
//! and its exports.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::trace;
use wasmtime::{Caller, Linker};

use crate::convert;
use crate::instance::append_memories;
use crate::protected;
use crate::store::{InstanceId, StoreData};
use crate::wasi::WasiVersion;
use wasmbed_common::{FuncSignature, RuntimeError, Value};

/// Signature of a host function callback.
pub type HostCallback = dyn Fn(&mut InstanceContext<'_>, &[Value]) -> Result<Vec<Value>, RuntimeError>
    + Send
    + Sync;

#[derive(Clone)]
enum Provider {
    Callback(Arc<HostCallback>),
    Wasi(WasiVersion),
}

/// A function provided by the host to guest modules.
///
/// Cloning is cheap; clones share the callback.
#[derive(Clone)]
pub struct HostFunction {
    signature: FuncSignature,
    provider: Provider,
}

impl HostFunction {
    /// Create a host function from a signature and a callback.
    ///
    /// The callback receives arguments already checked against the
    /// signature's parameters. The values it returns are checked against
    /// the signature's results; a mismatch traps the guest call.
    /// Returning `Err` aborts the guest call, use [`RuntimeError::trap`]
    /// to abort with a message.
    pub fn new<F>(signature: FuncSignature, callback: F) -> Self
    where
        F: Fn(&mut InstanceContext<'_>, &[Value]) -> Result<Vec<Value>, RuntimeError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            signature,
            provider: Provider::Callback(Arc::new(callback)),
        }
    }

    /// A WASI call resolved by the WASI layer at link time.
    pub(crate) fn wasi(version: WasiVersion, signature: FuncSignature) -> Self {
        Self {
            signature,
            provider: Provider::Wasi(version),
        }
    }

    /// Parameter and result types of this function.
    pub fn signature(&self) -> &FuncSignature {
        &self.signature
    }

    /// The WASI version this function belongs to, if it is a WASI call.
    pub fn wasi_version(&self) -> Option<WasiVersion> {
        match self.provider {
            Provider::Wasi(version) => Some(version),
            Provider::Callback(_) => None,
        }
    }

    /// Define this function in `linker` on behalf of `instance`.
    ///
    /// WASI calls are defined by the WASI layer and skipped here.
    pub(crate) fn define(
        &self,
        linker: &mut Linker<StoreData>,
        module: &str,
        name: &str,
        instance: InstanceId,
    ) -> wasmtime::Result<()> {
        let Provider::Callback(callback) = &self.provider else {
            return Ok(());
        };

        let callback = Arc::clone(callback);
        let signature = self.signature.clone();
        let ty = convert::func_type(linker.engine(), &self.signature);
        let label = format!("{module}.{name}");

        linker.func_new(module, name, ty, move |mut caller, params, results| {
            trace!(function = %label, %instance, "Host function called");
            resolve_pending_memories(&mut caller, instance);

            let args = params
                .iter()
                .map(convert::from_val)
                .collect::<Result<Vec<_>, _>>()?;

            let mut context = InstanceContext { caller, instance };
            let values = callback(&mut context, &args)?;
            signature.check_results(&values)?;

            for (slot, value) in results.iter_mut().zip(values) {
                *slot = convert::to_val(value);
            }
            Ok(())
        })?;
        Ok(())
    }
}

/// Register the memories of an instance whose start function is running.
///
/// Until the instance is fully created, its exported memories are only
/// reachable through the caller.
fn resolve_pending_memories(caller: &mut Caller<'_, StoreData>, instance: InstanceId) {
    let Some(state) = caller.data_mut().instance_mut(instance) else {
        return;
    };
    if state.pending_memory_exports.is_empty() {
        return;
    }
    let pending = std::mem::take(&mut state.pending_memory_exports);
    let mut memories = state.memories.clone();

    let exported: Vec<_> = pending
        .iter()
        .filter_map(|name| caller.get_export(name))
        .filter_map(wasmtime::Extern::into_memory)
        .collect();
    append_memories(&*caller, &mut memories, exported);

    trace!(%instance, memories = memories.len(), "Memories resolved during start");
    if let Some(state) = caller.data_mut().instance_mut(instance) {
        state.memories = memories;
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("signature", &self.signature.to_string())
            .field("wasi", &self.wasi_version())
            .finish()
    }
}

/// Per-call handle passed to every host function.
///
/// The context belongs to the instance that imported the function. It is
/// only valid for the duration of the call and is never destroyed
/// separately.
pub struct InstanceContext<'a> {
    caller: Caller<'a, StoreData>,
    instance: InstanceId,
}

impl InstanceContext<'_> {
    /// The instance this context belongs to.
    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// User data attached to the instance, if it has the requested type.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.caller
            .data()
            .instance(self.instance)?
            .user_data
            .as_ref()?
            .downcast_ref()
    }

    /// Mutable access to the instance's user data.
    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.caller
            .data_mut()
            .instance_mut(self.instance)?
            .user_data
            .as_mut()?
            .downcast_mut()
    }

    /// Number of memories of the instance, imported ones first.
    pub fn memory_count(&self) -> usize {
        self.caller
            .data()
            .instance(self.instance)
            .map_or(0, |state| state.memories.len())
    }

    fn memory(&self, index: usize) -> Result<wasmtime::Memory, RuntimeError> {
        self.caller
            .data()
            .instance(self.instance)
            .and_then(|state| state.memories.get(index).copied())
            .ok_or_else(|| RuntimeError::not_found("memory", index.to_string()))
    }

    /// Bytes of the memory at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the instance has no memory at
    /// that index.
    pub fn memory_data(&self, index: usize) -> Result<&[u8], RuntimeError> {
        let memory = self.memory(index)?;
        Ok(memory.data(&self.caller))
    }

    /// Mutable bytes of the memory at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the instance has no memory at
    /// that index.
    pub fn memory_data_mut(&mut self, index: usize) -> Result<&mut [u8], RuntimeError> {
        let memory = self.memory(index)?;
        Ok(memory.data_mut(&mut self.caller))
    }

    /// Size in pages of the memory at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the instance has no memory at
    /// that index.
    pub fn memory_pages(&self, index: usize) -> Result<u32, RuntimeError> {
        let memory = self.memory(index)?;
        Ok(u32::try_from(memory.size(&self.caller)).unwrap_or(u32::MAX))
    }

    /// Call one of the instance's exported functions from the host.
    ///
    /// A trap inside the nested call unwinds only to this call and is
    /// returned as an ordinary error.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NotFound`] if the instance exports no such function
    /// - [`RuntimeError::ArityMismatch`] / [`RuntimeError::TypeMismatch`]
    ///   on a signature disagreement
    /// - [`RuntimeError::Trap`] if the guest traps
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let func = self
            .caller
            .get_export(name)
            .and_then(wasmtime::Extern::into_func)
            .ok_or_else(|| RuntimeError::not_found("function export", name))?;

        let signature = convert::signature(&func.ty(&self.caller))?;
        let results_len = signature.results().len();
        signature.check_call(args, results_len)?;

        let params: Vec<_> = args.iter().copied().map(convert::to_val).collect();
        let mut results: Vec<_> = signature
            .results()
            .iter()
            .map(|ty| convert::to_val(Value::default_for(*ty)))
            .collect();

        protected::call_nested(&mut self.caller, self.instance, |caller| {
            func.call(caller, &params, &mut results)
        })?;

        results.iter().map(convert::from_val).collect()
    }
}

impl fmt::Debug for InstanceContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceContext")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}
