//! Instances, their contexts and host-initiated traps.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, c_char, c_void};
use std::ptr;

use tracing::{debug, warn};
use wasmbed_common::{RuntimeError, Value};
use wasmbed_core::{Import, Instance, InstanceContext, instantiate};

use crate::error::{handle_result, update_last_error};
use crate::export::wasmbed_exports_t;
use crate::import::{imports_from_raw, wasmbed_import_t};
use crate::memory::wasmbed_memory_t;
use crate::value::{values_from_raw, wasmbed_result_t, wasmbed_value_t};
use crate::{default_store, slice_from_raw_parts, slice_from_raw_parts_mut, write_out};

/// A live instance.
pub struct wasmbed_instance_t {
    pub(crate) instance: Instance,
    context: wasmbed_instance_context_t,
}

/// The context a host function runs in.
///
/// Gives access to the user data and the memories of the instance that
/// imported the function. A context is owned by its instance or by the
/// call it was created for, and is never destroyed separately.
pub struct wasmbed_instance_context_t {
    data: Cell<*mut c_void>,
    memories: Vec<wasmbed_memory_t>,
    trap: RefCell<Option<String>>,
}

/// User data pointer attached to an instance.
struct UserData(*mut c_void);

// SAFETY: the pointer is opaque to the runtime and only handed back to
// the embedder, who is responsible for its thread safety.
unsafe impl Send for UserData {}

impl wasmbed_instance_context_t {
    /// Context for one host function call.
    ///
    /// Memories are views of the guest memories: the store stays locked for
    /// the whole call, so they cannot move.
    pub(crate) fn for_call(ctx: &mut InstanceContext<'_>) -> Result<Self, RuntimeError> {
        let data = ctx.data::<UserData>().map_or(ptr::null_mut(), |data| data.0);

        let mut memories = Vec::with_capacity(ctx.memory_count());
        for index in 0..ctx.memory_count() {
            memories.push(wasmbed_memory_t::view(ctx.memory_data_mut(index)?));
        }

        Ok(Self {
            data: Cell::new(data),
            memories,
            trap: RefCell::new(None),
        })
    }

    fn for_instance(instance: &Instance) -> Result<Self, RuntimeError> {
        let memories = (0..instance.memory_count()?)
            .filter_map(|index| instance.memory(index).ok())
            .map(wasmbed_memory_t::owned)
            .collect();

        Ok(Self {
            data: Cell::new(ptr::null_mut()),
            memories,
            trap: RefCell::new(None),
        })
    }

    /// The trap message recorded during the call, if any.
    pub(crate) fn take_trap(&self) -> Option<String> {
        self.trap.borrow_mut().take()
    }
}

impl wasmbed_instance_t {
    pub(crate) fn new(instance: Instance) -> Result<Self, RuntimeError> {
        let context = wasmbed_instance_context_t::for_instance(&instance)?;
        Ok(Self { instance, context })
    }
}

/// Compile `wasm_bytes` and instantiate the result in one step.
///
/// # Safety
///
/// `wasm_bytes` must point to `wasm_bytes_len` readable bytes and
/// `imports` to `imports_len` valid entries.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_instantiate(
    instance: Option<&mut *mut wasmbed_instance_t>,
    wasm_bytes: *const u8,
    wasm_bytes_len: u32,
    imports: *const wasmbed_import_t,
    imports_len: u32,
) -> wasmbed_result_t {
    // SAFETY: forwarded to the caller.
    let bytes = unsafe { slice_from_raw_parts(wasm_bytes, wasm_bytes_len as usize) };
    let result = (|| {
        // SAFETY: forwarded to the caller.
        let imports: Vec<Import> = unsafe { imports_from_raw(imports, imports_len) }?;
        let created = instantiate(default_store()?, bytes, imports)?;
        write_out(instance, wasmbed_instance_t::new(created)?)
    })();
    handle_result(result, |()| {})
}

/// Call the exported function `name`.
///
/// `results` must have exactly as many slots as the function returns.
/// A guest trap, including one raised by a host function, fails the call
/// and leaves its message in the error channel.
///
/// # Safety
///
/// `name` must be a NUL-terminated string, `params` must point to
/// `params_len` values and `results` to `results_len` writable values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_instance_call(
    instance: Option<&wasmbed_instance_t>,
    name: *const c_char,
    params: *const wasmbed_value_t,
    params_len: u32,
    results: *mut wasmbed_value_t,
    results_len: u32,
) -> wasmbed_result_t {
    let result = (|| {
        let instance = instance.ok_or_else(|| RuntimeError::invalid_config("null instance"))?;
        if name.is_null() {
            return Err(RuntimeError::invalid_config("function name is null"));
        }
        // SAFETY: forwarded to the caller.
        let name = unsafe { CStr::from_ptr(name) }
            .to_str()
            .map_err(|e| RuntimeError::invalid_config(format!("function name is not UTF-8: {e}")))?;
        // SAFETY: forwarded to the caller.
        let args = unsafe { values_from_raw(params, params_len) }?;
        // SAFETY: forwarded to the caller.
        let out = unsafe { slice_from_raw_parts_mut(results, results_len as usize) };

        call_into(out, |values| instance.instance.call(name, &args, values))
    })();
    handle_result(result, |()| {})
}

/// Run `call` with a results buffer as long as `out` and copy the values
/// back on success.
pub(crate) fn call_into(
    out: &mut [wasmbed_value_t],
    call: impl FnOnce(&mut [Value]) -> Result<(), RuntimeError>,
) -> Result<(), RuntimeError> {
    let mut values = vec![Value::I32(0); out.len()];
    if let Err(err) = call(&mut values) {
        if err.is_trap() {
            warn!(error = %err, "Guest call trapped");
        }
        return Err(err);
    }
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value.into();
    }
    Ok(())
}

/// Snapshot the exports of `instance` into `exports`.
///
/// Does nothing if either pointer is null. The snapshot keeps the
/// instance alive.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_instance_exports(
    instance: Option<&wasmbed_instance_t>,
    exports: Option<&mut *mut wasmbed_exports_t>,
) {
    let (Some(instance), Some(out)) = (instance, exports) else {
        return;
    };
    *out = Box::into_raw(Box::new(wasmbed_exports_t::new(&instance.instance)));
}

/// Release an instance. Export snapshots and exported functions taken from
/// it stay usable.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_instance_destroy(instance: Option<Box<wasmbed_instance_t>>) {
    if let Some(instance) = instance {
        debug!(instance = %instance.instance.id(), "Destroying instance");
    }
}

/// The context of `instance`, owned by the instance.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_instance_context_get(
    instance: Option<&wasmbed_instance_t>,
) -> Option<&wasmbed_instance_context_t> {
    instance.map(|instance| &instance.context)
}

/// Attach an opaque pointer to `instance`, readable from every context
/// of that instance. The runtime never dereferences or frees it.
///
/// Called from inside a host function, this leaves the pointer unchanged
/// and sets the error channel.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_instance_context_data_set(
    instance: Option<&wasmbed_instance_t>,
    data_ptr: *mut c_void,
) {
    let Some(instance) = instance else {
        return;
    };
    match instance.instance.set_data(UserData(data_ptr)) {
        Ok(()) => instance.context.data.set(data_ptr),
        Err(err) => update_last_error(err),
    }
}

/// The pointer attached with [`wasmbed_instance_context_data_set`], or
/// null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_instance_context_data_get(
    ctx: Option<&wasmbed_instance_context_t>,
) -> *mut c_void {
    ctx.map_or(ptr::null_mut(), |ctx| ctx.data.get())
}

/// Memory `memory_idx` of the context's instance, imported memories first.
///
/// The memory belongs to the context. Returns null, with the error
/// channel set, if there is no such memory.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_instance_context_memory(
    ctx: Option<&wasmbed_instance_context_t>,
    memory_idx: u32,
) -> Option<&wasmbed_memory_t> {
    let found = ctx.and_then(|ctx| ctx.memories.get(memory_idx as usize));
    if found.is_none() {
        let err = RuntimeError::not_found("memory", memory_idx.to_string());
        update_last_error(err);
    }
    found
}

/// Abort the guest call that invoked the current host function.
///
/// The message is copied. The host function must return right after this
/// call; the values it wrote to its results are discarded and the call
/// that entered the guest fails with the message.
///
/// # Safety
///
/// `error_message` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_trap(
    ctx: Option<&wasmbed_instance_context_t>,
    error_message: *const c_char,
) -> wasmbed_result_t {
    let result = (|| {
        let ctx = ctx.ok_or_else(|| RuntimeError::invalid_config("null instance context"))?;
        if error_message.is_null() {
            return Err(RuntimeError::invalid_config("trap message is null"));
        }
        // SAFETY: forwarded to the caller.
        let message = unsafe { CStr::from_ptr(error_message) }.to_string_lossy().into_owned();
        *ctx.trap.borrow_mut() = Some(message);
        Ok(())
    })();
    handle_result(result, |()| {})
}
