//! Instance exports and exported functions.

use std::os::raw::c_int;

use wasmbed_common::{FuncSignature, RuntimeError};
use wasmbed_core::{Export, ExportedFunction, Extern, Instance};

use crate::descriptor::kind_tag;
use crate::error::handle_result;
use crate::instance::call_into;
use crate::memory::wasmbed_memory_t;
use crate::value::{
    values_from_raw, wasmbed_byte_array, wasmbed_import_export_kind, wasmbed_result_t,
    wasmbed_value_t, wasmbed_value_tag, write_arity, write_tags,
};
use crate::{slice_from_raw_parts_mut, write_out};

/// Snapshot of an instance's exports.
pub struct wasmbed_exports_t {
    exports: Vec<wasmbed_export_t>,
}

/// One named export.
pub struct wasmbed_export_t {
    export: Export,
    func: Option<wasmbed_export_func_t>,
}

/// A function exported by an instance. Keeps its instance alive.
pub struct wasmbed_export_func_t {
    func: ExportedFunction,
}

impl wasmbed_exports_t {
    /// Exports of kinds the C API cannot represent are left out.
    pub(crate) fn new(instance: &Instance) -> Self {
        let exports = instance
            .exports()
            .iter()
            .filter(|export| export.kind().is_some())
            .map(|export| wasmbed_export_t {
                func: match export.value() {
                    Extern::Function(func) => Some(wasmbed_export_func_t { func: func.clone() }),
                    _ => None,
                },
                export: export.clone(),
            })
            .collect();
        Self { exports }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_exports_destroy(_exports: Option<Box<wasmbed_exports_t>>) {}

/// Number of exports; 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_exports_len(exports: Option<&wasmbed_exports_t>) -> c_int {
    exports.map_or(0, |e| c_int::try_from(e.exports.len()).unwrap_or(c_int::MAX))
}

/// Export at `idx`, owned by the snapshot; null if out of range.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_exports_get(
    exports: Option<&wasmbed_exports_t>,
    idx: c_int,
) -> Option<&wasmbed_export_t> {
    let idx = usize::try_from(idx).ok()?;
    exports?.exports.get(idx)
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_kind(export: Option<&wasmbed_export_t>) -> wasmbed_import_export_kind {
    export
        .and_then(|export| export.export.kind())
        .map_or(0, kind_tag)
}

/// Export name, valid until the snapshot is destroyed.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_name(export: Option<&wasmbed_export_t>) -> wasmbed_byte_array {
    export.map_or_else(wasmbed_byte_array::empty, |export| {
        wasmbed_byte_array::borrowed(export.export.name().as_bytes())
    })
}

/// The exported function, owned by the snapshot; null if the export is
/// not a function.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_to_func(
    export: Option<&wasmbed_export_t>,
) -> Option<&wasmbed_export_func_t> {
    export?.func.as_ref()
}

/// Write a new handle to the exported memory into `memory`.
///
/// The handle is released with [`wasmbed_memory_destroy`](crate::wasmbed_memory_destroy).
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_to_memory(
    export: Option<&wasmbed_export_t>,
    memory: Option<&mut *mut wasmbed_memory_t>,
) -> wasmbed_result_t {
    let result = (|| {
        let export = export.ok_or_else(|| RuntimeError::invalid_config("null export"))?;
        let Extern::Memory(exported) = export.export.value() else {
            let found = export
                .export
                .kind()
                .map_or_else(|| "unsupported".to_string(), |kind| kind.to_string());
            return Err(RuntimeError::kind_mismatch(export.export.name(), "memory", found));
        };
        write_out(memory, wasmbed_memory_t::owned(exported.clone()))
    })();
    handle_result(result, |()| {})
}

fn signature_of(func: Option<&wasmbed_export_func_t>) -> Result<&FuncSignature, RuntimeError> {
    let func = func.ok_or_else(|| RuntimeError::invalid_config("null export function"))?;
    func.func.signature().ok_or_else(|| {
        RuntimeError::link_failed(format!("export {} has an unsupported signature", func.func.name()))
    })
}

/// Call the exported function.
///
/// `results` must have exactly as many slots as the function returns.
///
/// # Safety
///
/// `params` must point to `params_len` values and `results` to
/// `results_len` writable values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_export_func_call(
    func: Option<&wasmbed_export_func_t>,
    params: *const wasmbed_value_t,
    params_len: c_int,
    results: *mut wasmbed_value_t,
    results_len: c_int,
) -> wasmbed_result_t {
    let result = (|| {
        let func = func.ok_or_else(|| RuntimeError::invalid_config("null export function"))?;
        let params_len = u32::try_from(params_len)
            .map_err(|_| RuntimeError::invalid_config("negative parameter count"))?;
        let results_len = usize::try_from(results_len)
            .map_err(|_| RuntimeError::invalid_config("negative result count"))?;

        // SAFETY: forwarded to the caller.
        let args = unsafe { values_from_raw(params, params_len) }?;
        // SAFETY: forwarded to the caller.
        let out = unsafe { slice_from_raw_parts_mut(results, results_len) };

        call_into(out, |values| func.func.call(&args, values))
    })();
    handle_result(result, |()| {})
}

/// Write the parameter types into `params`, which holds `params_len` tags.
///
/// # Safety
///
/// `params` must point to `params_len` writable tags.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_export_func_params(
    func: Option<&wasmbed_export_func_t>,
    params: *mut wasmbed_value_tag,
    params_len: u32,
) -> wasmbed_result_t {
    let result = signature_of(func)
        // SAFETY: forwarded to the caller.
        .and_then(|sig| unsafe { write_tags("parameters", sig.params(), params, params_len) });
    handle_result(result, |()| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_func_params_arity(
    func: Option<&wasmbed_export_func_t>,
    result: Option<&mut u32>,
) -> wasmbed_result_t {
    let outcome = signature_of(func).and_then(|sig| write_arity(result, sig.params().len()));
    handle_result(outcome, |()| {})
}

/// Write the result types into `returns`, which holds `returns_len` tags.
///
/// # Safety
///
/// `returns` must point to `returns_len` writable tags.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_export_func_returns(
    func: Option<&wasmbed_export_func_t>,
    returns: *mut wasmbed_value_tag,
    returns_len: u32,
) -> wasmbed_result_t {
    let result = signature_of(func)
        // SAFETY: forwarded to the caller.
        .and_then(|sig| unsafe { write_tags("results", sig.results(), returns, returns_len) });
    handle_result(result, |()| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_func_returns_arity(
    func: Option<&wasmbed_export_func_t>,
    result: Option<&mut u32>,
) -> wasmbed_result_t {
    let outcome = signature_of(func).and_then(|sig| write_arity(result, sig.results().len()));
    handle_result(outcome, |()| {})
}
