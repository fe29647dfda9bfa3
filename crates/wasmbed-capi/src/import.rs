//! Host functions, import entries and import objects.

use std::ptr;

use tracing::trace;
use wasmbed_common::{ExternKind, FuncSignature, RuntimeError, Value};
use wasmbed_core::{HostFunction, Import, ImportObject, ImportValue};

use crate::error::{handle_result, into_raw_or_null};
use crate::global::wasmbed_global_t;
use crate::instance::wasmbed_instance_context_t;
use crate::memory::wasmbed_memory_t;
use crate::table::wasmbed_table_t;
use crate::value::{
    type_of, wasmbed_byte_array, wasmbed_import_export_kind, wasmbed_result_t, wasmbed_value_t,
    wasmbed_value_tag, write_arity, write_tags, WASM_FUNCTION, WASM_GLOBAL, WASM_MEMORY,
    WASM_TABLE,
};
use crate::slice_from_raw_parts;

/// Signature of a host function implemented in C.
///
/// `params` holds `params_len` arguments matching the declared parameter
/// types. `results` holds `results_len` slots pre-filled with zeros of the
/// declared result types; the callback overwrites them. To abort the guest
/// call, call [`wasmbed_trap`](crate::wasmbed_trap) on `ctx` and return.
pub type wasmbed_host_callback_t = unsafe extern "C" fn(
    ctx: *const wasmbed_instance_context_t,
    params: *const wasmbed_value_t,
    params_len: u32,
    results: *mut wasmbed_value_t,
    results_len: u32,
);

/// A host function ready to be imported.
pub struct wasmbed_import_func_t {
    pub(crate) function: HostFunction,
}

/// Payload of a [`wasmbed_import_t`], read according to its tag.
#[repr(C)]
#[derive(Clone, Copy)]
pub union wasmbed_import_export_value {
    pub func: *const wasmbed_import_func_t,
    pub table: *const wasmbed_table_t,
    pub memory: *const wasmbed_memory_t,
    pub global: *const wasmbed_global_t,
}

/// One `(namespace, name, value)` import entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct wasmbed_import_t {
    pub module_name: wasmbed_byte_array,
    pub import_name: wasmbed_byte_array,
    pub tag: wasmbed_import_export_kind,
    pub value: wasmbed_import_export_value,
}

/// Registry of import values keyed by `(namespace, name)`.
pub struct wasmbed_import_object_t {
    pub(crate) imports: ImportObject,
}

impl wasmbed_import_object_t {
    pub(crate) fn new(imports: ImportObject) -> Self {
        Self { imports }
    }
}

/// Iterator over the function entries of an import object.
///
/// Iterates over a snapshot taken at creation.
pub struct wasmbed_import_object_iter_t {
    functions: Vec<(String, String, HostFunction)>,
    position: usize,
}

fn host_function(callback: wasmbed_host_callback_t, signature: FuncSignature) -> HostFunction {
    let defaults: Vec<wasmbed_value_t> = signature
        .results()
        .iter()
        .map(|ty| Value::default_for(*ty).into())
        .collect();

    HostFunction::new(signature, move |ctx, args| {
        let context = wasmbed_instance_context_t::for_call(ctx)?;
        let params: Vec<wasmbed_value_t> = args.iter().copied().map(Into::into).collect();
        let mut results = defaults.clone();

        trace!(params = params.len(), results = results.len(), "Calling C host function");

        // SAFETY: both buffers have exactly the advertised lengths and the
        // context outlives the call.
        unsafe {
            callback(
                &context,
                params.as_ptr(),
                len_u32(params.len()),
                results.as_mut_ptr(),
                len_u32(results.len()),
            );
        }

        if let Some(message) = context.take_trap() {
            return Err(RuntimeError::trap(message));
        }
        results.into_iter().map(wasmbed_value_t::to_value).collect()
    })
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Convert a C import entry into an owned one.
///
/// The referenced handle is cloned; the caller keeps ownership of it.
///
/// # Safety
///
/// The names must be valid byte arrays and `value` must point to a live
/// handle of the kind named by `tag`.
pub(crate) unsafe fn import_from_raw(import: &wasmbed_import_t) -> Result<Import, RuntimeError> {
    // SAFETY: forwarded to the caller.
    let (module, name) = unsafe { (import.module_name.as_str()?, import.import_name.as_str()?) };

    // SAFETY: the tag selects the union field, and the caller guarantees
    // that it points to a live handle.
    let value = unsafe {
        match import.tag {
            WASM_FUNCTION => import
                .value
                .func
                .as_ref()
                .map(|func| ImportValue::Function(func.function.clone())),
            WASM_MEMORY => match import.value.memory.as_ref() {
                Some(memory) => Some(ImportValue::Memory(memory.as_owned()?.clone())),
                None => None,
            },
            WASM_TABLE => import
                .value
                .table
                .as_ref()
                .map(|table| ImportValue::Table(table.table.clone())),
            WASM_GLOBAL => import
                .value
                .global
                .as_ref()
                .map(|global| ImportValue::Global(global.global.clone())),
            other => {
                return Err(RuntimeError::invalid_config(format!(
                    "unknown import kind {other} for {module}.{name}"
                )));
            }
        }
    };

    let value = value.ok_or_else(|| {
        RuntimeError::invalid_config(format!("null import value for {module}.{name}"))
    })?;
    Ok(Import::new(module, name, value))
}

/// Convert a C import array.
///
/// # Safety
///
/// `imports` must be null or point to `len` entries valid for
/// [`import_from_raw`].
pub(crate) unsafe fn imports_from_raw(
    imports: *const wasmbed_import_t,
    len: u32,
) -> Result<Vec<Import>, RuntimeError> {
    // SAFETY: forwarded to the caller.
    let imports = unsafe { slice_from_raw_parts(imports, len as usize) };
    imports
        .iter()
        // SAFETY: forwarded to the caller.
        .map(|import| unsafe { import_from_raw(import) })
        .collect()
}

/// Hand an import entry to C, with owned names and a new handle.
///
/// Released by [`wasmbed_import_object_imports_destroy`].
fn import_to_raw(module: &str, name: &str, value: &ImportValue) -> wasmbed_import_t {
    let (tag, value) = match value {
        ImportValue::Function(function) => (
            WASM_FUNCTION,
            wasmbed_import_export_value {
                func: Box::into_raw(Box::new(wasmbed_import_func_t {
                    function: function.clone(),
                })),
            },
        ),
        ImportValue::Memory(memory) => (
            WASM_MEMORY,
            wasmbed_import_export_value {
                memory: Box::into_raw(Box::new(wasmbed_memory_t::owned(memory.clone()))),
            },
        ),
        ImportValue::Table(table) => (
            WASM_TABLE,
            wasmbed_import_export_value {
                table: Box::into_raw(Box::new(wasmbed_table_t {
                    table: table.clone(),
                })),
            },
        ),
        ImportValue::Global(global) => (
            WASM_GLOBAL,
            wasmbed_import_export_value {
                global: Box::into_raw(Box::new(wasmbed_global_t {
                    global: global.clone(),
                })),
            },
        ),
    };

    wasmbed_import_t {
        module_name: wasmbed_byte_array::owned(module),
        import_name: wasmbed_byte_array::owned(name),
        tag,
        value,
    }
}

/// Create a host function from a callback and its signature.
///
/// Returns null, with the error channel set, if `func` is null or a tag is
/// unknown.
///
/// # Safety
///
/// `params` and `returns` must point to `params_len` and `returns_len`
/// tags.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_import_func_new(
    func: Option<wasmbed_host_callback_t>,
    params: *const wasmbed_value_tag,
    params_len: u32,
    returns: *const wasmbed_value_tag,
    returns_len: u32,
) -> *mut wasmbed_import_func_t {
    // SAFETY: forwarded to the caller.
    let (params, returns) = unsafe {
        (
            slice_from_raw_parts(params, params_len as usize),
            slice_from_raw_parts(returns, returns_len as usize),
        )
    };

    let created = (|| {
        let callback = func.ok_or_else(|| RuntimeError::invalid_config("null host callback"))?;
        let params = params
            .iter()
            .map(|tag| type_of(*tag))
            .collect::<Result<Vec<_>, _>>()?;
        let returns = returns
            .iter()
            .map(|tag| type_of(*tag))
            .collect::<Result<Vec<_>, _>>()?;

        let function = host_function(callback, FuncSignature::new(params, returns));
        Ok(wasmbed_import_func_t { function })
    })();
    into_raw_or_null(created)
}

fn signature_of(func: Option<&wasmbed_import_func_t>) -> Result<&FuncSignature, RuntimeError> {
    func.map(|func| func.function.signature())
        .ok_or_else(|| RuntimeError::invalid_config("null import function"))
}

/// Write the parameter types into `params`, which holds `params_len` tags.
///
/// # Safety
///
/// `params` must point to `params_len` writable tags.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_import_func_params(
    func: Option<&wasmbed_import_func_t>,
    params: *mut wasmbed_value_tag,
    params_len: u32,
) -> wasmbed_result_t {
    let result = signature_of(func)
        // SAFETY: forwarded to the caller.
        .and_then(|sig| unsafe { write_tags("parameters", sig.params(), params, params_len) });
    handle_result(result, |()| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_func_params_arity(
    func: Option<&wasmbed_import_func_t>,
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
pub unsafe extern "C" fn wasmbed_import_func_returns(
    func: Option<&wasmbed_import_func_t>,
    returns: *mut wasmbed_value_tag,
    returns_len: u32,
) -> wasmbed_result_t {
    let result = signature_of(func)
        // SAFETY: forwarded to the caller.
        .and_then(|sig| unsafe { write_tags("results", sig.results(), returns, returns_len) });
    handle_result(result, |()| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_func_returns_arity(
    func: Option<&wasmbed_import_func_t>,
    result: Option<&mut u32>,
) -> wasmbed_result_t {
    let outcome = signature_of(func).and_then(|sig| write_arity(result, sig.results().len()));
    handle_result(outcome, |()| {})
}

/// Release a host function. Import objects and instances using it keep
/// their own reference.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_func_destroy(_func: Option<Box<wasmbed_import_func_t>>) {}

/// Create an empty import object.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_object_new() -> *mut wasmbed_import_object_t {
    Box::into_raw(Box::new(wasmbed_import_object_t::new(ImportObject::new())))
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_object_destroy(
    _import_object: Option<Box<wasmbed_import_object_t>>,
) {
}

/// Add `imports_len` entries. A key that is already present is replaced.
///
/// Nothing is added if any entry is invalid.
///
/// # Safety
///
/// `imports` must point to `imports_len` valid entries.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_import_object_extend(
    import_object: Option<&mut wasmbed_import_object_t>,
    imports: *const wasmbed_import_t,
    imports_len: u32,
) -> wasmbed_result_t {
    let result = (|| {
        let import_object =
            import_object.ok_or_else(|| RuntimeError::invalid_config("null import object"))?;
        // SAFETY: forwarded to the caller.
        let imports = unsafe { imports_from_raw(imports, imports_len) }?;
        import_object.imports.extend(imports);
        Ok(())
    })();
    handle_result(result, |()| {})
}

/// Look up the entry `(namespace, name)` of kind `tag` and write a copy
/// into `import`.
///
/// The copy owns its names and a new handle; release it with
/// [`wasmbed_import_object_imports_destroy`].
///
/// # Safety
///
/// `namespace` and `name` must be valid byte arrays.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_import_object_get_import(
    import_object: Option<&wasmbed_import_object_t>,
    namespace: wasmbed_byte_array,
    name: wasmbed_byte_array,
    tag: wasmbed_import_export_kind,
    import: Option<&mut wasmbed_import_t>,
) -> wasmbed_result_t {
    let result = (|| {
        let import_object =
            import_object.ok_or_else(|| RuntimeError::invalid_config("null import object"))?;
        // SAFETY: forwarded to the caller.
        let (namespace, name) = unsafe { (namespace.as_str()?, name.as_str()?) };
        let kind = ExternKind::from_raw(tag)
            .ok_or_else(|| RuntimeError::invalid_config(format!("unknown import kind {tag}")))?;
        let out = import.ok_or_else(|| RuntimeError::invalid_config("null output pointer"))?;

        let value = import_object.imports.get_import(namespace, name, kind)?;
        *out = import_to_raw(namespace, name, value);
        Ok(())
    })();
    handle_result(result, |()| {})
}

/// Snapshot the function entries of an import object for iteration.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_object_iterate_functions(
    import_object: Option<&wasmbed_import_object_t>,
) -> *mut wasmbed_import_object_iter_t {
    let functions = import_object.map_or_else(Vec::new, |object| {
        object
            .imports
            .functions()
            .map(|entry| {
                (
                    entry.module.to_string(),
                    entry.name.to_string(),
                    entry.function.clone(),
                )
            })
            .collect()
    });
    Box::into_raw(Box::new(wasmbed_import_object_iter_t {
        functions,
        position: 0,
    }))
}

/// Write the next function entry into `import`.
///
/// The entry owns its names and a new function handle; release it with
/// [`wasmbed_import_object_imports_destroy`]. Fails once the iterator is
/// exhausted.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_object_iter_next(
    import_object_iter: Option<&mut wasmbed_import_object_iter_t>,
    import: Option<&mut wasmbed_import_t>,
) -> wasmbed_result_t {
    let result = (|| {
        let iter = import_object_iter
            .ok_or_else(|| RuntimeError::invalid_config("null import object iterator"))?;
        let out = import.ok_or_else(|| RuntimeError::invalid_config("null output pointer"))?;
        let (module, name, function) = iter
            .functions
            .get(iter.position)
            .ok_or_else(|| RuntimeError::not_found("import", format!("#{}", iter.position)))?;

        *out = import_to_raw(module, name, &ImportValue::Function(function.clone()));
        iter.position += 1;
        Ok(())
    })();
    handle_result(result, |()| {})
}

/// Whether the iterator has no further entries; `true` for null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_object_iter_at_end(
    import_object_iter: Option<&wasmbed_import_object_iter_t>,
) -> bool {
    import_object_iter.is_none_or(|iter| iter.position >= iter.functions.len())
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_object_iter_destroy(
    _import_object_iter: Option<Box<wasmbed_import_object_iter_t>>,
) {
}

/// Release entries written by [`wasmbed_import_object_iter_next`] or
/// [`wasmbed_import_object_get_import`]: their names and their handles.
///
/// # Safety
///
/// `imports` must be null or point to `imports_len` entries produced by
/// those functions, each released at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_import_object_imports_destroy(
    imports: *mut wasmbed_import_t,
    imports_len: u32,
) {
    // SAFETY: forwarded to the caller.
    let imports = unsafe { crate::slice_from_raw_parts_mut(imports, imports_len as usize) };

    for import in imports.iter_mut() {
        // SAFETY: every pointer below was produced by `Box::into_raw` in
        // `import_to_raw`, and the tag selects the one that was written.
        unsafe {
            import.module_name.free_owned();
            import.import_name.free_owned();
            match import.tag {
                WASM_FUNCTION => drop_handle(import.value.func),
                WASM_MEMORY => drop_handle(import.value.memory),
                WASM_TABLE => drop_handle(import.value.table),
                WASM_GLOBAL => drop_handle(import.value.global),
                _ => {}
            }
        }
        import.module_name = wasmbed_byte_array::empty();
        import.import_name = wasmbed_byte_array::empty();
        import.value = wasmbed_import_export_value { func: ptr::null() };
    }
}

/// # Safety
///
/// `handle` must be null or come from `Box::into_raw`.
unsafe fn drop_handle<T>(handle: *const T) {
    if !handle.is_null() {
        // SAFETY: forwarded to the caller.
        drop(unsafe { Box::from_raw(handle.cast_mut()) });
    }
}
