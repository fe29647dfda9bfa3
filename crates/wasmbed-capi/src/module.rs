//! Compilation, validation, instantiation and serialization of modules.

use tracing::debug;
use wasmbed_common::RuntimeError;
use wasmbed_core::{CompiledModule, ImportObject, Instance, SerializedModule};

use crate::error::handle_result;
use crate::import::{imports_from_raw, wasmbed_import_object_t, wasmbed_import_t};
use crate::instance::wasmbed_instance_t;
use crate::value::{wasmbed_byte_array, wasmbed_result_t};
use crate::{default_store, slice_from_raw_parts, write_out};

/// A compiled module.
pub struct wasmbed_module_t {
    pub(crate) module: CompiledModule,
}

/// A module serialized for caching.
pub struct wasmbed_serialized_module_t {
    serialized: SerializedModule,
}

/// Compile `wasm_bytes` into a module.
///
/// # Safety
///
/// `wasm_bytes` must point to `wasm_bytes_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_compile(
    module: Option<&mut *mut wasmbed_module_t>,
    wasm_bytes: *const u8,
    wasm_bytes_len: u32,
) -> wasmbed_result_t {
    // SAFETY: forwarded to the caller.
    let bytes = unsafe { slice_from_raw_parts(wasm_bytes, wasm_bytes_len as usize) };

    debug!(wasm_bytes_len, "Compiling module");

    let result = default_store()
        .and_then(|store| CompiledModule::from_bytes(store.engine(), bytes))
        .and_then(|compiled| write_out(module, wasmbed_module_t { module: compiled }));
    handle_result(result, |()| {})
}

/// Whether `wasm_bytes` form a valid module.
///
/// Never touches the error channel.
///
/// # Safety
///
/// `wasm_bytes` must point to `wasm_bytes_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_validate(wasm_bytes: *const u8, wasm_bytes_len: u32) -> bool {
    // SAFETY: forwarded to the caller.
    let bytes = unsafe { slice_from_raw_parts(wasm_bytes, wasm_bytes_len as usize) };
    default_store().is_ok_and(|store| CompiledModule::validate(store.engine(), bytes))
}

/// Instantiate `module` with `imports_len` imports.
///
/// The imports are copied: the caller keeps ownership of every handle
/// they refer to.
///
/// # Safety
///
/// `imports` must point to `imports_len` valid imports.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_module_instantiate(
    module: Option<&wasmbed_module_t>,
    instance: Option<&mut *mut wasmbed_instance_t>,
    imports: *const wasmbed_import_t,
    imports_len: u32,
) -> wasmbed_result_t {
    let result = (|| {
        let module = module.ok_or_else(|| RuntimeError::invalid_config("null module"))?;
        // SAFETY: forwarded to the caller.
        let imports = unsafe { imports_from_raw(imports, imports_len) }?;

        let mut import_object = ImportObject::new();
        import_object.extend(imports);

        let created = Instance::new(default_store()?, &module.module, &import_object)?;
        write_out(instance, wasmbed_instance_t::new(created)?)
    })();
    handle_result(result, |()| {})
}

/// Instantiate `module` against an import object.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_module_import_instantiate(
    instance: Option<&mut *mut wasmbed_instance_t>,
    module: Option<&wasmbed_module_t>,
    import_object: Option<&wasmbed_import_object_t>,
) -> wasmbed_result_t {
    let result = (|| {
        let module = module.ok_or_else(|| RuntimeError::invalid_config("null module"))?;
        let import_object =
            import_object.ok_or_else(|| RuntimeError::invalid_config("null import object"))?;

        let created = Instance::new(default_store()?, &module.module, &import_object.imports)?;
        write_out(instance, wasmbed_instance_t::new(created)?)
    })();
    handle_result(result, |()| {})
}

/// Serialize `module`.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_module_serialize(
    serialized_module: Option<&mut *mut wasmbed_serialized_module_t>,
    module: Option<&wasmbed_module_t>,
) -> wasmbed_result_t {
    let result = module
        .ok_or_else(|| RuntimeError::invalid_config("null module"))
        .and_then(|module| module.module.serialize())
        .and_then(|serialized| {
            write_out(serialized_module, wasmbed_serialized_module_t { serialized })
        });
    handle_result(result, |()| {})
}

/// Rebuild a module from its serialized form.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_module_deserialize(
    module: Option<&mut *mut wasmbed_module_t>,
    serialized_module: Option<&wasmbed_serialized_module_t>,
) -> wasmbed_result_t {
    let result = (|| {
        let serialized = serialized_module
            .ok_or_else(|| RuntimeError::invalid_config("null serialized module"))?;
        let engine = default_store()?.engine();
        let rebuilt = CompiledModule::deserialize(engine, &serialized.serialized)?;
        write_out(module, wasmbed_module_t { module: rebuilt })
    })();
    handle_result(result, |()| {})
}

/// Bytes of a serialized module, valid until it is destroyed.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_serialized_module_bytes(
    serialized_module: Option<&wasmbed_serialized_module_t>,
) -> wasmbed_byte_array {
    serialized_module.map_or_else(wasmbed_byte_array::empty, |module| {
        wasmbed_byte_array::borrowed(module.serialized.as_bytes())
    })
}

/// Wrap bytes produced by [`wasmbed_serialized_module_bytes`].
///
/// The bytes are copied.
///
/// # Safety
///
/// `serialized_module_bytes` must point to `serialized_module_bytes_length`
/// readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn wasmbed_serialized_module_from_bytes(
    serialized_module: Option<&mut *mut wasmbed_serialized_module_t>,
    serialized_module_bytes: *const u8,
    serialized_module_bytes_length: u32,
) -> wasmbed_result_t {
    // SAFETY: forwarded to the caller.
    let bytes = unsafe {
        slice_from_raw_parts(serialized_module_bytes, serialized_module_bytes_length as usize)
    };
    let result = SerializedModule::from_bytes(bytes).and_then(|serialized| {
        write_out(serialized_module, wasmbed_serialized_module_t { serialized })
    });
    handle_result(result, |()| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_serialized_module_destroy(
    _serialized_module: Option<Box<wasmbed_serialized_module_t>>,
) {
}

/// Release a module. Instances created from it stay usable.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_module_destroy(_module: Option<Box<wasmbed_module_t>>) {}
