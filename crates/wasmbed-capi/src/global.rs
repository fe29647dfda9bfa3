//! Global variables.

use wasmbed_common::{RuntimeError, Value, ValueType};
use wasmbed_core::Global;

use crate::default_store;
use crate::error::{handle_result, into_raw_or_null, update_last_error};
use crate::value::{tag_of, wasmbed_result_t, wasmbed_value_t, wasmbed_value_tag};

/// A global variable.
pub struct wasmbed_global_t {
    pub(crate) global: Global,
}

/// Mutability and value type of a global.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct wasmbed_global_descriptor_t {
    pub mutable_: bool,
    pub kind: wasmbed_value_tag,
}

/// Create a global holding `value`.
///
/// Returns null, with the error channel set, if `value` has an unknown
/// tag.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_global_new(value: wasmbed_value_t, mutable_: bool) -> *mut wasmbed_global_t {
    let created = value
        .to_value()
        .and_then(|value| Global::new(default_store()?, value, mutable_))
        .map(|global| wasmbed_global_t { global });
    into_raw_or_null(created)
}

/// Current value; an `i32` zero for null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_global_get(global: Option<&wasmbed_global_t>) -> wasmbed_value_t {
    let value = global.map_or(Ok(Value::I32(0)), |global| global.global.get());
    match value {
        Ok(value) => value.into(),
        Err(err) => {
            update_last_error(err);
            Value::I32(0).into()
        }
    }
}

/// Write `value`.
///
/// Fails on an immutable global or a value of another type.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_global_set(
    global: Option<&wasmbed_global_t>,
    value: wasmbed_value_t,
) -> wasmbed_result_t {
    let result = (|| {
        let global = global.ok_or_else(|| RuntimeError::invalid_config("null global"))?;
        global.global.set(value.to_value()?)
    })();
    handle_result(result, |()| {})
}

/// Mutability and type; an immutable `i32` for null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_global_get_descriptor(
    global: Option<&wasmbed_global_t>,
) -> wasmbed_global_descriptor_t {
    let fallback = wasmbed_global_descriptor_t {
        mutable_: false,
        kind: tag_of(ValueType::I32),
    };
    let Some(global) = global else {
        return fallback;
    };

    match global.global.descriptor() {
        Ok(descriptor) => wasmbed_global_descriptor_t {
            mutable_: descriptor.mutable,
            kind: tag_of(descriptor.value_type),
        },
        Err(err) => {
            update_last_error(err);
            fallback
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_global_destroy(_global: Option<Box<wasmbed_global_t>>) {}
