//! Flat C representations of values, byte arrays and limits.

use std::str;

use wasmbed_common::{ExternKind, Limits, RuntimeError, Value, ValueType};

/// Status returned by fallible functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum wasmbed_result_t {
    /// The call succeeded.
    WASMBED_OK = 1,
    /// The call failed; the message is in the error channel.
    WASMBED_ERROR = 2,
}

/// Type tag of a [`wasmbed_value_t`].
pub type wasmbed_value_tag = u32;

pub const WASM_I32: wasmbed_value_tag = 0;
pub const WASM_I64: wasmbed_value_tag = 1;
pub const WASM_F32: wasmbed_value_tag = 2;
pub const WASM_F64: wasmbed_value_tag = 3;

/// Kind tag of an import or export.
pub type wasmbed_import_export_kind = u32;

pub const WASM_FUNCTION: wasmbed_import_export_kind = ExternKind::Function as u32;
pub const WASM_GLOBAL: wasmbed_import_export_kind = ExternKind::Global as u32;
pub const WASM_MEMORY: wasmbed_import_export_kind = ExternKind::Memory as u32;
pub const WASM_TABLE: wasmbed_import_export_kind = ExternKind::Table as u32;

/// Payload of a [`wasmbed_value_t`], read according to its tag.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(non_snake_case)]
pub union wasmbed_value {
    pub I32: i32,
    pub I64: i64,
    pub F32: f32,
    pub F64: f64,
}

/// A tagged WebAssembly value.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct wasmbed_value_t {
    pub tag: wasmbed_value_tag,
    pub value: wasmbed_value,
}

impl wasmbed_value_t {
    /// Decode into a [`Value`], rejecting unknown tags.
    pub(crate) fn to_value(self) -> Result<Value, RuntimeError> {
        // SAFETY: the tag selects the field that was written.
        let value = unsafe {
            match self.tag {
                WASM_I32 => Value::I32(self.value.I32),
                WASM_I64 => Value::I64(self.value.I64),
                WASM_F32 => Value::F32(self.value.F32),
                WASM_F64 => Value::F64(self.value.F64),
                other => return Err(unknown_tag(other)),
            }
        };
        Ok(value)
    }
}

impl From<Value> for wasmbed_value_t {
    fn from(value: Value) -> Self {
        match value {
            Value::I32(v) => Self {
                tag: WASM_I32,
                value: wasmbed_value { I32: v },
            },
            Value::I64(v) => Self {
                tag: WASM_I64,
                value: wasmbed_value { I64: v },
            },
            Value::F32(v) => Self {
                tag: WASM_F32,
                value: wasmbed_value { F32: v },
            },
            Value::F64(v) => Self {
                tag: WASM_F64,
                value: wasmbed_value { F64: v },
            },
        }
    }
}

impl std::fmt::Debug for wasmbed_value_t {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_value() {
            Ok(value) => write!(f, "wasmbed_value_t({value:?})"),
            Err(_) => write!(f, "wasmbed_value_t(tag {})", self.tag),
        }
    }
}

fn unknown_tag(tag: wasmbed_value_tag) -> RuntimeError {
    RuntimeError::invalid_config(format!("unknown value tag {tag}"))
}

pub(crate) fn tag_of(ty: ValueType) -> wasmbed_value_tag {
    match ty {
        ValueType::I32 => WASM_I32,
        ValueType::I64 => WASM_I64,
        ValueType::F32 => WASM_F32,
        ValueType::F64 => WASM_F64,
    }
}

pub(crate) fn type_of(tag: wasmbed_value_tag) -> Result<ValueType, RuntimeError> {
    match tag {
        WASM_I32 => Ok(ValueType::I32),
        WASM_I64 => Ok(ValueType::I64),
        WASM_F32 => Ok(ValueType::F32),
        WASM_F64 => Ok(ValueType::F64),
        other => Err(unknown_tag(other)),
    }
}

/// Decode a C value array.
///
/// # Safety
///
/// `values` must be null or point to `len` initialized values.
pub(crate) unsafe fn values_from_raw(
    values: *const wasmbed_value_t,
    len: u32,
) -> Result<Vec<Value>, RuntimeError> {
    // SAFETY: forwarded to the caller.
    let values = unsafe { crate::slice_from_raw_parts(values, len as usize) };
    values.iter().map(|value| value.to_value()).collect()
}

/// Copy value types into a caller buffer of `len` tags.
///
/// # Safety
///
/// `out` must be null or point to `len` writable tags.
pub(crate) unsafe fn write_tags(
    what: &'static str,
    types: &[ValueType],
    out: *mut wasmbed_value_tag,
    len: u32,
) -> Result<(), RuntimeError> {
    // SAFETY: forwarded to the caller.
    let out = unsafe { crate::slice_from_raw_parts_mut(out, len as usize) };
    if out.len() < types.len() {
        return Err(RuntimeError::arity_mismatch(what, types.len(), out.len()));
    }
    for (slot, ty) in out.iter_mut().zip(types) {
        *slot = tag_of(*ty);
    }
    Ok(())
}

/// Store a count behind an out-pointer.
pub(crate) fn write_arity(out: Option<&mut u32>, count: usize) -> Result<(), RuntimeError> {
    let out = out.ok_or_else(|| RuntimeError::invalid_config("null output pointer"))?;
    *out = u32::try_from(count).unwrap_or(u32::MAX);
    Ok(())
}

/// Borrowed bytes passed across the boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct wasmbed_byte_array {
    pub bytes: *const u8,
    pub bytes_len: u32,
}

impl wasmbed_byte_array {
    /// Point at `bytes`. The array is only valid while `bytes` is.
    pub(crate) fn borrowed(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.as_ptr(),
            bytes_len: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
        }
    }

    /// A zero-length array.
    pub(crate) fn empty() -> Self {
        Self {
            bytes: std::ptr::null(),
            bytes_len: 0,
        }
    }

    /// Hand ownership of `bytes` to the caller; released by [`free_owned`](Self::free_owned).
    pub(crate) fn owned(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Box<[u8]> = bytes.into().into_boxed_slice();
        let bytes_len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        Self {
            bytes: Box::into_raw(bytes).cast::<u8>(),
            bytes_len,
        }
    }

    /// # Safety
    ///
    /// `self` must come from [`owned`](Self::owned) and not have been freed.
    pub(crate) unsafe fn free_owned(self) {
        if self.bytes.is_null() {
            return;
        }
        let slice = std::ptr::slice_from_raw_parts_mut(self.bytes.cast_mut(), self.bytes_len as usize);
        // SAFETY: the pointer and length were produced by `owned`.
        drop(unsafe { Box::from_raw(slice) });
    }

    /// # Safety
    ///
    /// `bytes` must be null or point to `bytes_len` readable bytes.
    pub(crate) unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        // SAFETY: forwarded to the caller.
        unsafe { crate::slice_from_raw_parts(self.bytes, self.bytes_len as usize) }
    }

    /// # Safety
    ///
    /// Same as [`as_slice`](Self::as_slice).
    pub(crate) unsafe fn as_str<'a>(&self) -> Result<&'a str, RuntimeError> {
        // SAFETY: forwarded to the caller.
        let bytes = unsafe { self.as_slice() };
        str::from_utf8(bytes)
            .map_err(|e| RuntimeError::invalid_config(format!("name is not valid UTF-8: {e}")))
    }
}

/// An optional `u32`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct wasmbed_limit_option_t {
    pub has_some: bool,
    pub some: u32,
}

/// Limits of a memory (pages) or a table (elements).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct wasmbed_limits_t {
    pub min: u32,
    pub max: wasmbed_limit_option_t,
}

impl From<wasmbed_limits_t> for Limits {
    fn from(limits: wasmbed_limits_t) -> Self {
        Limits::new(limits.min, limits.max.has_some.then_some(limits.max.some))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_tags() {
        let value = wasmbed_value_t::from(Value::I64(-3));
        assert_eq!(value.tag, WASM_I64);
        assert_eq!(value.to_value().unwrap(), Value::I64(-3));

        let value = wasmbed_value_t::from(Value::F32(1.5));
        assert_eq!(value.tag, WASM_F32);
        assert_eq!(unsafe { value.value.F32 }, 1.5);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let value = wasmbed_value_t {
            tag: 9,
            value: wasmbed_value { I64: 0 },
        };
        assert!(value.to_value().is_err());
        assert!(type_of(9).is_err());
        assert_eq!(type_of(tag_of(ValueType::F64)).unwrap(), ValueType::F64);
    }

    #[test]
    fn test_limits_conversion() {
        let limits = wasmbed_limits_t {
            min: 1,
            max: wasmbed_limit_option_t {
                has_some: false,
                some: 7,
            },
        };
        assert_eq!(Limits::from(limits), Limits::new(1, None));

        let limits = wasmbed_limits_t {
            min: 1,
            max: wasmbed_limit_option_t {
                has_some: true,
                some: 2,
            },
        };
        assert_eq!(Limits::from(limits), Limits::new(1, Some(2)));
    }

    #[test]
    fn test_byte_array_null_is_empty() {
        let array = wasmbed_byte_array::empty();
        assert!(unsafe { array.as_slice() }.is_empty());
        assert_eq!(unsafe { array.as_str() }.unwrap(), "");

        let bad = [0xffu8, 0xfe];
        assert!(unsafe { wasmbed_byte_array::borrowed(&bad).as_str() }.is_err());
    }
}
