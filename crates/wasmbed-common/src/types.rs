//! Engine-independent type definitions shared across the workspace.
//!
//! - [`Value`] and [`ValueType`]: the four numeric WebAssembly value types
//! - [`FuncSignature`]: ordered parameter and result types of a function
//! - [`Limits`]: the `{min, max?}` pair used by memories and tables
//! - [`ExternKind`]: the kind of an import or export

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Size of one WebAssembly page in bytes (64 KiB).
pub const WASM_PAGE_SIZE: usize = 0x1_0000;

/// Maximum number of pages a 32-bit linear memory can hold.
pub const WASM_MAX_PAGES: u32 = 0x1_0000;

/// Type tag of a WebAssembly value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit IEEE 754 float.
    F32,
    /// 64-bit IEEE 754 float.
    F64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::I32 => write!(f, "i32"),
            ValueType::I64 => write!(f, "i64"),
            ValueType::F32 => write!(f, "f32"),
            ValueType::F64 => write!(f, "f64"),
        }
    }
}

/// A tagged WebAssembly value.
///
/// The payload is interpreted solely by the variant. Values are plain data:
/// they are copied across the host/guest boundary, never shared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl Value {
    /// The type tag of this value.
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// The zero value of the given type.
    pub fn default_for(ty: ValueType) -> Self {
        match ty {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
        }
    }

    /// Returns the payload if this is an `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload if this is an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload if this is an `f32`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload if this is an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

/// Parameter and result types of a function, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncSignature {
    params: Vec<ValueType>,
    results: Vec<ValueType>,
}

impl FuncSignature {
    /// Create a signature from parameter and result types.
    pub fn new(
        params: impl IntoIterator<Item = ValueType>,
        results: impl IntoIterator<Item = ValueType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// Parameter types.
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Result types.
    pub fn results(&self) -> &[ValueType] {
        &self.results
    }

    /// Check call-site arguments and the results buffer length.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::ArityMismatch`] if either length disagrees
    /// - [`RuntimeError::TypeMismatch`] if an argument has the wrong type
    pub fn check_call(&self, args: &[Value], results_len: usize) -> Result<(), RuntimeError> {
        if args.len() != self.params.len() {
            return Err(RuntimeError::arity_mismatch(
                "parameters",
                self.params.len(),
                args.len(),
            ));
        }
        if results_len != self.results.len() {
            return Err(RuntimeError::arity_mismatch(
                "results",
                self.results.len(),
                results_len,
            ));
        }
        check_types("argument", &self.params, args)
    }

    /// Check values returned by a host function against the declared results.
    pub fn check_results(&self, results: &[Value]) -> Result<(), RuntimeError> {
        if results.len() != self.results.len() {
            return Err(RuntimeError::arity_mismatch(
                "results",
                self.results.len(),
                results.len(),
            ));
        }
        check_types("result", &self.results, results)
    }
}

fn check_types(what: &str, expected: &[ValueType], values: &[Value]) -> Result<(), RuntimeError> {
    for (index, (ty, value)) in expected.iter().zip(values).enumerate() {
        if value.ty() != *ty {
            return Err(RuntimeError::TypeMismatch {
                what: format!("{what} {index}"),
                expected: *ty,
                found: value.ty(),
            });
        }
    }
    Ok(())
}

impl fmt::Display for FuncSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[ValueType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// Size limits of a memory (in pages) or a table (in elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Limits {
    /// Initial size.
    pub min: u32,
    /// Optional upper bound.
    pub max: Option<u32>,
}

impl Limits {
    /// Create a new limits pair.
    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// Check that `min <= max` and that neither bound exceeds `ceiling`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidLimits`] describing the violation.
    pub fn validate(&self, ceiling: u32) -> Result<(), RuntimeError> {
        if let Some(max) = self.max {
            if self.min > max {
                return Err(RuntimeError::invalid_limits(format!(
                    "minimum {} is greater than maximum {max}",
                    self.min
                )));
            }
            if max > ceiling {
                return Err(RuntimeError::invalid_limits(format!(
                    "maximum {max} exceeds the limit of {ceiling}"
                )));
            }
        }
        if self.min > ceiling {
            return Err(RuntimeError::invalid_limits(format!(
                "minimum {} exceeds the limit of {ceiling}",
                self.min
            )));
        }
        Ok(())
    }
}

/// Kind of an import or export.
///
/// The discriminants are part of the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExternKind {
    /// A function.
    Function = 0,
    /// A global variable.
    Global = 1,
    /// A linear memory.
    Memory = 2,
    /// A table.
    Table = 3,
}

impl ExternKind {
    /// Decode a raw kind tag.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ExternKind::Function),
            1 => Some(ExternKind::Global),
            2 => Some(ExternKind::Memory),
            3 => Some(ExternKind::Table),
            _ => None,
        }
    }
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternKind::Function => write!(f, "function"),
            ExternKind::Global => write!(f, "global"),
            ExternKind::Memory => write!(f, "memory"),
            ExternKind::Table => write!(f, "table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Value::I32(1).ty(), ValueType::I32);
        assert_eq!(Value::I64(1).ty(), ValueType::I64);
        assert_eq!(Value::F32(1.0).ty(), ValueType::F32);
        assert_eq!(Value::F64(1.0).ty(), ValueType::F64);
        assert_eq!(Value::default_for(ValueType::F64), Value::F64(0.0));
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::I32(7).as_i32(), Some(7));
        assert_eq!(Value::I32(7).as_i64(), None);
        assert_eq!(Value::from(2.5f64).as_f64(), Some(2.5));
    }

    #[test]
    fn test_signature_check_call() {
        let sig = FuncSignature::new([ValueType::I32, ValueType::I32], [ValueType::I32]);

        assert!(sig.check_call(&[Value::I32(3), Value::I32(4)], 1).is_ok());

        let err = sig.check_call(&[Value::I32(3), Value::I32(4)], 0).unwrap_err();
        assert!(matches!(err, RuntimeError::ArityMismatch { .. }));

        let err = sig.check_call(&[Value::I32(3)], 1).unwrap_err();
        assert!(matches!(err, RuntimeError::ArityMismatch { .. }));

        let err = sig.check_call(&[Value::I32(3), Value::I64(4)], 1).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::TypeMismatch {
                expected: ValueType::I32,
                found: ValueType::I64,
                ..
            }
        ));
    }

    #[test]
    fn test_signature_display() {
        let sig = FuncSignature::new([ValueType::I32, ValueType::F64], []);
        assert_eq!(sig.to_string(), "(i32, f64) -> ()");
    }

    #[test]
    fn test_limits_validate() {
        assert!(Limits::new(1, Some(2)).validate(WASM_MAX_PAGES).is_ok());
        assert!(Limits::new(1, None).validate(WASM_MAX_PAGES).is_ok());
        assert!(Limits::new(3, Some(2)).validate(WASM_MAX_PAGES).is_err());
        assert!(Limits::new(0, Some(70_000)).validate(WASM_MAX_PAGES).is_err());
        assert!(Limits::new(70_000, None).validate(WASM_MAX_PAGES).is_err());
    }

    #[test]
    fn test_extern_kind_raw() {
        assert_eq!(ExternKind::from_raw(0), Some(ExternKind::Function));
        assert_eq!(ExternKind::from_raw(3), Some(ExternKind::Table));
        assert_eq!(ExternKind::from_raw(4), None);
        assert_eq!(ExternKind::Memory as u32, 2);
    }
}
