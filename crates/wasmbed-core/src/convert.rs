//! Conversions between wasmbed's engine-independent types and Wasmtime's.

use wasmtime::{Engine, ExternType, FuncType, Val, ValType};

use wasmbed_common::{ExternKind, FuncSignature, RuntimeError, Value, ValueType};

pub(crate) fn val_type(ty: ValueType) -> ValType {
    match ty {
        ValueType::I32 => ValType::I32,
        ValueType::I64 => ValType::I64,
        ValueType::F32 => ValType::F32,
        ValueType::F64 => ValType::F64,
    }
}

pub(crate) fn value_type(ty: &ValType) -> Result<ValueType, RuntimeError> {
    match ty {
        ValType::I32 => Ok(ValueType::I32),
        ValType::I64 => Ok(ValueType::I64),
        ValType::F32 => Ok(ValueType::F32),
        ValType::F64 => Ok(ValueType::F64),
        other => Err(RuntimeError::link_failed(format!(
            "unsupported value type {other}"
        ))),
    }
}

pub(crate) fn to_val(value: Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
    }
}

pub(crate) fn from_val(val: &Val) -> Result<Value, RuntimeError> {
    match val {
        Val::I32(v) => Ok(Value::I32(*v)),
        Val::I64(v) => Ok(Value::I64(*v)),
        Val::F32(bits) => Ok(Value::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Ok(Value::F64(f64::from_bits(*bits))),
        _ => Err(RuntimeError::trap("non-numeric value crossed the host boundary")),
    }
}

pub(crate) fn signature(ty: &FuncType) -> Result<FuncSignature, RuntimeError> {
    let params = ty
        .params()
        .map(|p| value_type(&p))
        .collect::<Result<Vec<_>, _>>()?;
    let results = ty
        .results()
        .map(|r| value_type(&r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FuncSignature::new(params, results))
}

pub(crate) fn func_type(engine: &Engine, sig: &FuncSignature) -> FuncType {
    FuncType::new(
        engine,
        sig.params().iter().copied().map(val_type),
        sig.results().iter().copied().map(val_type),
    )
}

pub(crate) fn extern_kind(ty: &ExternType) -> ExternKind {
    match ty {
        ExternType::Func(_) => ExternKind::Function,
        ExternType::Global(_) => ExternKind::Global,
        ExternType::Memory(_) => ExternKind::Memory,
        ExternType::Table(_) => ExternKind::Table,
    }
}
