//! The protected call boundary.
//!
//! Every entry into guest code goes through [`call_protected`] (outermost
//! calls, made with the store locked) or [`call_nested`] (calls made by a
//! host function back into guest code). The boundary:
//!
//! 1. Marks the instance as active so host functions and WASI see its state
//! 2. Refuels the store for outermost calls when fuel metering is on
//! 3. Runs the engine call, which catches hardware faults raised by
//!    compiled code and reports them as traps
//! 4. Converts any abnormal termination into a [`RuntimeError`]
//!
//! A trap unwinds only to the innermost boundary, so a host function that
//! calls back into the guest sees the inner failure as an ordinary `Err`.

use std::time::Instant;

use tracing::{debug, error, warn};
use wasmtime::{Caller, FrameInfo, Trap, WasmBacktrace};
use wasmtime_wasi::I32Exit;

use crate::WasmEngine;
use crate::store::{InstanceId, StoreData};
use wasmbed_common::{FaultRecord, RuntimeError, TrapCode};

/// Run `f` as an outermost guest call on behalf of `instance`.
pub(crate) fn call_protected<R>(
    store: &mut wasmtime::Store<StoreData>,
    engine: &WasmEngine,
    instance: InstanceId,
    f: impl FnOnce(&mut wasmtime::Store<StoreData>) -> wasmtime::Result<R>,
) -> Result<R, RuntimeError> {
    let start = Instant::now();
    let initial_fuel = engine.execution_config().max_fuel;

    if engine.is_fuel_enabled() {
        store
            .set_fuel(initial_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    store.data_mut().push_active(instance);
    let result = f(store);
    store.data_mut().pop_active();

    let fuel_consumed = if engine.is_fuel_enabled() {
        initial_fuel.saturating_sub(store.get_fuel().unwrap_or(0))
    } else {
        0
    };

    let metrics = &mut store.data_mut().metrics;
    metrics.calls += 1;
    metrics.last_fuel_consumed = fuel_consumed;

    match result {
        Ok(value) => {
            debug!(
                %instance,
                duration_us = start.elapsed().as_micros(),
                fuel_consumed,
                "Guest call completed"
            );
            Ok(value)
        }
        Err(err) => {
            store.data_mut().metrics.traps += 1;
            let err = classify(err);
            match &err {
                RuntimeError::FuelExhausted => warn!(
                    %instance,
                    fuel_consumed,
                    "Execution terminated: fuel exhausted"
                ),
                RuntimeError::Exit { code } => debug!(%instance, code, "Guest exited"),
                RuntimeError::LinkFailed { reason } => debug!(%instance, %reason, "Link failed"),
                other => error!(%instance, error = %other, "Execution trapped"),
            }
            Err(err)
        }
    }
}

/// Run `f` as a guest call made from inside a host function.
///
/// Nested calls share the fuel budget of the outermost call.
pub(crate) fn call_nested<R>(
    caller: &mut Caller<'_, StoreData>,
    instance: InstanceId,
    f: impl FnOnce(&mut Caller<'_, StoreData>) -> wasmtime::Result<R>,
) -> Result<R, RuntimeError> {
    caller.data_mut().push_active(instance);
    let result = f(caller);
    caller.data_mut().pop_active();

    result.map_err(|err| {
        let err = classify(err);
        debug!(%instance, error = %err, "Nested guest call failed");
        err
    })
}

/// Convert an engine error raised during guest execution.
///
/// Link failures raised while instantiating pass through unchanged.
pub(crate) fn classify(err: wasmtime::Error) -> RuntimeError {
    if let Some(exit) = err.downcast_ref::<I32Exit>() {
        return RuntimeError::Exit { code: exit.0 };
    }

    if let Some(trap) = err.downcast_ref::<Trap>() {
        if *trap == Trap::OutOfFuel {
            return RuntimeError::FuelExhausted;
        }

        let code = trap_code(trap);
        return RuntimeError::Trap {
            message: trap.to_string(),
            code,
            fault: Some(FaultRecord {
                code,
                fault_address: None,
                instruction_pointer: innermost_offset(&err),
            }),
        };
    }

    match err.downcast::<RuntimeError>() {
        Ok(
            err @ (RuntimeError::Trap { .. }
            | RuntimeError::Exit { .. }
            | RuntimeError::FuelExhausted
            | RuntimeError::LinkFailed { .. }),
        ) => err,
        // Any other host failure aborts the guest call like a user trap
        Ok(other) => RuntimeError::trap(other.to_string()),
        Err(err) => RuntimeError::Trap {
            message: err.root_cause().to_string(),
            code: TrapCode::Other,
            fault: None,
        },
    }
}

fn innermost_offset(err: &wasmtime::Error) -> Option<usize> {
    err.downcast_ref::<WasmBacktrace>()
        .and_then(|bt| bt.frames().first().and_then(FrameInfo::module_offset))
}

fn trap_code(trap: &Trap) -> TrapCode {
    match trap {
        Trap::UnreachableCodeReached => TrapCode::Unreachable,
        Trap::MemoryOutOfBounds => TrapCode::MemoryOutOfBounds,
        Trap::HeapMisaligned => TrapCode::HeapMisaligned,
        Trap::TableOutOfBounds => TrapCode::TableOutOfBounds,
        Trap::IndirectCallToNull => TrapCode::IndirectCallToNull,
        Trap::BadSignature => TrapCode::BadSignature,
        Trap::IntegerOverflow => TrapCode::IntegerOverflow,
        Trap::IntegerDivisionByZero => TrapCode::IntegerDivisionByZero,
        Trap::BadConversionToInteger => TrapCode::BadConversionToInteger,
        Trap::StackOverflow => TrapCode::StackOverflow,
        Trap::Interrupt => TrapCode::Interrupt,
        _ => TrapCode::Other,
    }
}
