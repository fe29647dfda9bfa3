//! Error types for wasmbed.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for every fallible runtime operation
//! - [`WasiError`]: WASI-related errors
//! - [`TrapCode`] and [`FaultRecord`]: what a trap carries about its cause

use std::fmt;
use std::io;

use thiserror::Error;

use crate::types::ValueType;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur during the lifecycle of
/// a WebAssembly module, from compilation through linking to execution.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// WebAssembly compilation failed (malformed or invalid bytecode).
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// An import could not be resolved or did not match its declaration.
    #[error("Link error: {reason}")]
    LinkFailed {
        /// Description of the unresolved or mismatched import.
        reason: String,
    },

    /// The number of arguments or results disagrees with the signature.
    #[error("Arity mismatch: expected {expected} {what}, got {found}")]
    ArityMismatch {
        /// Either `"parameters"` or `"results"`.
        what: &'static str,
        /// Count declared by the signature.
        expected: usize,
        /// Count supplied by the caller.
        found: usize,
    },

    /// A value has a different type than the one declared.
    #[error("Type mismatch for {what}: expected {expected}, got {found}")]
    TypeMismatch {
        /// Which value disagreed (e.g. `argument 1`).
        what: String,
        /// Declared type.
        expected: ValueType,
        /// Supplied type.
        found: ValueType,
    },

    /// A memory or table could not grow.
    #[error("Grow failed: {reason}")]
    GrowFailed {
        /// Description of the limit that was hit.
        reason: String,
    },

    /// Memory or table limits are inconsistent.
    #[error("Invalid limits: {reason}")]
    InvalidLimits {
        /// Description of the violation.
        reason: String,
    },

    /// A named item was not found.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was looked up (export, import, memory, ...).
        kind: &'static str,
        /// The name or index that was looked up.
        name: String,
    },

    /// A named item exists but has another kind than requested.
    #[error("Kind mismatch for {name}: expected {expected}, found {found}")]
    KindMismatch {
        /// The name that was looked up.
        name: String,
        /// Requested kind.
        expected: String,
        /// Stored kind.
        found: String,
    },

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Classified cause of the trap.
        code: TrapCode,
        /// Fault details when the trap was raised by the engine.
        fault: Option<FaultRecord>,
    },

    /// Execution exhausted the configured fuel limit.
    ///
    /// This indicates the WebAssembly code consumed more CPU cycles
    /// than allowed by the fuel metering configuration.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// The guest called `proc_exit`.
    #[error("Guest exited with code {code}")]
    Exit {
        /// Exit status passed by the guest.
        code: i32,
    },

    /// Write to a global that was declared immutable.
    #[error("Cannot set an immutable global")]
    ImmutableGlobalWrite,

    /// The store is already locked by a guest call running on this thread.
    ///
    /// Raised when a host function touches a memory, table, global or
    /// instance handle of its own store instead of going through its
    /// call context.
    #[error("Store is busy: a guest call on this thread holds it; use the host function context")]
    StoreBusy,

    /// A serialized module could not be produced or read back.
    #[error("Serialization failed: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },

    /// WASI operation failed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// WASI-related errors.
///
/// These errors occur when a WASI (WebAssembly System Interface) context
/// cannot be built from the supplied arguments.
#[derive(Error, Debug)]
pub enum WasiError {
    /// Failed to initialize WASI context.
    #[error("WASI initialization failed: {reason}")]
    InitializationFailed {
        /// Description of the initialization failure.
        reason: String,
    },

    /// A preopened or mapped directory is unusable.
    #[error("WASI filesystem error: {operation}")]
    FilesystemError {
        /// The filesystem operation that failed.
        operation: String,
    },

    /// WASI environment configuration error.
    #[error("WASI environment error: {reason}")]
    EnvironmentError {
        /// Description of the environment error.
        reason: String,
    },
}

/// Classified cause of a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCode {
    /// Raised explicitly by a host function.
    User,
    /// An `unreachable` instruction was executed.
    Unreachable,
    /// Out-of-bounds linear memory access.
    MemoryOutOfBounds,
    /// Misaligned atomic access.
    HeapMisaligned,
    /// Out-of-bounds table access.
    TableOutOfBounds,
    /// Indirect call through a null table entry.
    IndirectCallToNull,
    /// Indirect call signature mismatch.
    BadSignature,
    /// Integer overflow.
    IntegerOverflow,
    /// Integer division by zero.
    IntegerDivisionByZero,
    /// Invalid float-to-integer conversion.
    BadConversionToInteger,
    /// Call stack exhausted.
    StackOverflow,
    /// Execution was interrupted.
    Interrupt,
    /// Any other engine trap.
    Other,
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrapCode::User => "user trap",
            TrapCode::Unreachable => "unreachable",
            TrapCode::MemoryOutOfBounds => "memory out of bounds",
            TrapCode::HeapMisaligned => "heap misaligned",
            TrapCode::TableOutOfBounds => "table out of bounds",
            TrapCode::IndirectCallToNull => "indirect call to null",
            TrapCode::BadSignature => "bad signature",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::IntegerDivisionByZero => "integer division by zero",
            TrapCode::BadConversionToInteger => "bad conversion to integer",
            TrapCode::StackOverflow => "stack overflow",
            TrapCode::Interrupt => "interrupt",
            TrapCode::Other => "trap",
        };
        f.write_str(s)
    }
}

/// Abnormal-termination details reported by the protected call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// Classified cause.
    pub code: TrapCode,
    /// Faulting data address, when the engine reports one.
    pub fault_address: Option<usize>,
    /// Offset of the faulting instruction within the module, when known.
    pub instruction_pointer: Option<usize>,
}

impl RuntimeError {
    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `LinkFailed` error.
    pub fn link_failed(reason: impl Into<String>) -> Self {
        Self::LinkFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `ArityMismatch` error.
    pub fn arity_mismatch(what: &'static str, expected: usize, found: usize) -> Self {
        Self::ArityMismatch {
            what,
            expected,
            found,
        }
    }

    /// Create a new `GrowFailed` error.
    pub fn grow_failed(reason: impl Into<String>) -> Self {
        Self::GrowFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidLimits` error.
    pub fn invalid_limits(reason: impl Into<String>) -> Self {
        Self::InvalidLimits {
            reason: reason.into(),
        }
    }

    /// Create a new `NotFound` error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a new `KindMismatch` error.
    pub fn kind_mismatch(
        name: impl Into<String>,
        expected: impl fmt::Display,
        found: impl fmt::Display,
    ) -> Self {
        Self::KindMismatch {
            name: name.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Create a new user `Trap` error.
    ///
    /// Host functions return this to abort the guest call that invoked them.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code: TrapCode::User,
            fault: None,
        }
    }

    /// Create a new `Serialization` error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a lookup failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this error is a trap of any kind.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Trap { .. })
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::FuelExhausted | Self::GrowFailed { .. } | Self::InvalidLimits { .. }
        )
    }

    /// The trap message, if this error is a trap.
    pub fn trap_message(&self) -> Option<&str> {
        match self {
            Self::Trap { message, .. } => Some(message),
            _ => None,
        }
    }
}
