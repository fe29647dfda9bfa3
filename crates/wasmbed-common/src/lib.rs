//! Common types, errors, and configuration for wasmbed.
//!
//! This crate provides shared functionality used across the wasmbed workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine and execution settings
//! - Engine-independent value, signature and limit types

pub mod config;
pub mod config_file;
pub mod error;
pub mod types;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, MappedDirEntry, WasiConfigFile};
pub use error::{FaultRecord, RuntimeError, TrapCode, WasiError};
pub use types::{
    ExternKind, FuncSignature, Limits, Value, ValueType, WASM_MAX_PAGES, WASM_PAGE_SIZE,
};
