//! Core WebAssembly embedding runtime for wasmbed.
//!
//! This crate provides the module and instance lifecycle on top of Wasmtime:
//! - [`WasmEngine`]: Configured Wasmtime engine
//! - [`Store`]: The arena owning every memory, table, global and instance
//! - [`CompiledModule`]: Compiled module with import/export descriptors
//! - [`ImportObject`]: Values offered to modules at link time
//! - [`Instance`]: A live instance, its exports and exported functions
//! - [`HostFunction`] / [`InstanceContext`]: Embedder callbacks
//! - [`wasi`]: WASI import objects and version detection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared, thread-safe)                                  │
//! │  - Compilation settings, fuel metering                  │
//! └─────────────────────────────────────────────────────────┘
//!               │                            │
//!               ▼                            ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │      CompiledModule       │  │          Store           │
//! │  (Immutable, shareable)   │  │  Memories, tables,       │
//! │  - Descriptors            │  │  globals, instance state │
//! │  - Serialization          │  │                          │
//! └───────────────────────────┘  └──────────────────────────┘
//!               │                            │
//!               └──────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           Instance (+ ImportObject)                     │
//! │  - Exports snapshot                                     │
//! │  - Protected calls: traps, faults, fuel, proc_exit      │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod convert;
pub mod engine;
pub mod function;
pub mod global;
pub mod import_object;
pub mod instance;
pub mod memory;
pub mod module;
mod protected;
pub mod store;
pub mod table;
pub mod wasi;

pub use engine::WasmEngine;
pub use function::{HostCallback, HostFunction, InstanceContext};
pub use global::{Global, GlobalDescriptor};
pub use import_object::{Import, ImportObject, ImportValue, ImportedFunction};
pub use instance::{Export, ExportedFunction, Exports, Extern, Instance, instantiate};
pub use memory::Memory;
pub use module::{CompiledModule, ExportDescriptor, ImportDescriptor, SerializedModule};
pub use store::{ExecutionMetrics, InstanceId, Store, StoreData};
pub use table::Table;
pub use wasi::{
    MappedDir, WasiConfig, WasiVersion, generate_default_import_object, generate_import_object,
    get_wasi_version, is_wasi_module,
};
