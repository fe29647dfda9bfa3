//! Configuration structures for wasmbed.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (allocation, compilation)
//! - [`ExecutionConfig`]: Per-call execution limits (fuel)

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the runtime.
/// It can be loaded from files (TOML, JSON) or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the shared engine, including the memory
/// allocation strategy and code generation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable the pooling allocator for instance creation.
    ///
    /// When enabled, memory is pre-allocated for a pool of instances.
    /// Off by default: standalone memories and tables are created one at
    /// a time and do not benefit from a pool.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Optimize generated code for speed.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,

    /// Allow modules to declare more than one memory.
    #[serde(default)]
    pub multi_memory: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            optimize: defaults::optimize(),
            multi_memory: false,
        }
    }
}

/// Per-call execution configuration.
///
/// These settings control resource limits for each entry into guest code.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Enable fuel metering.
    ///
    /// When enabled, every outermost call starts with `max_fuel` units and
    /// traps once they are spent.
    #[serde(default)]
    pub fuel_metering: bool,

    /// Fuel granted to each outermost call.
    ///
    /// A typical simple function consumes ~1,000-10,000 fuel.
    /// Complex operations may consume millions.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fuel_metering: false,
            max_fuel: defaults::max_fuel(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }
}
