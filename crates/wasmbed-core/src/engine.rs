//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared by every store, module and instance
//! - Configured once from a [`RuntimeConfig`]
//! - Set up with optional fuel metering for per-call CPU limits

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, InstanceAllocationStrategy, OptLevel, PoolingAllocationConfig};

use wasmbed_common::{EngineConfig, ExecutionConfig, RuntimeConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] together with the configuration
/// it was built from. Modules compiled by one engine can only be
/// instantiated in stores of the same engine.
///
/// # Example
///
/// ```ignore
/// use wasmbed_common::RuntimeConfig;
/// use wasmbed_core::WasmEngine;
///
/// let engine = WasmEngine::new(&RuntimeConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: RuntimeConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        // Fuel metering must be decided at engine creation time
        wasmtime_config.consume_fuel(config.execution.fuel_metering);

        wasmtime_config.wasm_multi_memory(config.engine.multi_memory);

        wasmtime_config.cranelift_opt_level(if config.engine.optimize {
            OptLevel::Speed
        } else {
            OptLevel::None
        });

        if config.engine.pooling_allocator {
            let pooling_config = Self::create_pooling_config(&config.engine);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.engine.max_instances,
                instance_memory_mb = config.engine.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            fuel_metering = config.execution.fuel_metering,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Create an engine with the default configuration.
    pub fn with_defaults() -> Result<Self, RuntimeError> {
        Self::new(&RuntimeConfig::default())
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        // Total number of core module instances
        pooling.total_core_instances(config.max_instances);

        // Total number of memories across all instances
        pooling.total_memories(config.max_instances);

        // Total number of tables across all instances
        pooling.total_tables(config.max_instances);

        // Maximum size of a single memory in bytes
        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config.engine
    }

    /// Get the per-call execution configuration.
    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.config.execution
    }

    /// Check if fuel metering is enabled.
    pub fn is_fuel_enabled(&self) -> bool {
        self.config.execution.fuel_metering
    }

    /// Check whether two handles refer to the same engine.
    pub fn same(&self, other: &WasmEngine) -> bool {
        Engine::same(&self.engine, &other.engine)
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.engine.pooling_allocator)
            .field("fuel_metering", &self.config.execution.fuel_metering)
            .finish_non_exhaustive()
    }
}
