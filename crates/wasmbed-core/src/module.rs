//! WebAssembly module compilation, introspection and serialization.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's
//! [`Module`] that handles compilation, validation, import/export
//! descriptors, and serialization to a [`SerializedModule`] blob.
//!
//! # Compilation Strategies
//!
//! - **JIT**: Compile from Wasm bytes at runtime (slower cold start)
//! - **AOT**: Serialize once, deserialize on later runs (fast cold start)

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use wasmtime::Module;

use crate::WasmEngine;
use crate::convert;
use wasmbed_common::{ExternKind, FuncSignature, RuntimeError};

/// Describes one export of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDescriptor {
    /// Export name.
    pub name: String,
    /// Kind of the exported item.
    pub kind: ExternKind,
}

/// Describes one import of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    /// Namespace (module name) of the import.
    pub module: String,
    /// Field name of the import.
    pub name: String,
    /// Kind of the imported item.
    pub kind: ExternKind,
    /// Signature, for function imports with numeric parameter and result types.
    pub signature: Option<FuncSignature>,
}

/// A compiled WebAssembly module.
///
/// This struct wraps a Wasmtime [`Module`] with its import and export
/// descriptors and metadata for caching and debugging.
///
/// # Thread Safety
///
/// `CompiledModule` is immutable, cheap to clone and can be shared across
/// threads and instances.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Engine the module was compiled for.
    engine: WasmEngine,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,

    imports: Arc<[ImportDescriptor]>,
    exports: Arc<[ExportDescriptor]>,
}

impl CompiledModule {
    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::CompilationFailed`] if the bytes are not a
    /// valid module (bad magic, malformed sections, type errors).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &WasmEngine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        // Validate Wasm magic number
        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine.inner(), bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Core module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Core module compiled"
        );

        Ok(Self::wrap(engine, module, content_hash))
    }

    /// Compile a core module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &WasmEngine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine.inner(), wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(Self::wrap(engine, module, content_hash))
    }

    /// Check whether `bytes` form a valid module without compiling it.
    ///
    /// This is a pure predicate: it reports no error details.
    pub fn validate(engine: &WasmEngine, bytes: &[u8]) -> bool {
        Self::validate_wasm_header(bytes).is_ok() && Module::validate(engine.inner(), bytes).is_ok()
    }

    /// Serialize the compiled module for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot serialize the module.
    pub fn serialize(&self) -> Result<SerializedModule, RuntimeError> {
        let artifact = self.inner.serialize().map_err(|e| {
            RuntimeError::serialization(format!("Module serialization failed: {e}"))
        })?;

        Ok(SerializedModule::seal(&artifact))
    }

    /// Rebuild a module from a blob produced by [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Serialization`] if the blob is corrupted or
    /// was produced by an incompatible engine.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, serialized), fields(bytes_len = serialized.as_bytes().len()))]
    pub fn deserialize(
        engine: &WasmEngine,
        serialized: &SerializedModule,
    ) -> Result<Self, RuntimeError> {
        let start = Instant::now();
        let artifact = serialized.payload()?;

        // SAFETY: the envelope hash matched, so the artifact is byte-for-byte
        // what `Module::serialize` produced; Wasmtime checks engine
        // compatibility itself.
        let module = unsafe { Module::deserialize(engine.inner(), artifact) }.map_err(|e| {
            RuntimeError::serialization(format!("Module deserialization failed: {e}"))
        })?;

        let content_hash = compute_hash(artifact);

        debug!(
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Serialized module loaded"
        );

        Ok(Self::wrap(engine, module, content_hash))
    }

    fn wrap(engine: &WasmEngine, module: Module, content_hash: String) -> Self {
        let imports = module
            .imports()
            .map(|import| {
                let ty = import.ty();
                let signature = match &ty {
                    wasmtime::ExternType::Func(func) => convert::signature(func).ok(),
                    _ => None,
                };
                ImportDescriptor {
                    module: import.module().to_string(),
                    name: import.name().to_string(),
                    kind: convert::extern_kind(&ty),
                    signature,
                }
            })
            .collect();

        let exports = module
            .exports()
            .map(|export| ExportDescriptor {
                name: export.name().to_string(),
                kind: convert::extern_kind(&export.ty()),
            })
            .collect();

        Self {
            inner: module,
            engine: engine.clone(),
            content_hash,
            compiled_at: Instant::now(),
            imports,
            exports,
        }
    }

    /// Descriptors of every import, in declaration order.
    pub fn import_descriptors(&self) -> Vec<ImportDescriptor> {
        self.imports.to_vec()
    }

    /// Descriptors of every export, in declaration order.
    pub fn export_descriptors(&self) -> Vec<ExportDescriptor> {
        self.exports.to_vec()
    }

    /// Borrow the import descriptors without copying.
    pub fn imports(&self) -> &[ImportDescriptor] {
        &self.imports
    }

    /// Borrow the export descriptors without copying.
    pub fn exports(&self) -> &[ExportDescriptor] {
        &self.exports
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// The engine this module was compiled for.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the inner Wasmtime module.
    pub fn as_wasmtime(&self) -> &Module {
        &self.inner
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .field("imports", &self.imports.len())
            .field("exports", &self.exports.len())
            .finish_non_exhaustive()
    }
}

const SERIALIZED_MAGIC: &[u8; 4] = b"WBDM";
const SERIALIZED_VERSION: u32 = 2;
const SERIALIZED_HEADER_LEN: usize = 16;

/// An opaque, engine-defined serialization of a [`CompiledModule`].
///
/// Layout: magic `WBDM`, format version (`u32` LE), payload hash
/// (first eight bytes of its SHA-256, as `u64` LE), then the engine
/// artifact. The blob is only meaningful to an
/// engine with the same version and settings as the one that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct SerializedModule {
    bytes: Vec<u8>,
}

impl SerializedModule {
    fn seal(artifact: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(SERIALIZED_HEADER_LEN + artifact.len());
        bytes.extend_from_slice(SERIALIZED_MAGIC);
        bytes.extend_from_slice(&SERIALIZED_VERSION.to_le_bytes());
        bytes.extend_from_slice(&hash_u64(artifact).to_le_bytes());
        bytes.extend_from_slice(artifact);
        Self { bytes }
    }

    /// Wrap bytes read back from storage.
    ///
    /// The envelope is checked here; the artifact itself is checked on
    /// [`CompiledModule::deserialize`].
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Serialization`] if the envelope is invalid.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, RuntimeError> {
        let module = Self {
            bytes: bytes.into(),
        };
        module.payload()?;
        Ok(module)
    }

    /// The serialized bytes, envelope included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the blob, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn payload(&self) -> Result<&[u8], RuntimeError> {
        if self.bytes.len() < SERIALIZED_HEADER_LEN {
            return Err(RuntimeError::serialization("serialized module is truncated"));
        }
        let (header, payload) = self.bytes.split_at(SERIALIZED_HEADER_LEN);

        if &header[0..4] != SERIALIZED_MAGIC {
            return Err(RuntimeError::serialization(
                "not a serialized module (bad magic)",
            ));
        }

        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != SERIALIZED_VERSION {
            return Err(RuntimeError::serialization(format!(
                "unsupported serialization format version {version}"
            )));
        }

        let mut hash = [0u8; 8];
        hash.copy_from_slice(&header[8..16]);
        if u64::from_le_bytes(hash) != hash_u64(payload) {
            return Err(RuntimeError::serialization(
                "serialized module is corrupted (hash mismatch)",
            ));
        }

        Ok(payload)
    }
}

impl std::fmt::Debug for SerializedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializedModule")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// First eight bytes of the SHA-256 digest, little-endian.
fn hash_u64(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    format!("{:016x}", hash_u64(bytes))
}
