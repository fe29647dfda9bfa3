//! WebAssembly instance lifecycle management.
//!
//! This module provides [`Instance`], which handles the complete lifecycle
//! of a module instance:
//!
//! 1. Check every module import against the [`ImportObject`]
//! 2. Link host functions, WASI and store objects into a fresh linker
//! 3. Instantiate the module inside the protected call boundary
//! 4. Expose exports and call exported functions
//!
//! Dropping the last handle to an instance releases its state in the store.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Linker, Trap, Val};
use wasmtime_wasi::I32Exit;

use crate::convert;
use crate::import_object::{Import, ImportObject, ImportValue};
use crate::module::{CompiledModule, ImportDescriptor};
use crate::protected;
use crate::store::{InstanceId, StoreData};
use crate::wasi;
use crate::{Global, Memory, Store, Table};
use wasmbed_common::{ExternKind, FuncSignature, RuntimeError, Value};

struct ExportEntry {
    name: String,
    item: wasmtime::Extern,
    signature: Option<FuncSignature>,
}

struct InstanceInner {
    store: Store,
    id: InstanceId,
    module: CompiledModule,
    imports: ImportObject,
    exports: Vec<ExportEntry>,
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        self.store.release_instance(self.id);
        debug!(instance = %self.id, "Instance released");
    }
}

/// A live instance of a [`CompiledModule`].
///
/// The instance keeps its module and the import object it was linked
/// against alive. Cloning an `Instance` clones the handle.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

impl Instance {
    /// Instantiate `module` in `store`, resolving its imports from `imports`.
    ///
    /// Every import of the module must be present in `imports` under the
    /// same namespace and name, with the same kind, and for functions with
    /// identical parameter and result types. Memories, tables and globals
    /// must live in `store`.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::LinkFailed`] if an import cannot be resolved
    /// - [`RuntimeError::Wasi`] if the WASI state cannot be built
    /// - [`RuntimeError::Trap`] if the start function traps
    #[instrument(skip_all, fields(module = %module.content_hash()))]
    pub fn new(
        store: &Store,
        module: &CompiledModule,
        imports: &ImportObject,
    ) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        if !module.engine().same(store.engine()) {
            return Err(RuntimeError::link_failed(
                "module was compiled for a different engine than the store's",
            ));
        }

        for import in module.imports() {
            check_import(store, import, imports)?;
        }

        let needs_wasi = wasi::is_wasi_module(module);
        let wasi_versions = imports.wasi_versions();
        let wasi_ctx = if needs_wasi && !wasi_versions.is_empty() {
            let config = imports
                .wasi_config()
                .map(|(_, config)| config.clone())
                .unwrap_or_default();
            Some(config.build()?)
        } else {
            None
        };

        let mut guard = store.lock()?;
        let id = guard.data_mut().allocate_instance();
        if let Some(state) = guard.data_mut().instance_mut(id) {
            state.wasi = wasi_ctx;
            state.memories = imported_memories(module, imports);
            state.pending_memory_exports = module
                .exports()
                .iter()
                .filter(|export| export.kind == ExternKind::Memory)
                .map(|export| export.name.clone())
                .collect();
        }

        let result = link_and_instantiate(
            &mut guard,
            store,
            module,
            imports,
            &wasi_versions,
            id,
        );

        let instance = match result {
            Ok(instance) => instance,
            Err(err) => {
                guard.data_mut().release_instance(id);
                return Err(err);
            }
        };

        let memories = collect_memories(&mut guard, module, imports, &instance);
        let exports = collect_exports(&mut guard, &instance);
        if let Some(state) = guard.data_mut().instance_mut(id) {
            state.memories = memories;
            state.pending_memory_exports.clear();
        }
        drop(guard);

        info!(
            instance = %id,
            imports = module.imports().len(),
            exports = exports.len(),
            duration_us = start.elapsed().as_micros(),
            "Module instantiated"
        );

        Ok(Self {
            inner: Arc::new(InstanceInner {
                store: store.clone(),
                id,
                module: module.clone(),
                imports: imports.clone(),
                exports,
            }),
        })
    }

    /// Identifier of this instance within its store.
    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    /// The store this instance lives in.
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// The module this instance was created from.
    pub fn module(&self) -> &CompiledModule {
        &self.inner.module
    }

    /// The import object this instance was linked against.
    pub fn imports(&self) -> &ImportObject {
        &self.inner.imports
    }

    /// Snapshot of the export table.
    ///
    /// Exported functions stay callable for as long as the snapshot lives.
    pub fn exports(&self) -> Exports {
        let exports = self
            .inner
            .exports
            .iter()
            .map(|entry| Export {
                name: entry.name.clone(),
                value: self.wrap_extern(entry),
            })
            .collect();
        Exports { exports }
    }

    fn wrap_extern(&self, entry: &ExportEntry) -> Extern {
        let store = &self.inner.store;
        match &entry.item {
            wasmtime::Extern::Memory(memory) => Extern::Memory(Memory::from_parts(store, *memory)),
            wasmtime::Extern::Table(table) => Extern::Table(Table::from_parts(store, *table)),
            wasmtime::Extern::Global(global) => Extern::Global(Global::from_parts(store, *global)),
            wasmtime::Extern::Func(func) => Extern::Function(ExportedFunction {
                instance: Arc::clone(&self.inner),
                name: entry.name.clone(),
                func: *func,
                signature: entry.signature.clone(),
            }),
            _ => Extern::Unsupported,
        }
    }

    fn function(&self, name: &str) -> Result<(wasmtime::Func, &FuncSignature), RuntimeError> {
        let entry = self
            .inner
            .exports
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| RuntimeError::not_found("function export", name))?;

        let wasmtime::Extern::Func(func) = &entry.item else {
            return Err(RuntimeError::not_found("function export", name));
        };
        let signature = entry.signature.as_ref().ok_or_else(|| {
            RuntimeError::link_failed(format!("export {name} has an unsupported signature"))
        })?;
        Ok((*func, signature))
    }

    /// Call the exported function `name`, writing its results into `results`.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NotFound`] if no function export has that name
    /// - [`RuntimeError::ArityMismatch`] if `args` or `results` has the
    ///   wrong length
    /// - [`RuntimeError::TypeMismatch`] if an argument has the wrong type
    /// - [`RuntimeError::Trap`], [`RuntimeError::FuelExhausted`] or
    ///   [`RuntimeError::Exit`] if the guest call ends abnormally
    #[instrument(skip(self, args, results), fields(instance = %self.inner.id))]
    pub fn call(&self, name: &str, args: &[Value], results: &mut [Value]) -> Result<(), RuntimeError> {
        let (func, signature) = self.function(name)?;
        invoke(&self.inner, func, signature, args, results)
    }

    /// Call the exported function `name` and return its results.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call), minus the results length check.
    pub fn call_values(&self, name: &str, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let (func, signature) = self.function(name)?;
        let mut results: Vec<_> = signature
            .results()
            .iter()
            .map(|ty| Value::default_for(*ty))
            .collect();
        invoke(&self.inner, func, signature, args, &mut results)?;
        Ok(results)
    }

    /// Attach user data, replacing any previous value.
    ///
    /// Host functions read it back through
    /// [`InstanceContext::data`](crate::InstanceContext::data).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store; use [`InstanceContext::data_mut`](crate::InstanceContext::data_mut).
    pub fn set_data<T: Any + Send>(&self, data: T) -> Result<(), RuntimeError> {
        let mut guard = self.inner.store.lock()?;
        if let Some(state) = guard.data_mut().instance_mut(self.inner.id) {
            state.user_data = Some(Box::new(data));
        }
        Ok(())
    }

    /// Run `f` on the user data if it has type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store.
    pub fn with_data<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Result<Option<R>, RuntimeError> {
        let guard = self.inner.store.lock()?;
        Ok(guard
            .data()
            .instance(self.inner.id)
            .and_then(|state| state.user_data.as_ref())
            .and_then(|data| data.downcast_ref::<T>())
            .map(f))
    }

    /// Number of memories, imported ones first.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StoreBusy`] from inside a host function of
    /// the same store.
    pub fn memory_count(&self) -> Result<usize, RuntimeError> {
        let guard = self.inner.store.lock()?;
        Ok(guard
            .data()
            .instance(self.inner.id)
            .map_or(0, |state| state.memories.len()))
    }

    /// The memory at `index`: imported memories first, then exported ones.
    ///
    /// A memory that is imported and re-exported appears once.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if there is no memory at `index`.
    pub fn memory(&self, index: usize) -> Result<Memory, RuntimeError> {
        let guard = self.inner.store.lock()?;
        let memory = guard
            .data()
            .instance(self.inner.id)
            .and_then(|state| state.memories.get(index).copied())
            .ok_or_else(|| RuntimeError::not_found("memory", index.to_string()))?;
        drop(guard);
        Ok(Memory::from_parts(&self.inner.store, memory))
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("module", &self.inner.module)
            .finish_non_exhaustive()
    }
}

/// Compile `bytes` and instantiate the result in `store`.
///
/// # Errors
///
/// Returns [`RuntimeError::CompilationFailed`] or any error of
/// [`Instance::new`].
pub fn instantiate(
    store: &Store,
    bytes: &[u8],
    imports: impl IntoIterator<Item = Import>,
) -> Result<Instance, RuntimeError> {
    let module = CompiledModule::from_bytes(store.engine(), bytes)?;
    let mut import_object = ImportObject::new();
    import_object.extend(imports);
    Instance::new(store, &module, &import_object)
}

fn check_import(
    store: &Store,
    import: &ImportDescriptor,
    imports: &ImportObject,
) -> Result<(), RuntimeError> {
    let key = format!("{}.{}", import.module, import.name);
    let value = imports
        .get(&import.module, &import.name)
        .ok_or_else(|| RuntimeError::link_failed(format!("unresolved import {key}")))?;

    if value.kind() != import.kind {
        return Err(RuntimeError::link_failed(format!(
            "import {key}: expected {}, found {}",
            import.kind,
            value.kind()
        )));
    }

    let owner = match value {
        ImportValue::Function(function) => {
            let Some(expected) = &import.signature else {
                return Err(RuntimeError::link_failed(format!(
                    "import {key} has an unsupported signature"
                )));
            };
            if function.signature() != expected {
                return Err(RuntimeError::link_failed(format!(
                    "import {key}: expected signature {expected}, found {}",
                    function.signature()
                )));
            }
            None
        }
        ImportValue::Memory(memory) => Some(memory.store()),
        ImportValue::Table(table) => Some(table.store()),
        ImportValue::Global(global) => Some(global.store()),
    };

    if owner.is_some_and(|owner| !owner.same(store)) {
        return Err(RuntimeError::link_failed(format!(
            "import {key} belongs to another store"
        )));
    }
    Ok(())
}

fn link_and_instantiate(
    store: &mut wasmtime::Store<StoreData>,
    handle: &Store,
    module: &CompiledModule,
    imports: &ImportObject,
    wasi_versions: &[wasi::WasiVersion],
    id: InstanceId,
) -> Result<wasmtime::Instance, RuntimeError> {
    let mut linker = Linker::new(handle.engine().inner());
    linker.allow_shadowing(true);

    let link_error = |e: wasmtime::Error| RuntimeError::link_failed(e.to_string());

    for version in wasi_versions {
        wasi::add_to_linker(&mut linker, *version).map_err(link_error)?;
    }

    for import in module.imports() {
        let (namespace, name) = (import.module.as_str(), import.name.as_str());
        let Some(value) = imports.get(namespace, name) else {
            continue;
        };
        match value {
            ImportValue::Function(function) => function.define(&mut linker, namespace, name, id),
            ImportValue::Memory(memory) => linker
                .define(&*store, namespace, name, *memory.as_wasmtime())
                .map(|_| ()),
            ImportValue::Table(table) => linker
                .define(&*store, namespace, name, *table.as_wasmtime())
                .map(|_| ()),
            ImportValue::Global(global) => linker
                .define(&*store, namespace, name, *global.as_wasmtime())
                .map(|_| ()),
        }
        .map_err(link_error)?;
        debug!(namespace, name, kind = %value.kind(), "Import linked");
    }

    protected::call_protected(store, handle.engine(), id, |store| {
        linker
            .instantiate(&mut *store, module.as_wasmtime())
            .map_err(|e| {
                if raised_by_guest(&e) {
                    e
                } else {
                    wasmtime::Error::new(RuntimeError::link_failed(e.to_string()))
                }
            })
    })
}

fn raised_by_guest(err: &wasmtime::Error) -> bool {
    err.downcast_ref::<Trap>().is_some()
        || err.downcast_ref::<I32Exit>().is_some()
        || err.downcast_ref::<RuntimeError>().is_some()
}

fn imported_memories(module: &CompiledModule, imports: &ImportObject) -> Vec<wasmtime::Memory> {
    module
        .imports()
        .iter()
        .filter(|import| import.kind == ExternKind::Memory)
        .filter_map(|import| match imports.get(&import.module, &import.name) {
            Some(ImportValue::Memory(memory)) => Some(*memory.as_wasmtime()),
            _ => None,
        })
        .collect()
}

fn collect_memories(
    store: &mut wasmtime::Store<StoreData>,
    module: &CompiledModule,
    imports: &ImportObject,
    instance: &wasmtime::Instance,
) -> Vec<wasmtime::Memory> {
    let exported: Vec<_> = instance
        .exports(&mut *store)
        .filter_map(wasmtime::Export::into_memory)
        .collect();

    let mut memories = imported_memories(module, imports);
    append_memories(&*store, &mut memories, exported);
    memories
}

/// Append `extra` to `memories`, skipping memories already listed.
///
/// Two handles name the same memory when they share a base address.
pub(crate) fn append_memories(
    store: impl wasmtime::AsContext,
    memories: &mut Vec<wasmtime::Memory>,
    extra: impl IntoIterator<Item = wasmtime::Memory>,
) {
    let store = store.as_context();
    for memory in extra {
        let base = memory.data_ptr(&store);
        if !memories.iter().any(|known| known.data_ptr(&store) == base) {
            memories.push(memory);
        }
    }
}

fn collect_exports(
    store: &mut wasmtime::Store<StoreData>,
    instance: &wasmtime::Instance,
) -> Vec<ExportEntry> {
    let items: Vec<_> = instance
        .exports(&mut *store)
        .map(|export| (export.name().to_string(), export.into_extern()))
        .collect();

    items
        .into_iter()
        .map(|(name, item)| {
            let signature = match &item {
                wasmtime::Extern::Func(func) => convert::signature(&func.ty(&*store)).ok(),
                _ => None,
            };
            ExportEntry {
                name,
                item,
                signature,
            }
        })
        .collect()
}

fn invoke(
    instance: &InstanceInner,
    func: wasmtime::Func,
    signature: &FuncSignature,
    args: &[Value],
    results: &mut [Value],
) -> Result<(), RuntimeError> {
    signature.check_call(args, results.len())?;

    let params: Vec<Val> = args.iter().copied().map(convert::to_val).collect();
    let mut raw: Vec<Val> = signature
        .results()
        .iter()
        .map(|ty| convert::to_val(Value::default_for(*ty)))
        .collect();

    let mut guard = instance.store.lock()?;
    protected::call_protected(&mut guard, instance.store.engine(), instance.id, |store| {
        func.call(store, &params, &mut raw)
    })?;
    drop(guard);

    for (slot, val) in results.iter_mut().zip(&raw) {
        *slot = convert::from_val(val)?;
    }
    Ok(())
}

/// Snapshot of an instance's exports.
#[derive(Debug, Clone)]
pub struct Exports {
    exports: Vec<Export>,
}

impl Exports {
    /// Number of exports.
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Whether there are no exports.
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Export at `index`, in declaration order.
    pub fn get(&self, index: usize) -> Option<&Export> {
        self.exports.get(index)
    }

    /// Export with the given name.
    pub fn by_name(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|export| export.name == name)
    }

    /// Iterate over every export.
    pub fn iter(&self) -> impl Iterator<Item = &Export> {
        self.exports.iter()
    }
}

/// One named export.
#[derive(Debug, Clone)]
pub struct Export {
    name: String,
    value: Extern,
}

impl Export {
    /// Export name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the exported item.
    pub fn kind(&self) -> Option<ExternKind> {
        match &self.value {
            Extern::Function(_) => Some(ExternKind::Function),
            Extern::Memory(_) => Some(ExternKind::Memory),
            Extern::Table(_) => Some(ExternKind::Table),
            Extern::Global(_) => Some(ExternKind::Global),
            Extern::Unsupported => None,
        }
    }

    /// The exported item.
    pub fn value(&self) -> &Extern {
        &self.value
    }
}

/// An exported item.
#[derive(Debug, Clone)]
pub enum Extern {
    /// A function.
    Function(ExportedFunction),
    /// A linear memory.
    Memory(Memory),
    /// A table.
    Table(Table),
    /// A global variable.
    Global(Global),
    /// An item kind this runtime does not expose.
    Unsupported,
}

/// A function exported by an instance.
///
/// Keeps its instance alive.
#[derive(Clone)]
pub struct ExportedFunction {
    instance: Arc<InstanceInner>,
    name: String,
    func: wasmtime::Func,
    signature: Option<FuncSignature>,
}

impl ExportedFunction {
    /// Export name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signature, if it only uses numeric types.
    pub fn signature(&self) -> Option<&FuncSignature> {
        self.signature.as_ref()
    }

    /// Call the function; same contract as [`Instance::call`].
    ///
    /// # Errors
    ///
    /// See [`Instance::call`].
    pub fn call(&self, args: &[Value], results: &mut [Value]) -> Result<(), RuntimeError> {
        let signature = self.signature.as_ref().ok_or_else(|| {
            RuntimeError::link_failed(format!("export {} has an unsupported signature", self.name))
        })?;
        invoke(&self.instance, self.func, signature, args, results)
    }
}

impl std::fmt::Debug for ExportedFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedFunction")
            .field("name", &self.name)
            .field("signature", &self.signature.as_ref().map(ToString::to_string))
            .finish_non_exhaustive()
    }
}
