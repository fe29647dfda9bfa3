//! The import object: a registry of values offered to modules at link time.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::debug;

use crate::function::HostFunction;
use crate::wasi::{WasiConfig, WasiVersion};
use crate::{Global, Memory, Table};
use wasmbed_common::{ExternKind, RuntimeError};

/// A value that can satisfy a module import.
#[derive(Debug, Clone)]
pub enum ImportValue {
    /// A host function.
    Function(HostFunction),
    /// A linear memory.
    Memory(Memory),
    /// A table.
    Table(Table),
    /// A global variable.
    Global(Global),
}

impl ImportValue {
    /// Kind of this value.
    pub fn kind(&self) -> ExternKind {
        match self {
            ImportValue::Function(_) => ExternKind::Function,
            ImportValue::Memory(_) => ExternKind::Memory,
            ImportValue::Table(_) => ExternKind::Table,
            ImportValue::Global(_) => ExternKind::Global,
        }
    }
}

impl From<HostFunction> for ImportValue {
    fn from(function: HostFunction) -> Self {
        ImportValue::Function(function)
    }
}

impl From<Memory> for ImportValue {
    fn from(memory: Memory) -> Self {
        ImportValue::Memory(memory)
    }
}

impl From<Table> for ImportValue {
    fn from(table: Table) -> Self {
        ImportValue::Table(table)
    }
}

impl From<Global> for ImportValue {
    fn from(global: Global) -> Self {
        ImportValue::Global(global)
    }
}

/// One `(namespace, name, value)` entry for [`ImportObject::extend`].
#[derive(Debug, Clone)]
pub struct Import {
    /// Namespace (module name).
    pub module: String,
    /// Field name.
    pub name: String,
    /// The value.
    pub value: ImportValue,
}

impl Import {
    /// Create an entry.
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<ImportValue>,
    ) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A function entry yielded by [`ImportObject::functions`].
#[derive(Debug, Clone, Copy)]
pub struct ImportedFunction<'a> {
    /// Namespace (module name).
    pub module: &'a str,
    /// Field name.
    pub name: &'a str,
    /// The function.
    pub function: &'a HostFunction,
}

#[derive(Debug, Clone)]
struct WasiTemplate {
    version: WasiVersion,
    config: WasiConfig,
}

/// Registry of import values keyed by `(namespace, name)`.
///
/// Inserting a key that is already present replaces the previous value:
/// the last write wins. Entries iterate in key order.
///
/// An import object generated by the WASI layer also carries a
/// [`WasiConfig`] from which each instantiation builds its own WASI state.
#[derive(Debug, Clone, Default)]
pub struct ImportObject {
    entries: BTreeMap<(String, String), ImportValue>,
    wasi: Option<WasiTemplate>,
}

impl ImportObject {
    /// Create an empty import object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one value, returning the value it replaced, if any.
    pub fn register(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<ImportValue>,
    ) -> Option<ImportValue> {
        let key = (module.into(), name.into());
        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                debug!(module = %slot.key().0, name = %slot.key().1, "Import replaced");
                Some(slot.insert(value.into()))
            }
            Entry::Vacant(slot) => {
                slot.insert(value.into());
                None
            }
        }
    }

    /// Insert every entry of `imports`; later entries replace earlier ones
    /// with the same key.
    pub fn extend(&mut self, imports: impl IntoIterator<Item = Import>) {
        for import in imports {
            self.register(import.module, import.name, import.value);
        }
    }

    /// Merge another import object into this one with the same policy.
    ///
    /// The other object's WASI configuration, if any, replaces this one's.
    pub fn extend_from(&mut self, other: &ImportObject) {
        for ((module, name), value) in &other.entries {
            self.register(module.clone(), name.clone(), value.clone());
        }
        if other.wasi.is_some() {
            self.wasi.clone_from(&other.wasi);
        }
    }

    /// Look up an entry of the given kind.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NotFound`] if no entry has this key
    /// - [`RuntimeError::KindMismatch`] if the entry has another kind
    pub fn get_import(
        &self,
        module: &str,
        name: &str,
        kind: ExternKind,
    ) -> Result<&ImportValue, RuntimeError> {
        let value = self
            .get(module, name)
            .ok_or_else(|| RuntimeError::not_found("import", format!("{module}.{name}")))?;

        if value.kind() != kind {
            return Err(RuntimeError::kind_mismatch(
                format!("{module}.{name}"),
                kind,
                value.kind(),
            ));
        }
        Ok(value)
    }

    /// Look up an entry of any kind.
    pub fn get(&self, module: &str, name: &str) -> Option<&ImportValue> {
        self.entries.get(&(module.to_string(), name.to_string()))
    }

    /// Whether an entry with this key exists.
    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.get(module, name).is_some()
    }

    /// Iterate over function entries only, in key order.
    pub fn functions(&self) -> impl Iterator<Item = ImportedFunction<'_>> + '_ {
        self.entries
            .iter()
            .filter_map(|((module, name), value)| match value {
                ImportValue::Function(function) => Some(ImportedFunction {
                    module,
                    name,
                    function,
                }),
                _ => None,
            })
    }

    /// Iterate over every entry, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &ImportValue)> + '_ {
        self.entries
            .iter()
            .map(|((module, name), value)| (module.as_str(), name.as_str(), value))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the import object has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The WASI snapshot and configuration carried by this object.
    pub fn wasi_config(&self) -> Option<(WasiVersion, &WasiConfig)> {
        self.wasi
            .as_ref()
            .map(|template| (template.version, &template.config))
    }

    pub(crate) fn set_wasi(&mut self, version: WasiVersion, config: WasiConfig) {
        self.wasi = Some(WasiTemplate { version, config });
    }

    /// WASI snapshots referenced by function entries.
    pub(crate) fn wasi_versions(&self) -> Vec<WasiVersion> {
        let mut versions: Vec<_> = self
            .functions()
            .filter_map(|f| f.function.wasi_version())
            .collect();
        versions.sort_by_key(|v| *v as u8);
        versions.dedup();
        versions
    }
}
