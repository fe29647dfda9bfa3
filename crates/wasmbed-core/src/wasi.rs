//! WASI support.
//!
//! This module provides:
//! - [`WasiVersion`]: The WASI snapshots a module can target
//! - [`WasiConfig`]: Arguments, environment and directories for a guest
//! - [`generate_import_object`]: An [`ImportObject`] holding every WASI call
//!   of a snapshot
//! - [`get_wasi_version`]: Detection of the snapshot a module targets
//!
//! The WASI calls themselves are implemented by `wasmtime-wasi`. Each
//! instantiation builds a fresh WASI context from the import object's
//! [`WasiConfig`], so instances never share arguments, environment or
//! open file descriptors.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::{debug, info};
use wasmtime::{Config, Engine, Extern, Linker};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::convert;
use crate::function::HostFunction;
use crate::import_object::{ImportObject, ImportValue};
use crate::module::CompiledModule;
use crate::store::StoreData;
use wasmbed_common::{FuncSignature, WasiConfigFile, WasiError};

/// Namespace of the first WASI snapshot.
pub const SNAPSHOT0_NAMESPACE: &str = "wasi_unstable";

/// Namespace of the current WASI snapshot.
pub const SNAPSHOT1_NAMESPACE: &str = "wasi_snapshot_preview1";

/// A WASI snapshot.
///
/// The discriminants are part of the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WasiVersion {
    /// Not a WASI module, or the snapshot could not be determined.
    Unknown = 0,
    /// The newest snapshot this runtime supports.
    Latest = 1,
    /// `wasi_unstable`.
    Snapshot0 = 2,
    /// `wasi_snapshot_preview1`.
    Snapshot1 = 3,
}

impl WasiVersion {
    /// Decode a raw version tag.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(WasiVersion::Unknown),
            1 => Some(WasiVersion::Latest),
            2 => Some(WasiVersion::Snapshot0),
            3 => Some(WasiVersion::Snapshot1),
            _ => None,
        }
    }

    /// The concrete snapshot generated for this version.
    ///
    /// `Unknown` and `Latest` both resolve to the newest snapshot.
    pub fn resolve(self) -> Self {
        match self {
            WasiVersion::Snapshot0 => WasiVersion::Snapshot0,
            WasiVersion::Unknown | WasiVersion::Latest | WasiVersion::Snapshot1 => {
                WasiVersion::Snapshot1
            }
        }
    }

    /// Import namespace of the resolved snapshot.
    pub fn namespace(self) -> &'static str {
        match self.resolve() {
            WasiVersion::Snapshot0 => SNAPSHOT0_NAMESPACE,
            _ => SNAPSHOT1_NAMESPACE,
        }
    }

    fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            SNAPSHOT0_NAMESPACE => Some(WasiVersion::Snapshot0),
            SNAPSHOT1_NAMESPACE => Some(WasiVersion::Snapshot1),
            _ => None,
        }
    }
}

/// A host directory exposed to the guest under an alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedDir {
    /// Path the guest sees.
    pub alias: String,
    /// Directory on the host.
    pub host_path: PathBuf,
}

/// Template for the WASI state of each instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WasiConfig {
    /// Program arguments, the program name included.
    pub args: Vec<String>,
    /// Environment in `KEY=VALUE` form.
    pub envs: Vec<String>,
    /// Host directories preopened under their own path.
    pub preopened_dirs: Vec<PathBuf>,
    /// Host directories preopened under an alias.
    pub mapped_dirs: Vec<MappedDir>,
    /// Connect the guest's standard streams to the host's.
    pub inherit_stdio: bool,
}

impl WasiConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append program arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append one environment variable.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push(format!("{key}={value}"));
        self
    }

    /// Preopen a host directory under its own path.
    #[must_use]
    pub fn preopen_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preopened_dirs.push(dir.into());
        self
    }

    /// Preopen a host directory under `alias`.
    #[must_use]
    pub fn map_dir(mut self, alias: impl Into<String>, host_path: impl Into<PathBuf>) -> Self {
        self.mapped_dirs.push(MappedDir {
            alias: alias.into(),
            host_path: host_path.into(),
        });
        self
    }

    /// Connect the guest's standard streams to the host's.
    #[must_use]
    pub fn inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    /// Check every entry without opening anything.
    ///
    /// # Errors
    ///
    /// - [`WasiError::EnvironmentError`] for an env entry without `=`
    /// - [`WasiError::FilesystemError`] for a missing or non-directory path
    pub fn validate(&self) -> Result<(), WasiError> {
        for entry in &self.envs {
            split_env(entry)?;
        }

        let dirs = self
            .preopened_dirs
            .iter()
            .chain(self.mapped_dirs.iter().map(|m| &m.host_path));
        for dir in dirs {
            if !dir.is_dir() {
                return Err(WasiError::FilesystemError {
                    operation: format!("preopen {}: not a directory", dir.display()),
                });
            }
        }
        Ok(())
    }

    /// Build a fresh WASI context from this template.
    ///
    /// # Errors
    ///
    /// Returns a [`WasiError`] if an entry is invalid or a directory
    /// cannot be opened.
    pub(crate) fn build(&self) -> Result<WasiP1Ctx, WasiError> {
        let mut builder = WasiCtxBuilder::new();
        builder.args(self.args.as_slice());

        for entry in &self.envs {
            let (key, value) = split_env(entry)?;
            builder.env(key, value);
        }

        if self.inherit_stdio {
            builder.inherit_stdio();
        }

        for dir in &self.preopened_dirs {
            let guest = dir.to_string_lossy();
            builder
                .preopened_dir(dir, &*guest, DirPerms::all(), FilePerms::all())
                .map_err(|e| WasiError::FilesystemError {
                    operation: format!("preopen {}: {e}", dir.display()),
                })?;
        }

        for mapped in &self.mapped_dirs {
            builder
                .preopened_dir(
                    &mapped.host_path,
                    &mapped.alias,
                    DirPerms::all(),
                    FilePerms::all(),
                )
                .map_err(|e| WasiError::FilesystemError {
                    operation: format!(
                        "map {} to {}: {e}",
                        mapped.host_path.display(),
                        mapped.alias
                    ),
                })?;
        }

        Ok(builder.build_p1())
    }
}

impl From<&WasiConfigFile> for WasiConfig {
    fn from(file: &WasiConfigFile) -> Self {
        Self {
            args: file.args.clone(),
            envs: file.env.clone(),
            preopened_dirs: file.preopened_dirs.iter().map(PathBuf::from).collect(),
            mapped_dirs: file
                .mapped_dirs
                .iter()
                .map(|m| MappedDir {
                    alias: m.alias.clone(),
                    host_path: PathBuf::from(&m.host_path),
                })
                .collect(),
            inherit_stdio: file.inherit_stdio,
        }
    }
}

fn split_env(entry: &str) -> Result<(&str, &str), WasiError> {
    entry
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| WasiError::EnvironmentError {
            reason: format!("expected KEY=VALUE, got {entry:?}"),
        })
}

/// Generate an import object with every WASI call of `version`.
///
/// All entries share one namespace. `Unknown` and `Latest` generate the
/// newest snapshot. Empty collections in `config` are valid.
///
/// # Errors
///
/// Returns a [`WasiError`] if `config` is invalid.
pub fn generate_import_object(
    version: WasiVersion,
    config: WasiConfig,
) -> Result<ImportObject, WasiError> {
    config.validate()?;

    let version = version.resolve();
    let namespace = version.namespace();
    let calls = catalog(version)?;

    let mut imports = ImportObject::new();
    for (name, signature) in calls {
        imports.register(
            namespace,
            name.as_str(),
            ImportValue::Function(HostFunction::wasi(version, signature.clone())),
        );
    }
    imports.set_wasi(version, config);

    info!(namespace, functions = imports.len(), "WASI import object generated");
    Ok(imports)
}

/// Generate an import object for the newest snapshot with empty state.
///
/// # Errors
///
/// Returns a [`WasiError`] only if the WASI layer cannot be initialized.
pub fn generate_default_import_object() -> Result<ImportObject, WasiError> {
    generate_import_object(WasiVersion::Latest, WasiConfig::new())
}

/// Detect the WASI snapshot a module targets.
///
/// Returns the snapshot when the module imports from exactly one WASI
/// namespace, and [`WasiVersion::Unknown`] when it imports from none or
/// from both.
pub fn get_wasi_version(module: &CompiledModule) -> WasiVersion {
    let mut found = None;
    for import in module.imports() {
        if let Some(version) = WasiVersion::from_namespace(&import.module) {
            match found {
                None => found = Some(version),
                Some(previous) if previous != version => return WasiVersion::Unknown,
                Some(_) => {}
            }
        }
    }
    found.unwrap_or(WasiVersion::Unknown)
}

/// Whether the module imports anything from a WASI namespace.
pub fn is_wasi_module(module: &CompiledModule) -> bool {
    module
        .imports()
        .iter()
        .any(|import| WasiVersion::from_namespace(&import.module).is_some())
}

/// Add the WASI calls of `version` to `linker`.
///
/// The calls reach the WASI context of the instance that is executing.
pub(crate) fn add_to_linker(
    linker: &mut Linker<StoreData>,
    version: WasiVersion,
) -> wasmtime::Result<()> {
    match version.resolve() {
        WasiVersion::Snapshot0 => {
            wasmtime_wasi::preview0::add_to_linker_sync(linker, StoreData::wasi_mut)
        }
        _ => wasmtime_wasi::preview1::add_to_linker_sync(linker, StoreData::wasi_mut),
    }
}

type Catalog = Vec<(String, FuncSignature)>;

/// Names and signatures of every call of a snapshot, computed once.
fn catalog(version: WasiVersion) -> Result<&'static Catalog, WasiError> {
    static SNAPSHOT0: OnceLock<Result<Catalog, String>> = OnceLock::new();
    static SNAPSHOT1: OnceLock<Result<Catalog, String>> = OnceLock::new();

    let cell = match version {
        WasiVersion::Snapshot0 => &SNAPSHOT0,
        _ => &SNAPSHOT1,
    };

    cell.get_or_init(|| build_catalog(version).map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|reason| WasiError::InitializationFailed {
            reason: reason.clone(),
        })
}

fn build_catalog(version: WasiVersion) -> wasmtime::Result<Catalog> {
    let engine = Engine::new(&Config::new())?;
    let mut linker = Linker::new(&engine);
    add_to_linker(&mut linker, version)?;

    let mut store = wasmtime::Store::new(&engine, StoreData::new());
    let functions: Vec<_> = linker
        .iter(&mut store)
        .filter_map(|(_, name, item)| match item {
            Extern::Func(func) => Some((name.to_string(), func)),
            _ => None,
        })
        .collect();

    let mut calls = Vec::with_capacity(functions.len());
    for (name, func) in functions {
        calls.push((name, convert::signature(&func.ty(&store))?));
    }

    debug!(namespace = version.namespace(), calls = calls.len(), "WASI catalog built");
    Ok(calls)
}
