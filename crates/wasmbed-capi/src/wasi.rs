//! WASI import objects and version detection.

use std::path::PathBuf;

use tracing::debug;
use wasmbed_common::RuntimeError;
use wasmbed_core::{MappedDir, WasiConfig, WasiVersion, generate_import_object, get_wasi_version};

use crate::error::into_raw_or_null;
use crate::import::wasmbed_import_object_t;
use crate::module::wasmbed_module_t;
use crate::slice_from_raw_parts;
use crate::value::wasmbed_byte_array;

/// A host directory exposed to the guest under `alias`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct wasmbed_wasi_map_dir_entry_t {
    pub alias: wasmbed_byte_array,
    pub host_file_path: wasmbed_byte_array,
}

/// # Safety
///
/// `ptr` must be null or point to `len` valid byte arrays.
unsafe fn strings(ptr: *const wasmbed_byte_array, len: u32) -> Result<Vec<String>, RuntimeError> {
    // SAFETY: forwarded to the caller.
    let arrays = unsafe { slice_from_raw_parts(ptr, len as usize) };
    arrays
        .iter()
        // SAFETY: forwarded to the caller.
        .map(|array| unsafe { array.as_str() }.map(str::to_string))
        .collect()
}

/// # Safety
///
/// Every pointer must be null or point to the advertised number of valid
/// entries.
#[allow(clippy::too_many_arguments)]
unsafe fn generate(
    version: WasiVersion,
    args: *const wasmbed_byte_array,
    args_len: u32,
    envs: *const wasmbed_byte_array,
    envs_len: u32,
    preopened_files: *const wasmbed_byte_array,
    preopened_files_len: u32,
    mapped_dirs: *const wasmbed_wasi_map_dir_entry_t,
    mapped_dirs_len: u32,
) -> *mut wasmbed_import_object_t {
    let result = (|| {
        // SAFETY: forwarded to the caller.
        let mapped = unsafe { slice_from_raw_parts(mapped_dirs, mapped_dirs_len as usize) };
        let mapped_dirs = mapped
            .iter()
            .map(|entry| {
                // SAFETY: forwarded to the caller.
                let (alias, host) = unsafe { (entry.alias.as_str()?, entry.host_file_path.as_str()?) };
                Ok(MappedDir {
                    alias: alias.to_string(),
                    host_path: PathBuf::from(host),
                })
            })
            .collect::<Result<Vec<_>, RuntimeError>>()?;

        // SAFETY: forwarded to the caller.
        let config = unsafe {
            WasiConfig {
                args: strings(args, args_len)?,
                envs: strings(envs, envs_len)?,
                preopened_dirs: strings(preopened_files, preopened_files_len)?
                    .into_iter()
                    .map(PathBuf::from)
                    .collect(),
                mapped_dirs,
                inherit_stdio: true,
            }
        };

        debug!(?version, args = config.args.len(), "Generating WASI import object");
        let imports = generate_import_object(version, config)?;
        Ok(wasmbed_import_object_t::new(imports))
    })();
    into_raw_or_null(result)
}

/// Generate a WASI import object for the newest snapshot.
///
/// `envs` entries have the form `KEY=VALUE`. The guest's standard streams
/// are connected to the host's. Returns null, with the error channel set,
/// if an entry is invalid.
///
/// # Safety
///
/// Every pointer must be null or point to the advertised number of valid
/// entries.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn wasmbed_wasi_generate_import_object(
    args: *const wasmbed_byte_array,
    args_len: u32,
    envs: *const wasmbed_byte_array,
    envs_len: u32,
    preopened_files: *const wasmbed_byte_array,
    preopened_files_len: u32,
    mapped_dirs: *const wasmbed_wasi_map_dir_entry_t,
    mapped_dirs_len: u32,
) -> *mut wasmbed_import_object_t {
    // SAFETY: forwarded to the caller.
    unsafe {
        generate(
            WasiVersion::Latest,
            args,
            args_len,
            envs,
            envs_len,
            preopened_files,
            preopened_files_len,
            mapped_dirs,
            mapped_dirs_len,
        )
    }
}

/// Same as [`wasmbed_wasi_generate_import_object`] for a given snapshot.
///
/// `version` is a [`WasiVersion`] tag; `Unknown` and `Latest` generate the
/// newest snapshot.
///
/// # Safety
///
/// Same as [`wasmbed_wasi_generate_import_object`].
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn wasmbed_wasi_generate_import_object_for_version(
    version: u8,
    args: *const wasmbed_byte_array,
    args_len: u32,
    envs: *const wasmbed_byte_array,
    envs_len: u32,
    preopened_files: *const wasmbed_byte_array,
    preopened_files_len: u32,
    mapped_dirs: *const wasmbed_wasi_map_dir_entry_t,
    mapped_dirs_len: u32,
) -> *mut wasmbed_import_object_t {
    let Some(version) = WasiVersion::from_raw(version) else {
        return into_raw_or_null(Err(RuntimeError::invalid_config(format!(
            "unknown WASI version {version}"
        ))));
    };
    // SAFETY: forwarded to the caller.
    unsafe {
        generate(
            version,
            args,
            args_len,
            envs,
            envs_len,
            preopened_files,
            preopened_files_len,
            mapped_dirs,
            mapped_dirs_len,
        )
    }
}

/// Generate a WASI import object for the newest snapshot with no
/// arguments, environment or directories.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_wasi_generate_default_import_object() -> *mut wasmbed_import_object_t {
    let imports = generate_import_object(WasiVersion::Latest, WasiConfig::new().inherit_stdio(true))
        .map(wasmbed_import_object_t::new)
        .map_err(RuntimeError::from);
    into_raw_or_null(imports)
}

/// The WASI snapshot `module` targets, as a [`WasiVersion`] tag.
///
/// `Unknown` for null, for non-WASI modules and for modules importing from
/// several snapshots.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_wasi_get_version(module: Option<&wasmbed_module_t>) -> u8 {
    module.map_or(WasiVersion::Unknown, |module| get_wasi_version(&module.module)) as u8
}
