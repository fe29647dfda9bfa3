//! Import and export descriptors of a compiled module.

use std::os::raw::c_int;

use wasmbed_common::ExternKind;
use wasmbed_core::{ExportDescriptor, ImportDescriptor};

use crate::module::wasmbed_module_t;
use crate::value::{wasmbed_byte_array, wasmbed_import_export_kind};

/// Describes one export of a module.
pub struct wasmbed_export_descriptor_t {
    descriptor: ExportDescriptor,
}

/// Every export descriptor of a module, in declaration order.
pub struct wasmbed_export_descriptors_t {
    descriptors: Vec<wasmbed_export_descriptor_t>,
}

/// Describes one import of a module.
pub struct wasmbed_import_descriptor_t {
    descriptor: ImportDescriptor,
}

/// Every import descriptor of a module, in declaration order.
pub struct wasmbed_import_descriptors_t {
    descriptors: Vec<wasmbed_import_descriptor_t>,
}

/// Collect the export descriptors of `module` into `export_descriptors`.
///
/// Does nothing if either pointer is null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_descriptors(
    module: Option<&wasmbed_module_t>,
    export_descriptors: Option<&mut *mut wasmbed_export_descriptors_t>,
) {
    let (Some(module), Some(out)) = (module, export_descriptors) else {
        return;
    };
    let descriptors = module
        .module
        .export_descriptors()
        .into_iter()
        .map(|descriptor| wasmbed_export_descriptor_t { descriptor })
        .collect();
    *out = Box::into_raw(Box::new(wasmbed_export_descriptors_t { descriptors }));
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_descriptors_destroy(
    _export_descriptors: Option<Box<wasmbed_export_descriptors_t>>,
) {
}

/// Number of export descriptors; 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_descriptors_len(
    export_descriptors: Option<&wasmbed_export_descriptors_t>,
) -> c_int {
    export_descriptors.map_or(0, |d| c_int::try_from(d.descriptors.len()).unwrap_or(c_int::MAX))
}

/// Descriptor at `idx`, or null if out of range.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_descriptors_get(
    export_descriptors: Option<&wasmbed_export_descriptors_t>,
    idx: c_int,
) -> Option<&wasmbed_export_descriptor_t> {
    let idx = usize::try_from(idx).ok()?;
    export_descriptors?.descriptors.get(idx)
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_descriptor_kind(
    export_descriptor: Option<&wasmbed_export_descriptor_t>,
) -> wasmbed_import_export_kind {
    export_descriptor.map_or(0, |d| kind_tag(d.descriptor.kind))
}

/// Export name, valid until the collection is destroyed.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_export_descriptor_name(
    export_descriptor: Option<&wasmbed_export_descriptor_t>,
) -> wasmbed_byte_array {
    export_descriptor.map_or_else(wasmbed_byte_array::empty, |d| {
        wasmbed_byte_array::borrowed(d.descriptor.name.as_bytes())
    })
}

/// Collect the import descriptors of `module` into `import_descriptors`.
///
/// Does nothing if either pointer is null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_descriptors(
    module: Option<&wasmbed_module_t>,
    import_descriptors: Option<&mut *mut wasmbed_import_descriptors_t>,
) {
    let (Some(module), Some(out)) = (module, import_descriptors) else {
        return;
    };
    let descriptors = module
        .module
        .import_descriptors()
        .into_iter()
        .map(|descriptor| wasmbed_import_descriptor_t { descriptor })
        .collect();
    *out = Box::into_raw(Box::new(wasmbed_import_descriptors_t { descriptors }));
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_descriptors_destroy(
    _import_descriptors: Option<Box<wasmbed_import_descriptors_t>>,
) {
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_descriptors_len(
    import_descriptors: Option<&wasmbed_import_descriptors_t>,
) -> u32 {
    import_descriptors.map_or(0, |d| u32::try_from(d.descriptors.len()).unwrap_or(u32::MAX))
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_descriptors_get(
    import_descriptors: Option<&wasmbed_import_descriptors_t>,
    idx: u32,
) -> Option<&wasmbed_import_descriptor_t> {
    import_descriptors?.descriptors.get(idx as usize)
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_descriptor_kind(
    import_descriptor: Option<&wasmbed_import_descriptor_t>,
) -> wasmbed_import_export_kind {
    import_descriptor.map_or(0, |d| kind_tag(d.descriptor.kind))
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_descriptor_name(
    import_descriptor: Option<&wasmbed_import_descriptor_t>,
) -> wasmbed_byte_array {
    import_descriptor.map_or_else(wasmbed_byte_array::empty, |d| {
        wasmbed_byte_array::borrowed(d.descriptor.name.as_bytes())
    })
}

/// Namespace of the import.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_import_descriptor_module_name(
    import_descriptor: Option<&wasmbed_import_descriptor_t>,
) -> wasmbed_byte_array {
    import_descriptor.map_or_else(wasmbed_byte_array::empty, |d| {
        wasmbed_byte_array::borrowed(d.descriptor.module.as_bytes())
    })
}

pub(crate) fn kind_tag(kind: ExternKind) -> wasmbed_import_export_kind {
    kind as wasmbed_import_export_kind
}
