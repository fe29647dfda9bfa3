//! Function-reference tables.

use wasmbed_common::RuntimeError;
use wasmbed_core::Table;

use crate::error::{handle_result, value_or};
use crate::value::{wasmbed_limits_t, wasmbed_result_t};
use crate::{default_store, write_out};

/// A table of function references.
pub struct wasmbed_table_t {
    pub(crate) table: Table,
}

/// Create a standalone table with the given element limits.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_table_new(
    table: Option<&mut *mut wasmbed_table_t>,
    limits: wasmbed_limits_t,
) -> wasmbed_result_t {
    let result = default_store()
        .and_then(|store| Table::new(store, limits.into()))
        .and_then(|created| write_out(table, wasmbed_table_t { table: created }));
    handle_result(result, |()| {})
}

/// Grow by `delta` null elements.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_table_grow(table: Option<&wasmbed_table_t>, delta: u32) -> wasmbed_result_t {
    let result = table
        .ok_or_else(|| RuntimeError::invalid_config("null table"))
        .and_then(|table| table.table.grow(delta));
    handle_result(result, |_previous| {})
}

/// Number of elements; 0 for null.
#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_table_length(table: Option<&wasmbed_table_t>) -> u32 {
    table.map_or(0, |table| value_or(table.table.size(), 0))
}

#[unsafe(no_mangle)]
pub extern "C" fn wasmbed_table_destroy(_table: Option<Box<wasmbed_table_t>>) {}
