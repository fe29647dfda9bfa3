//! Integration tests driving the C ABI from Rust.
//!
//! Each test runs on its own thread, so the error channel seen by one test
//! is never touched by another.

#![allow(unsafe_code)]

use std::ffi::{CStr, c_char, c_void};
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use wasmbed::*;

const SUM_WAT: &str = r#"
    (module
        (func (export "sum") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.add)
        (memory (export "memory") 1)
        (global (export "answer") i32 (i32.const 42)))
"#;

fn last_error() -> Option<String> {
    let len = wasmbed_last_error_length();
    if len == 0 {
        return None;
    }
    let mut buf = vec![0u8; usize::try_from(len).unwrap()];
    let written = unsafe { wasmbed_last_error_message(buf.as_mut_ptr().cast::<c_char>(), len) };
    assert_eq!(written, len);
    buf.pop();
    Some(String::from_utf8(buf).unwrap())
}

fn bytes(s: &str) -> wasmbed_byte_array {
    wasmbed_byte_array {
        bytes: s.as_ptr(),
        bytes_len: u32::try_from(s.len()).unwrap(),
    }
}

fn read(array: wasmbed_byte_array) -> String {
    let slice = unsafe { std::slice::from_raw_parts(array.bytes, array.bytes_len as usize) };
    String::from_utf8(slice.to_vec()).unwrap()
}

fn i32_value(v: i32) -> wasmbed_value_t {
    wasmbed_value_t {
        tag: WASM_I32,
        value: wasmbed_value { I32: v },
    }
}

fn boxed<T>(ptr: *mut T) -> Option<Box<T>> {
    (!ptr.is_null()).then(|| unsafe { Box::from_raw(ptr) })
}

fn compile(wat: &str) -> *mut wasmbed_module_t {
    let wasm = wat::parse_str(wat).unwrap();
    let mut module = ptr::null_mut();
    let result = unsafe {
        wasmbed_compile(Some(&mut module), wasm.as_ptr(), u32::try_from(wasm.len()).unwrap())
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK, "{:?}", last_error());
    module
}

fn instantiate(module: *mut wasmbed_module_t, imports: &[wasmbed_import_t]) -> *mut wasmbed_instance_t {
    let mut instance = ptr::null_mut();
    let result = unsafe {
        wasmbed_module_instantiate(
            module.as_ref(),
            Some(&mut instance),
            imports.as_ptr(),
            u32::try_from(imports.len()).unwrap(),
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK, "{:?}", last_error());
    instance
}

fn call_i32(instance: *mut wasmbed_instance_t, name: &CStr, args: &[i32]) -> Result<i32, String> {
    let params: Vec<_> = args.iter().copied().map(i32_value).collect();
    let mut results = [i32_value(0)];
    let result = unsafe {
        wasmbed_instance_call(
            instance.as_ref(),
            name.as_ptr(),
            params.as_ptr(),
            u32::try_from(params.len()).unwrap(),
            results.as_mut_ptr(),
            1,
        )
    };
    match result {
        wasmbed_result_t::WASMBED_OK => Ok(unsafe { results[0].value.I32 }),
        wasmbed_result_t::WASMBED_ERROR => Err(last_error().unwrap_or_default()),
    }
}

fn host_import(
    module: &'static str,
    name: &'static str,
    func: *mut wasmbed_import_func_t,
) -> wasmbed_import_t {
    wasmbed_import_t {
        module_name: bytes(module),
        import_name: bytes(name),
        tag: WASM_FUNCTION,
        value: wasmbed_import_export_value { func },
    }
}

fn new_import_func(
    callback: wasmbed_host_callback_t,
    params: &[wasmbed_value_tag],
    returns: &[wasmbed_value_tag],
) -> *mut wasmbed_import_func_t {
    let func = unsafe {
        wasmbed_import_func_new(
            Some(callback),
            params.as_ptr(),
            u32::try_from(params.len()).unwrap(),
            returns.as_ptr(),
            u32::try_from(returns.len()).unwrap(),
        )
    };
    assert!(!func.is_null(), "{:?}", last_error());
    func
}

unsafe extern "C" fn boom(
    ctx: *const wasmbed_instance_context_t,
    _params: *const wasmbed_value_t,
    _params_len: u32,
    _results: *mut wasmbed_value_t,
    _results_len: u32,
) {
    unsafe {
        wasmbed_trap(ctx.as_ref(), c"boom".as_ptr());
    }
}

unsafe extern "C" fn noop(
    _ctx: *const wasmbed_instance_context_t,
    _params: *const wasmbed_value_t,
    _params_len: u32,
    _results: *mut wasmbed_value_t,
    _results_len: u32,
) {
}

/// Copies `len` bytes at `offset` into the `Vec<u8>` attached as user data,
/// writes `!` right after them and returns `len`.
unsafe extern "C" fn collect_bytes(
    ctx: *const wasmbed_instance_context_t,
    params: *const wasmbed_value_t,
    params_len: u32,
    results: *mut wasmbed_value_t,
    results_len: u32,
) {
    unsafe {
        assert_eq!((params_len, results_len), (2, 1));
        let ctx = ctx.as_ref();
        let params = std::slice::from_raw_parts(params, 2);
        let offset = usize::try_from(params[0].value.I32).unwrap();
        let len = usize::try_from(params[1].value.I32).unwrap();

        let memory = wasmbed_instance_context_memory(ctx, 0);
        let data = wasmbed_memory_data(memory);
        assert!(!data.is_null());
        assert!(offset + len < wasmbed_memory_data_length(memory) as usize);

        let sink = wasmbed_instance_context_data_get(ctx).cast::<Vec<u8>>();
        (*sink).extend_from_slice(std::slice::from_raw_parts(data.add(offset), len));
        *data.add(offset + len) = b'!';

        *results = i32_value(params[1].value.I32);
    }
}

static START_BYTE: AtomicI32 = AtomicI32::new(-1);

/// Records the first byte of context memory 0 in `START_BYTE`.
unsafe extern "C" fn peek_first_byte(
    ctx: *const wasmbed_instance_context_t,
    _params: *const wasmbed_value_t,
    _params_len: u32,
    _results: *mut wasmbed_value_t,
    _results_len: u32,
) {
    unsafe {
        let memory = wasmbed_instance_context_memory(ctx.as_ref(), 0);
        let data = wasmbed_memory_data(memory);
        if data.is_null() {
            wasmbed_trap(ctx.as_ref(), c"no memory during start".as_ptr());
            return;
        }
        START_BYTE.store(i32::from(*data), Ordering::SeqCst);
    }
}

/// Returns the page count of the standalone memory attached as user data.
unsafe extern "C" fn outside_memory_pages(
    ctx: *const wasmbed_instance_context_t,
    _params: *const wasmbed_value_t,
    _params_len: u32,
    results: *mut wasmbed_value_t,
    _results_len: u32,
) {
    unsafe {
        let memory = wasmbed_instance_context_data_get(ctx.as_ref()).cast::<wasmbed_memory_t>();
        let pages = wasmbed_memory_length(memory.as_ref());
        *results = i32_value(i32::try_from(pages).unwrap_or(i32::MAX));
    }
}

#[test]
fn test_validate_and_compile_valid_module() {
    let wasm = wat::parse_str(SUM_WAT).unwrap();
    let len = u32::try_from(wasm.len()).unwrap();

    assert!(unsafe { wasmbed_validate(wasm.as_ptr(), len) });

    let module = compile(SUM_WAT);
    assert!(!module.is_null());
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_malformed_bytes_fail_with_message() {
    let garbage = b"\0asm\x01\0\0\0\xff\xff";

    assert!(!unsafe { wasmbed_validate(garbage.as_ptr(), 10) });
    assert!(!unsafe { wasmbed_validate(b"nope".as_ptr(), 4) });
    assert!(!unsafe { wasmbed_validate(ptr::null(), 0) });
    assert_eq!(last_error(), None, "validate must not touch the error channel");

    let mut module = ptr::null_mut();
    let result = unsafe { wasmbed_compile(Some(&mut module), garbage.as_ptr(), 10) };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(module.is_null());

    let message = last_error().expect("compile failure leaves a message");
    assert!(!message.is_empty());
    assert!(message.contains("Compilation failed"), "{message}");
    assert_eq!(last_error(), None, "reading clears the channel");
}

#[test]
fn test_serialize_round_trip() {
    let module = compile(SUM_WAT);

    let mut serialized = ptr::null_mut();
    let result = wasmbed_module_serialize(Some(&mut serialized), unsafe { module.as_ref() });
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);

    let blob = wasmbed_serialized_module_bytes(unsafe { serialized.as_ref() });
    let copy = unsafe { std::slice::from_raw_parts(blob.bytes, blob.bytes_len as usize) }.to_vec();
    wasmbed_serialized_module_destroy(boxed(serialized));

    let mut restored_blob = ptr::null_mut();
    let result = unsafe {
        wasmbed_serialized_module_from_bytes(
            Some(&mut restored_blob),
            copy.as_ptr(),
            u32::try_from(copy.len()).unwrap(),
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);

    let mut restored = ptr::null_mut();
    let result =
        wasmbed_module_deserialize(Some(&mut restored), unsafe { restored_blob.as_ref() });
    assert_eq!(result, wasmbed_result_t::WASMBED_OK, "{:?}", last_error());

    let original = instantiate(module, &[]);
    let rebuilt = instantiate(restored, &[]);
    for (a, b) in [(3, 4), (-1, 1), (i32::MAX, 1)] {
        assert_eq!(
            call_i32(original, c"sum", &[a, b]),
            call_i32(rebuilt, c"sum", &[a, b])
        );
    }

    wasmbed_instance_destroy(boxed(original));
    wasmbed_instance_destroy(boxed(rebuilt));
    wasmbed_serialized_module_destroy(boxed(restored_blob));
    wasmbed_module_destroy(boxed(restored));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_corrupted_serialized_module_is_rejected() {
    let module = compile(SUM_WAT);
    let mut serialized = ptr::null_mut();
    wasmbed_module_serialize(Some(&mut serialized), unsafe { module.as_ref() });

    let blob = wasmbed_serialized_module_bytes(unsafe { serialized.as_ref() });
    let mut copy = unsafe { std::slice::from_raw_parts(blob.bytes, blob.bytes_len as usize) }.to_vec();
    let last = copy.len() - 1;
    copy[last] ^= 0xff;

    let mut restored = ptr::null_mut();
    let result = unsafe {
        wasmbed_serialized_module_from_bytes(
            Some(&mut restored),
            copy.as_ptr(),
            u32::try_from(copy.len()).unwrap(),
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("Serialization failed"));

    wasmbed_serialized_module_destroy(boxed(serialized));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_memory_grow_respects_maximum() {
    let limits = wasmbed_limits_t {
        min: 1,
        max: wasmbed_limit_option_t {
            has_some: true,
            some: 2,
        },
    };
    let mut memory = ptr::null_mut();
    assert_eq!(
        wasmbed_memory_new(Some(&mut memory), limits),
        wasmbed_result_t::WASMBED_OK
    );
    let handle = unsafe { memory.as_ref() };

    assert_eq!(wasmbed_memory_length(handle), 1);
    assert_eq!(wasmbed_memory_grow(handle, 1), wasmbed_result_t::WASMBED_OK);
    assert_eq!(wasmbed_memory_length(handle), 2);
    assert_eq!(wasmbed_memory_data_length(handle), 2 * 65536);

    assert_eq!(wasmbed_memory_grow(handle, 1), wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("Grow failed"));
    assert_eq!(wasmbed_memory_length(handle), 2);

    wasmbed_memory_destroy(boxed(memory));
}

#[test]
fn test_invalid_limits_are_rejected() {
    let limits = wasmbed_limits_t {
        min: 3,
        max: wasmbed_limit_option_t {
            has_some: true,
            some: 2,
        },
    };
    let mut memory = ptr::null_mut();
    assert_eq!(
        wasmbed_memory_new(Some(&mut memory), limits),
        wasmbed_result_t::WASMBED_ERROR
    );
    assert!(memory.is_null());
    assert!(last_error().unwrap().contains("Invalid limits"));
}

#[test]
fn test_table_grow() {
    let limits = wasmbed_limits_t {
        min: 2,
        max: wasmbed_limit_option_t {
            has_some: true,
            some: 3,
        },
    };
    let mut table = ptr::null_mut();
    assert_eq!(
        wasmbed_table_new(Some(&mut table), limits),
        wasmbed_result_t::WASMBED_OK
    );
    let handle = unsafe { table.as_ref() };

    assert_eq!(wasmbed_table_length(handle), 2);
    assert_eq!(wasmbed_table_grow(handle, 1), wasmbed_result_t::WASMBED_OK);
    assert_eq!(wasmbed_table_length(handle), 3);
    assert_eq!(wasmbed_table_grow(handle, 1), wasmbed_result_t::WASMBED_ERROR);
    assert_eq!(wasmbed_table_length(handle), 3);

    wasmbed_table_destroy(boxed(table));
}

#[test]
fn test_import_object_get_import() {
    let func = new_import_func(noop as wasmbed_host_callback_t, &[], &[]);
    let imports = wasmbed_import_object_new();
    let entries = [host_import("env", "f", func)];

    let result = unsafe {
        wasmbed_import_object_extend(imports.as_mut(), entries.as_ptr(), 1)
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);
    wasmbed_import_func_destroy(boxed(func));

    let mut found = host_import("", "", ptr::null_mut());
    let result = unsafe {
        wasmbed_import_object_get_import(
            imports.as_ref(),
            bytes("env"),
            bytes("f"),
            WASM_FUNCTION,
            Some(&mut found),
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);
    assert_eq!(read(found.module_name), "env");
    assert_eq!(read(found.import_name), "f");
    assert_eq!(found.tag, WASM_FUNCTION);
    assert!(!unsafe { found.value.func }.is_null());
    unsafe { wasmbed_import_object_imports_destroy(&mut found, 1) };

    let mut other = host_import("", "", ptr::null_mut());
    let result = unsafe {
        wasmbed_import_object_get_import(
            imports.as_ref(),
            bytes("env"),
            bytes("f"),
            WASM_GLOBAL,
            Some(&mut other),
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("Kind mismatch"));

    let result = unsafe {
        wasmbed_import_object_get_import(
            imports.as_ref(),
            bytes("env"),
            bytes("g"),
            WASM_FUNCTION,
            Some(&mut other),
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("not found"));

    wasmbed_import_object_destroy(boxed(imports));
}

#[test]
fn test_import_func_signature_queries() {
    let func = new_import_func(
        noop as wasmbed_host_callback_t,
        &[WASM_I32, WASM_F64],
        &[WASM_I64],
    );
    let handle = unsafe { func.as_ref() };

    let mut arity = 0;
    assert_eq!(
        wasmbed_import_func_params_arity(handle, Some(&mut arity)),
        wasmbed_result_t::WASMBED_OK
    );
    assert_eq!(arity, 2);
    assert_eq!(
        wasmbed_import_func_returns_arity(handle, Some(&mut arity)),
        wasmbed_result_t::WASMBED_OK
    );
    assert_eq!(arity, 1);

    let mut params = [u32::MAX; 2];
    let result = unsafe { wasmbed_import_func_params(handle, params.as_mut_ptr(), 2) };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);
    assert_eq!(params, [WASM_I32, WASM_F64]);

    let result = unsafe { wasmbed_import_func_params(handle, params.as_mut_ptr(), 1) };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("Arity mismatch"));

    let mut returns = [u32::MAX; 1];
    let result = unsafe { wasmbed_import_func_returns(handle, returns.as_mut_ptr(), 1) };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);
    assert_eq!(returns, [WASM_I64]);

    wasmbed_import_func_destroy(boxed(func));

    let bad = [7u32];
    let func = unsafe {
        wasmbed_import_func_new(Some(noop as wasmbed_host_callback_t), bad.as_ptr(), 1, ptr::null(), 0)
    };
    assert!(func.is_null());
    assert!(last_error().unwrap().contains("unknown value tag 7"));
}

#[test]
fn test_call_sum_and_arity() {
    let module = compile(SUM_WAT);
    let instance = instantiate(module, &[]);

    assert_eq!(call_i32(instance, c"sum", &[3, 4]), Ok(7));

    let params = [i32_value(3), i32_value(4)];
    let result = unsafe {
        wasmbed_instance_call(
            instance.as_ref(),
            c"sum".as_ptr(),
            params.as_ptr(),
            2,
            ptr::null_mut(),
            0,
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("Arity mismatch"));

    let err = call_i32(instance, c"missing", &[]).unwrap_err();
    assert!(err.contains("not found"), "{err}");

    wasmbed_instance_destroy(boxed(instance));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_global_mutability() {
    let immutable = wasmbed_global_new(i32_value(1), false);
    assert_eq!(
        wasmbed_global_set(unsafe { immutable.as_ref() }, i32_value(2)),
        wasmbed_result_t::WASMBED_ERROR
    );
    assert!(last_error().unwrap().contains("immutable"));
    assert_eq!(unsafe { wasmbed_global_get(immutable.as_ref()).value.I32 }, 1);

    let descriptor = wasmbed_global_get_descriptor(unsafe { immutable.as_ref() });
    assert!(!descriptor.mutable_);
    assert_eq!(descriptor.kind, WASM_I32);

    let mutable = wasmbed_global_new(i32_value(1), true);
    let handle = unsafe { mutable.as_ref() };
    assert_eq!(wasmbed_global_set(handle, i32_value(5)), wasmbed_result_t::WASMBED_OK);
    assert_eq!(wasmbed_global_set(handle, i32_value(9)), wasmbed_result_t::WASMBED_OK);
    assert_eq!(unsafe { wasmbed_global_get(handle).value.I32 }, 9);
    assert!(wasmbed_global_get_descriptor(handle).mutable_);

    let wrong_type = wasmbed_value_t {
        tag: WASM_F64,
        value: wasmbed_value { F64: 1.0 },
    };
    assert_eq!(wasmbed_global_set(handle, wrong_type), wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("Type mismatch"));

    wasmbed_global_destroy(boxed(immutable));
    wasmbed_global_destroy(boxed(mutable));
}

#[test]
fn test_host_trap_reaches_error_channel() {
    let module = compile(
        r#"(module
            (import "env" "boom" (func $boom))
            (func (export "run") (result i32)
                call $boom
                i32.const 1))"#,
    );
    let func = new_import_func(boom as wasmbed_host_callback_t, &[], &[]);
    let instance = instantiate(module, &[host_import("env", "boom", func)]);
    wasmbed_import_func_destroy(boxed(func));

    let err = call_i32(instance, c"run", &[]).unwrap_err();
    assert!(err.contains("boom"), "{err}");

    // The instance stays usable after a trap
    let err = call_i32(instance, c"run", &[]).unwrap_err();
    assert!(err.contains("boom"), "{err}");

    wasmbed_instance_destroy(boxed(instance));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_host_function_uses_context_memory_and_data() {
    let module = compile(
        r#"(module
            (import "env" "collect" (func $collect (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 16) "hello")
            (func (export "run") (result i32)
                (call $collect (i32.const 16) (i32.const 5))))"#,
    );
    let func = new_import_func(
        collect_bytes as wasmbed_host_callback_t,
        &[WASM_I32, WASM_I32],
        &[WASM_I32],
    );
    let instance = instantiate(module, &[host_import("env", "collect", func)]);

    let mut sink: Vec<u8> = Vec::new();
    wasmbed_instance_context_data_set(
        unsafe { instance.as_ref() },
        (&raw mut sink).cast::<c_void>(),
    );

    assert_eq!(call_i32(instance, c"run", &[]), Ok(5));
    assert_eq!(sink, b"hello");

    let ctx = wasmbed_instance_context_get(unsafe { instance.as_ref() });
    assert_eq!(
        wasmbed_instance_context_data_get(ctx),
        (&raw mut sink).cast::<c_void>()
    );

    let memory = wasmbed_instance_context_memory(ctx, 0);
    assert_eq!(wasmbed_memory_length(memory), 1);
    let written = unsafe { *wasmbed_memory_data(memory).add(21) };
    assert_eq!(written, b'!');

    assert!(wasmbed_instance_context_memory(ctx, 3).is_none());
    assert!(last_error().unwrap().contains("memory not found"));

    wasmbed_import_func_destroy(boxed(func));
    wasmbed_instance_destroy(boxed(instance));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_instantiate_with_imported_memory_and_global() {
    let module = compile(
        r#"(module
            (import "env" "memory" (memory 1))
            (import "env" "base" (global i32))
            (func (export "load") (result i32)
                (i32.load (global.get 0))))"#,
    );

    let limits = wasmbed_limits_t {
        min: 1,
        max: wasmbed_limit_option_t {
            has_some: false,
            some: 0,
        },
    };
    let mut memory = ptr::null_mut();
    wasmbed_memory_new(Some(&mut memory), limits);
    unsafe {
        let data = wasmbed_memory_data(memory.as_ref());
        std::ptr::copy_nonoverlapping(42i32.to_le_bytes().as_ptr(), data.add(8), 4);
    }
    let global = wasmbed_global_new(i32_value(8), false);

    let imports = [
        wasmbed_import_t {
            module_name: bytes("env"),
            import_name: bytes("memory"),
            tag: WASM_MEMORY,
            value: wasmbed_import_export_value { memory },
        },
        wasmbed_import_t {
            module_name: bytes("env"),
            import_name: bytes("base"),
            tag: WASM_GLOBAL,
            value: wasmbed_import_export_value { global },
        },
    ];
    let instance = instantiate(module, &imports);
    assert_eq!(call_i32(instance, c"load", &[]), Ok(42));

    // Imported memories come first in the context
    let ctx = wasmbed_instance_context_get(unsafe { instance.as_ref() });
    let first = wasmbed_instance_context_memory(ctx, 0);
    assert_eq!(
        wasmbed_memory_data(first),
        wasmbed_memory_data(unsafe { memory.as_ref() })
    );

    wasmbed_instance_destroy(boxed(instance));
    wasmbed_memory_destroy(boxed(memory));
    wasmbed_global_destroy(boxed(global));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_start_function_reads_context_memory() {
    let module = compile(
        r#"(module
            (import "env" "peek" (func $peek))
            (memory (export "memory") 1)
            (data (i32.const 0) "\2a")
            (start $peek))"#,
    );
    let func = new_import_func(peek_first_byte as wasmbed_host_callback_t, &[], &[]);
    let instance = instantiate(module, &[host_import("env", "peek", func)]);

    assert_eq!(START_BYTE.load(Ordering::SeqCst), 42);

    wasmbed_import_func_destroy(boxed(func));
    wasmbed_instance_destroy(boxed(instance));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_outside_handle_in_host_function_reports_busy_store() {
    let module = compile(
        r#"(module
            (import "env" "pages" (func $pages (result i32)))
            (func (export "run") (result i32) call $pages))"#,
    );
    let func = new_import_func(outside_memory_pages as wasmbed_host_callback_t, &[], &[WASM_I32]);
    let instance = instantiate(module, &[host_import("env", "pages", func)]);

    let limits = wasmbed_limits_t {
        min: 2,
        max: wasmbed_limit_option_t {
            has_some: false,
            some: 0,
        },
    };
    let mut memory = ptr::null_mut();
    assert_eq!(wasmbed_memory_new(Some(&mut memory), limits), wasmbed_result_t::WASMBED_OK);
    wasmbed_instance_context_data_set(unsafe { instance.as_ref() }, memory.cast::<c_void>());

    assert_eq!(call_i32(instance, c"run", &[]), Ok(0));
    assert!(last_error().unwrap().contains("Store is busy"));

    // Outside the host function the same handle works.
    assert_eq!(wasmbed_memory_length(unsafe { memory.as_ref() }), 2);

    wasmbed_import_func_destroy(boxed(func));
    wasmbed_instance_destroy(boxed(instance));
    wasmbed_memory_destroy(boxed(memory));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_missing_import_fails_to_link() {
    let module = compile(
        r#"(module
            (import "env" "f" (func))
            (func (export "run")))"#,
    );
    let mut instance = ptr::null_mut();
    let result = unsafe {
        wasmbed_module_instantiate(module.as_ref(), Some(&mut instance), ptr::null(), 0)
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(instance.is_null());
    assert!(last_error().unwrap().contains("Link error"));

    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_exports_snapshot() {
    let module = compile(SUM_WAT);
    let instance = instantiate(module, &[]);

    let mut exports = ptr::null_mut();
    wasmbed_instance_exports(unsafe { instance.as_ref() }, Some(&mut exports));
    let snapshot = unsafe { exports.as_ref() };
    assert_eq!(wasmbed_exports_len(snapshot), 3);
    assert!(wasmbed_exports_get(snapshot, 3).is_none());
    assert!(wasmbed_exports_get(snapshot, -1).is_none());

    let names: Vec<(String, u32)> = (0..wasmbed_exports_len(snapshot))
        .map(|idx| {
            let export = wasmbed_exports_get(snapshot, idx);
            (read(wasmbed_export_name(export)), wasmbed_export_kind(export))
        })
        .collect();
    assert_eq!(
        names,
        [
            ("sum".to_string(), WASM_FUNCTION),
            ("memory".to_string(), WASM_MEMORY),
            ("answer".to_string(), WASM_GLOBAL),
        ]
    );

    // The snapshot keeps the instance alive
    wasmbed_instance_destroy(boxed(instance));

    let func = wasmbed_export_to_func(wasmbed_exports_get(snapshot, 0));
    assert!(func.is_some());
    let mut arity = 0;
    wasmbed_export_func_params_arity(func, Some(&mut arity));
    assert_eq!(arity, 2);
    let mut returns = [u32::MAX];
    unsafe { wasmbed_export_func_returns(func, returns.as_mut_ptr(), 1) };
    assert_eq!(returns, [WASM_I32]);

    let params = [i32_value(20), i32_value(22)];
    let mut results = [i32_value(0)];
    let result = unsafe {
        wasmbed_export_func_call(func, params.as_ptr(), 2, results.as_mut_ptr(), 1)
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);
    assert_eq!(unsafe { results[0].value.I32 }, 42);

    assert!(wasmbed_export_to_func(wasmbed_exports_get(snapshot, 1)).is_none());

    let mut memory = ptr::null_mut();
    let result = wasmbed_export_to_memory(wasmbed_exports_get(snapshot, 1), Some(&mut memory));
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);
    assert_eq!(wasmbed_memory_length(unsafe { memory.as_ref() }), 1);
    wasmbed_memory_destroy(boxed(memory));

    let mut not_memory = ptr::null_mut();
    let result = wasmbed_export_to_memory(wasmbed_exports_get(snapshot, 0), Some(&mut not_memory));
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().unwrap().contains("Kind mismatch"));

    wasmbed_exports_destroy(boxed(exports));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_module_descriptors() {
    let module = compile(
        r#"(module
            (import "env" "f" (func (param i32)))
            (import "env" "mem" (memory 1))
            (func (export "run"))
            (global (export "g") (mut i64) (i64.const 0)))"#,
    );
    let handle = unsafe { module.as_ref() };

    let mut imports = ptr::null_mut();
    wasmbed_import_descriptors(handle, Some(&mut imports));
    let imports_ref = unsafe { imports.as_ref() };
    assert_eq!(wasmbed_import_descriptors_len(imports_ref), 2);

    let first = wasmbed_import_descriptors_get(imports_ref, 0);
    assert_eq!(read(wasmbed_import_descriptor_module_name(first)), "env");
    assert_eq!(read(wasmbed_import_descriptor_name(first)), "f");
    assert_eq!(wasmbed_import_descriptor_kind(first), WASM_FUNCTION);
    let second = wasmbed_import_descriptors_get(imports_ref, 1);
    assert_eq!(wasmbed_import_descriptor_kind(second), WASM_MEMORY);
    assert!(wasmbed_import_descriptors_get(imports_ref, 2).is_none());
    wasmbed_import_descriptors_destroy(boxed(imports));

    let mut exports = ptr::null_mut();
    wasmbed_export_descriptors(handle, Some(&mut exports));
    let exports_ref = unsafe { exports.as_ref() };
    assert_eq!(wasmbed_export_descriptors_len(exports_ref), 2);
    let g = wasmbed_export_descriptors_get(exports_ref, 1);
    assert_eq!(read(wasmbed_export_descriptor_name(g)), "g");
    assert_eq!(wasmbed_export_descriptor_kind(g), WASM_GLOBAL);
    wasmbed_export_descriptors_destroy(boxed(exports));

    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_wasi_import_object_is_finite_single_namespace() {
    let imports = unsafe {
        wasmbed_wasi_generate_import_object(
            ptr::null(),
            0,
            ptr::null(),
            0,
            ptr::null(),
            0,
            ptr::null(),
            0,
        )
    };
    assert!(!imports.is_null(), "{:?}", last_error());

    let iter = wasmbed_import_object_iterate_functions(unsafe { imports.as_ref() });
    let mut count = 0;
    while !wasmbed_import_object_iter_at_end(unsafe { iter.as_ref() }) {
        let mut entry = host_import("", "", ptr::null_mut());
        let result = wasmbed_import_object_iter_next(unsafe { iter.as_mut() }, Some(&mut entry));
        assert_eq!(result, wasmbed_result_t::WASMBED_OK);
        assert_eq!(read(entry.module_name), "wasi_snapshot_preview1");
        assert_eq!(entry.tag, WASM_FUNCTION);
        unsafe { wasmbed_import_object_imports_destroy(&mut entry, 1) };

        count += 1;
        assert!(count < 1000, "iteration does not terminate");
    }
    assert!(count > 0);

    let mut entry = host_import("", "", ptr::null_mut());
    let result = wasmbed_import_object_iter_next(unsafe { iter.as_mut() }, Some(&mut entry));
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);
    assert!(last_error().is_some());

    wasmbed_import_object_iter_destroy(boxed(iter));
    wasmbed_import_object_destroy(boxed(imports));
}

#[test]
fn test_wasi_module_runs_with_generated_imports() {
    let module = compile(
        r#"(module
            (import "wasi_unstable" "args_sizes_get"
                (func $args_sizes_get (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "argc") (result i32)
                (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
                (i32.load (i32.const 0))))"#,
    );
    let version = wasmbed_wasi_get_version(unsafe { module.as_ref() });
    assert_eq!(version, 2);

    let args = [bytes("prog"), bytes("--flag")];
    let envs = [bytes("KEY=value")];
    let imports = unsafe {
        wasmbed_wasi_generate_import_object_for_version(
            version,
            args.as_ptr(),
            2,
            envs.as_ptr(),
            1,
            ptr::null(),
            0,
            ptr::null(),
            0,
        )
    };
    assert!(!imports.is_null(), "{:?}", last_error());

    let mut instance = ptr::null_mut();
    let result = wasmbed_module_import_instantiate(
        Some(&mut instance),
        unsafe { module.as_ref() },
        unsafe { imports.as_ref() },
    );
    assert_eq!(result, wasmbed_result_t::WASMBED_OK, "{:?}", last_error());
    assert_eq!(call_i32(instance, c"argc", &[]), Ok(2));

    wasmbed_instance_destroy(boxed(instance));
    wasmbed_import_object_destroy(boxed(imports));
    wasmbed_module_destroy(boxed(module));
}

#[test]
fn test_wasi_version_detection() {
    let plain = compile(SUM_WAT);
    assert_eq!(wasmbed_wasi_get_version(unsafe { plain.as_ref() }), 0);
    assert_eq!(wasmbed_wasi_get_version(None), 0);

    let preview1 = compile(
        r#"(module (import "wasi_snapshot_preview1" "proc_exit" (func (param i32))))"#,
    );
    assert_eq!(wasmbed_wasi_get_version(unsafe { preview1.as_ref() }), 3);

    wasmbed_module_destroy(boxed(plain));
    wasmbed_module_destroy(boxed(preview1));
}

#[test]
fn test_wasi_generation_rejects_bad_env() {
    let envs = [bytes("NO_EQUALS_SIGN")];
    let imports = unsafe {
        wasmbed_wasi_generate_import_object(
            ptr::null(),
            0,
            envs.as_ptr(),
            1,
            ptr::null(),
            0,
            ptr::null(),
            0,
        )
    };
    assert!(imports.is_null());
    assert!(last_error().unwrap().contains("WASI"));

    let imports = unsafe {
        wasmbed_wasi_generate_import_object_for_version(
            9,
            ptr::null(),
            0,
            ptr::null(),
            0,
            ptr::null(),
            0,
            ptr::null(),
            0,
        )
    };
    assert!(imports.is_null());
    assert!(last_error().unwrap().contains("unknown WASI version"));
}

#[test]
fn test_wasi_preopened_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    let mapped = [wasmbed_wasi_map_dir_entry_t {
        alias: bytes("/data"),
        host_file_path: bytes(&path),
    }];

    let imports = unsafe {
        wasmbed_wasi_generate_import_object(
            ptr::null(),
            0,
            ptr::null(),
            0,
            ptr::null(),
            0,
            mapped.as_ptr(),
            1,
        )
    };
    assert!(!imports.is_null(), "{:?}", last_error());
    wasmbed_import_object_destroy(boxed(imports));

    let missing = dir.path().join("missing");
    let missing = missing.to_str().unwrap();
    let preopened = [bytes(missing)];
    let imports = unsafe {
        wasmbed_wasi_generate_import_object(
            ptr::null(),
            0,
            ptr::null(),
            0,
            preopened.as_ptr(),
            1,
            ptr::null(),
            0,
        )
    };
    assert!(imports.is_null());
    assert!(last_error().unwrap().contains("not a directory"));
}

#[test]
fn test_default_wasi_import_object() {
    let imports = wasmbed_wasi_generate_default_import_object();
    assert!(!imports.is_null());

    let mut entry = host_import("", "", ptr::null_mut());
    let result = unsafe {
        wasmbed_import_object_get_import(
            imports.as_ref(),
            bytes("wasi_snapshot_preview1"),
            bytes("fd_write"),
            WASM_FUNCTION,
            Some(&mut entry),
        )
    };
    assert_eq!(result, wasmbed_result_t::WASMBED_OK);
    let mut arity = 0;
    wasmbed_import_func_params_arity(unsafe { entry.value.func.as_ref() }, Some(&mut arity));
    assert_eq!(arity, 4);
    unsafe { wasmbed_import_object_imports_destroy(&mut entry, 1) };

    wasmbed_import_object_destroy(boxed(imports));
}

#[test]
fn test_null_handles_are_tolerated() {
    wasmbed_module_destroy(None);
    wasmbed_instance_destroy(None);
    wasmbed_memory_destroy(None);
    wasmbed_table_destroy(None);
    wasmbed_global_destroy(None);
    wasmbed_exports_destroy(None);
    wasmbed_import_func_destroy(None);
    wasmbed_import_object_destroy(None);
    wasmbed_import_object_iter_destroy(None);
    wasmbed_export_descriptors_destroy(None);
    wasmbed_import_descriptors_destroy(None);
    wasmbed_serialized_module_destroy(None);
    unsafe { wasmbed_import_object_imports_destroy(ptr::null_mut(), 3) };

    assert_eq!(wasmbed_memory_length(None), 0);
    assert!(wasmbed_memory_data(None).is_null());
    assert_eq!(wasmbed_table_length(None), 0);
    assert_eq!(wasmbed_exports_len(None), 0);
    assert!(wasmbed_exports_get(None, 0).is_none());
    assert!(wasmbed_export_to_func(None).is_none());
    assert_eq!(read_or_empty(wasmbed_export_name(None)), "");
    assert!(wasmbed_instance_context_get(None).is_none());
    assert!(wasmbed_instance_context_data_get(None).is_null());
    assert!(wasmbed_import_object_iter_at_end(None));
    assert_eq!(wasmbed_import_descriptors_len(None), 0);
    assert_eq!(wasmbed_export_descriptors_len(None), 0);
    assert_eq!(unsafe { wasmbed_global_get(None).value.I32 }, 0);

    assert_eq!(wasmbed_memory_grow(None, 1), wasmbed_result_t::WASMBED_ERROR);
    assert_eq!(
        unsafe { wasmbed_trap(None, c"x".as_ptr()) },
        wasmbed_result_t::WASMBED_ERROR
    );
    assert_eq!(
        unsafe {
            wasmbed_instance_call(None, c"f".as_ptr(), ptr::null(), 0, ptr::null_mut(), 0)
        },
        wasmbed_result_t::WASMBED_ERROR
    );
    assert!(last_error().is_some());
}

fn read_or_empty(array: wasmbed_byte_array) -> String {
    if array.bytes.is_null() {
        String::new()
    } else {
        read(array)
    }
}

#[test]
fn test_error_channel_is_per_thread() {
    let mut module = ptr::null_mut();
    let result = unsafe { wasmbed_compile(Some(&mut module), b"junk".as_ptr(), 4) };
    assert_eq!(result, wasmbed_result_t::WASMBED_ERROR);

    let seen_elsewhere = std::thread::spawn(|| wasmbed_last_error_length()).join().unwrap();
    assert_eq!(seen_elsewhere, 0);

    assert!(last_error().is_some());
}

#[test]
fn test_last_error_message_short_buffer() {
    let mut module = ptr::null_mut();
    unsafe { wasmbed_compile(Some(&mut module), b"junk".as_ptr(), 4) };

    let len = wasmbed_last_error_length();
    assert!(len > 1);
    let mut small = vec![0 as c_char; 1];
    let written = unsafe { wasmbed_last_error_message(small.as_mut_ptr(), 1 as c_int) };
    assert_eq!(written, -1);
    assert_eq!(wasmbed_last_error_length(), len, "a failed read keeps the message");
    assert!(last_error().is_some());
}

#[test]
fn test_version_queries() {
    let version = unsafe { CStr::from_ptr(wasmbed_version()) }.to_str().unwrap();
    assert_eq!(
        version,
        format!(
            "{}.{}.{}",
            wasmbed_version_major(),
            wasmbed_version_minor(),
            wasmbed_version_patch()
        )
    );
    let pre = unsafe { CStr::from_ptr(wasmbed_version_pre()) };
    assert!(pre.to_bytes().is_empty());
}
