//! ArrayBuffers, backing stores, shared buffers, typed arrays and views.

mod common;

use common::{bump, counter, counter_ptr, eval, setup};
use qjs_embed::{Env, Error, TypedArrayType};

#[test]
fn arraybuffers_start_zeroed() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, data) = env.create_arraybuffer(32).unwrap();

    assert!(env.is_arraybuffer(&buffer));

    let (ptr, len) = env.get_arraybuffer_info(&buffer);
    assert_eq!(ptr, data);
    assert_eq!(len, 32);

    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    assert!(bytes.iter().all(|&byte| byte == 0));

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn unsafe_arraybuffers_have_the_requested_length() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, _data) = env.create_unsafe_arraybuffer(16).unwrap();

    let (_ptr, len) = env.get_arraybuffer_info(&buffer);
    assert_eq!(len, 16);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn oversize_allocations_raise_range_errors() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let result = env.create_arraybuffer(u32::MAX as usize + 1);

    assert_eq!(result.unwrap_err(), Error::PendingException);

    let error = env.get_and_clear_last_exception();
    let name = env.get_named_property(&error, "name").unwrap();
    assert_eq!(env.get_string(&name), "RangeError");

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn buffer_bytes_are_visible_to_script() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, data) = env.create_arraybuffer(4).unwrap();

    unsafe {
        std::slice::from_raw_parts_mut(data, 4).copy_from_slice(&[1, 2, 3, 4]);
    }

    let global = env.get_global();
    env.set_named_property(&global, "b", &buffer).unwrap();

    let sum = eval(&env, "new Uint8Array(b).reduce((a, v) => a + v, 0)").unwrap();
    assert_eq!(env.get_value_int32(&sum), 10);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn external_arraybuffers_finalize_host_memory() {
    let (_lp, env) = setup();
    let count = counter();

    fn finalize(_env: &Env, data: *mut std::os::raw::c_void, _hint: *mut std::os::raw::c_void) {
        bump(data);
    }

    let mut bytes = vec![7u8; 8];

    let outer = env.open_handle_scope();

    {
        let scope = env.open_handle_scope();

        let buffer = env
            .create_external_arraybuffer(
                bytes.as_mut_ptr(),
                bytes.len(),
                Some(finalize),
                counter_ptr(count),
            )
            .unwrap();

        let (ptr, len) = env.get_arraybuffer_info(&buffer);
        assert_eq!(ptr, bytes.as_mut_ptr());
        assert_eq!(len, 8);

        env.close_handle_scope(scope);
    }

    assert_eq!(count.get(), 1);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn detached_buffers_read_as_detached() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, _data) = env.create_arraybuffer(8).unwrap();

    assert!(!env.is_detached_arraybuffer(&buffer));

    env.detach_arraybuffer(&buffer);

    assert!(env.is_detached_arraybuffer(&buffer));
    assert!(!env.is_exception_pending());

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn backing_stores_share_bytes_and_release() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, data) = env.create_arraybuffer(4).unwrap();

    let store = env.get_arraybuffer_backing_store(&buffer);

    assert_eq!(store.data(), data);
    assert_eq!(store.len(), 4);

    let (alias, alias_data, alias_len) =
        env.create_arraybuffer_with_backing_store(&store).unwrap();

    assert_eq!(alias_data, data);
    assert_eq!(alias_len, 4);

    unsafe { *data = 9 };

    let global = env.get_global();
    env.set_named_property(&global, "alias", &alias).unwrap();

    let first = eval(&env, "new Uint8Array(alias)[0]").unwrap();
    assert_eq!(env.get_value_int32(&first), 9);

    env.release_arraybuffer_backing_store(store);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn sharedarraybuffers_expose_their_payload() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, data) = env.create_sharedarraybuffer(16).unwrap();

    let (ptr, len) = env.get_sharedarraybuffer_info(&buffer);
    assert_eq!(ptr, data);
    assert_eq!(len, 16);

    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    assert!(bytes.iter().all(|&byte| byte == 0));

    let store = env.get_sharedarraybuffer_backing_store(&buffer);
    assert_eq!(store.len(), 16);

    let (_alias, alias_data, _len) = env
        .create_sharedarraybuffer_with_backing_store(&store)
        .unwrap();
    assert_eq!(alias_data, data);

    env.release_arraybuffer_backing_store(store);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn typed_arrays_view_their_buffers() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, data) = env.create_arraybuffer(16).unwrap();

    let typedarray = env
        .create_typedarray(TypedArrayType::Uint32, 3, &buffer, 4)
        .unwrap();

    assert!(env.is_typedarray(&typedarray));
    assert!(env.is_uint32array(&typedarray));
    assert!(!env.is_int8array(&typedarray));

    let info = env.get_typedarray_info(&typedarray).unwrap();

    assert_eq!(info.element_type, Some(TypedArrayType::Uint32));
    assert_eq!(info.len, 3);
    assert_eq!(info.offset, 4);
    assert_eq!(info.data, unsafe { data.add(4) });

    let (ptr, len) = env.get_arraybuffer_info(&info.arraybuffer);
    assert_eq!(ptr, data);
    assert_eq!(len, 16);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn misaligned_typed_arrays_fail() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, _data) = env.create_arraybuffer(16).unwrap();

    let result = env.create_typedarray(TypedArrayType::Uint32, 2, &buffer, 3);

    assert!(result.is_err());
    let _ = env.get_and_clear_last_exception();

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn data_views_report_their_window() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, data) = env.create_arraybuffer(16).unwrap();

    let dataview = env.create_dataview(8, &buffer, 4).unwrap();

    assert!(env.is_dataview(&dataview));

    let info = env.get_dataview_info(&dataview).unwrap();

    assert_eq!(info.len, 8);
    assert_eq!(info.offset, 4);
    assert_eq!(info.data, unsafe { data.add(4) });

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn typed_array_views_pair_with_release() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let (buffer, _data) = env.create_arraybuffer(8).unwrap();

    let typedarray = env
        .create_typedarray(TypedArrayType::Int16, 4, &buffer, 0)
        .unwrap();

    let (element_type, ptr, len, view) = env.get_typedarray_view(&typedarray).unwrap();

    assert_eq!(element_type, Some(TypedArrayType::Int16));
    assert!(!ptr.is_null());
    assert_eq!(len, 4);

    env.release_typedarray_view(view);

    let dataview = env.create_dataview(8, &buffer, 0).unwrap();

    let (ptr, len, view) = env.get_dataview_view(&dataview).unwrap();

    assert!(!ptr.is_null());
    assert_eq!(len, 8);

    env.release_dataview_view(view);

    env.close_handle_scope(scope);
    env.destroy();
}
