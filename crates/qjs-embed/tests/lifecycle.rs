//! Finalizers, wraps, type tags, references and teardown sequencing.

mod common;

use std::{cell::RefCell, os::raw::c_void};

use common::{bump, counter, counter_ptr, setup};
use qjs_embed::{DeferredTeardown, Env, TypeTag};

fn finalize(_env: &Env, data: *mut c_void, _hint: *mut c_void) {
    bump(data);
}

#[test]
fn wrap_finalizes_exactly_once() {
    let (_lp, env) = setup();
    let count = counter();

    let outer = env.open_handle_scope();

    {
        let scope = env.open_handle_scope();

        let object = env.create_object();
        env.wrap(&object, counter_ptr(count), Some(finalize), std::ptr::null_mut())
            .unwrap();

        assert!(env.is_wrapped(&object));
        assert_eq!(env.unwrap(&object).unwrap(), counter_ptr(count));

        env.close_handle_scope(scope);
    }

    assert_eq!(count.get(), 1);

    env.request_garbage_collection();
    assert_eq!(count.get(), 1);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn remove_wrap_cancels_the_finalizer() {
    let (_lp, env) = setup();
    let count = counter();

    let outer = env.open_handle_scope();

    {
        let scope = env.open_handle_scope();

        let object = env.create_object();
        env.wrap(&object, counter_ptr(count), Some(finalize), std::ptr::null_mut())
            .unwrap();

        let data = env.remove_wrap(&object).unwrap();
        assert_eq!(data, counter_ptr(count));
        assert!(!env.is_wrapped(&object));

        env.close_handle_scope(scope);
    }

    assert_eq!(count.get(), 0);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn finalizers_run_in_reverse_attachment_order() {
    let (_lp, env) = setup();

    thread_local! {
        static ORDER: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
    }

    fn record(_env: &Env, data: *mut c_void, _hint: *mut c_void) {
        ORDER.with(|order| order.borrow_mut().push(data as usize as u32));
    }

    let outer = env.open_handle_scope();

    {
        let scope = env.open_handle_scope();

        let object = env.create_object();

        for tag in 1..=3u32 {
            env.add_finalizer(
                &object,
                tag as *mut c_void,
                Some(record),
                std::ptr::null_mut(),
            )
            .unwrap();
        }

        env.close_handle_scope(scope);
    }

    ORDER.with(|order| assert_eq!(*order.borrow(), vec![3, 2, 1]));

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn type_tags_attach_once() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let tag = TypeTag {
        lower: 0x0123_4567_89ab_cdef,
        upper: 0xfedc_ba98_7654_3210,
    };

    let other = TypeTag {
        lower: 1,
        upper: 2,
    };

    let object = env.create_object();

    env.add_type_tag(&object, &tag).unwrap();

    assert!(env.check_type_tag(&object, &tag).unwrap());
    assert!(!env.check_type_tag(&object, &other).unwrap());

    assert!(env.add_type_tag(&object, &tag).is_err());
    let _ = env.get_and_clear_last_exception();

    let untagged = env.create_object();
    assert!(!env.check_type_tag(&untagged, &tag).unwrap());

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn strong_references_keep_targets_alive() {
    let (_lp, env) = setup();

    let outer = env.open_handle_scope();

    let reference = {
        let scope = env.open_handle_scope();

        let object = env.create_object();
        let value = env.create_int32(5);
        env.set_named_property(&object, "kept", &value).unwrap();

        let reference = env.create_reference(&object, 1);

        env.close_handle_scope(scope);

        reference
    };

    let target = env.get_reference_value(&reference).expect("target alive");

    let kept = env.get_named_property(&target, "kept").unwrap();
    assert_eq!(env.get_value_int32(&kept), 5);

    drop(reference);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn weak_references_observe_collection() {
    let (_lp, env) = setup();

    let outer = env.open_handle_scope();

    let reference = {
        let scope = env.open_handle_scope();

        let object = env.create_object();
        let reference = env.create_reference(&object, 0);

        env.close_handle_scope(scope);

        reference
    };

    assert!(env.get_reference_value(&reference).is_none());

    drop(reference);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn rereferencing_restores_strength() {
    let (_lp, env) = setup();

    let outer = env.open_handle_scope();

    let reference = {
        let scope = env.open_handle_scope();

        let object = env.create_object();
        let reference = env.create_reference(&object, 0);

        // 0 -> 1 before collection: strong again.
        assert_eq!(env.reference_ref(&reference), 1);

        env.close_handle_scope(scope);

        reference
    };

    {
        let scope = env.open_handle_scope();

        assert!(env.get_reference_value(&reference).is_some());

        env.close_handle_scope(scope);
    }

    // 1 -> 0 with no other holders: the target collects immediately.
    assert_eq!(env.reference_unref(&reference), 0);
    assert!(env.get_reference_value(&reference).is_none());

    drop(reference);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn primitive_references_are_always_strong() {
    let (_lp, env) = setup();

    let outer = env.open_handle_scope();

    let reference = {
        let scope = env.open_handle_scope();

        let value = env.create_int32(99);
        let reference = env.create_reference(&value, 0);

        env.close_handle_scope(scope);

        reference
    };

    let value = env.get_reference_value(&reference).expect("primitive");
    assert_eq!(env.get_value_int32(&value), 99);

    drop(reference);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn immediate_teardown_runs_in_reverse_registration_order() {
    let (_lp, env) = setup();

    thread_local! {
        static ORDER: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
    }

    fn record(data: *mut c_void) {
        ORDER.with(|order| order.borrow_mut().push(data as usize as u32));
    }

    env.add_teardown_callback(record, 1 as *mut c_void).unwrap();
    env.add_teardown_callback(record, 2 as *mut c_void).unwrap();
    env.add_teardown_callback(record, 3 as *mut c_void).unwrap();

    env.remove_teardown_callback(record, 2 as *mut c_void)
        .unwrap();

    env.destroy();

    ORDER.with(|order| assert_eq!(*order.borrow(), vec![3, 1]));
}

#[test]
fn deferred_teardown_blocks_the_close() {
    let (lp, env) = setup();

    thread_local! {
        static HANDLE: RefCell<Option<DeferredTeardown>> = const { RefCell::new(None) };
    }

    fn stash(handle: DeferredTeardown, _data: *mut c_void) {
        HANDLE.with(|slot| *slot.borrow_mut() = Some(handle));
    }

    env.add_deferred_teardown_callback(stash, std::ptr::null_mut())
        .unwrap();

    env.destroy();

    // The environment is waiting on the deferred task.
    assert!(!lp.all_closed());

    let handle = HANDLE.with(|slot| slot.borrow_mut().take()).unwrap();
    assert!(handle.finish());

    lp.run_asyncs();

    assert!(lp.all_closed());
    assert!(!lp.keeping_alive());
}

#[test]
fn destroy_without_deferred_work_closes_inline() {
    let (lp, env) = setup();

    env.destroy();

    assert!(lp.all_closed());
}

#[test]
fn external_memory_accounting() {
    let (_lp, env) = setup();

    assert_eq!(env.adjust_external_memory(1024), 1024);
    assert_eq!(env.adjust_external_memory(-24), 1000);

    env.destroy();
}

#[test]
fn platform_reports_engine_identity() {
    let (_lp, env) = setup();

    let platform = env.platform();

    assert_eq!(platform.identifier(), "quickjs");
    assert!(!platform.version().is_empty());

    env.destroy();
}

#[test]
fn delegate_finalizers_run_at_collection() {
    let (_lp, env) = setup();
    let count = counter();

    let outer = env.open_handle_scope();

    {
        let scope = env.open_handle_scope();

        let _delegate = env.create_delegate(
            Default::default(),
            counter_ptr(count),
            Some(finalize),
            std::ptr::null_mut(),
        );

        env.close_handle_scope(scope);
    }

    assert_eq!(count.get(), 1);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
fn wrap_counter_survives_multiple_collections() {
    let (_lp, env) = setup();
    let count = counter();

    let outer = env.open_handle_scope();

    {
        let scope = env.open_handle_scope();

        let object = env.create_object();
        env.wrap(&object, counter_ptr(count), Some(finalize), std::ptr::null_mut())
            .unwrap();

        env.close_handle_scope(scope);
    }

    env.request_garbage_collection();
    env.request_garbage_collection();

    assert_eq!(count.get(), 1);

    env.close_handle_scope(outer);
    env.destroy();
}
