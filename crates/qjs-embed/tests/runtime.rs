//! Script execution, the callback bridge, exception surfacing and scopes.

mod common;

use std::{cell::Cell, rc::Rc};

use common::{eval, setup};
use qjs_embed::{DelegateCallbacks, Error, PropertyAttributes, PropertyDescriptor};

#[test]
fn run_script_returns_completion_value() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let result = eval(&env, "6 * 7").unwrap();
    assert_eq!(env.get_value_int32(&result), 42);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn microtasks_drain_before_run_script_returns() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    eval(
        &env,
        "Promise.resolve().then(() => globalThis.x = 1); globalThis.x = 0;",
    )
    .unwrap();

    let global = env.get_global();
    let x = env.get_named_property(&global, "x").unwrap();

    assert_eq!(env.get_value_int32(&x), 1);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn exceptions_surface_to_the_caller() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let result = eval(&env, "throw new TypeError('t')");

    assert_eq!(result.unwrap_err(), Error::PendingException);
    assert!(env.is_exception_pending());

    let error = env.get_and_clear_last_exception();

    let message = env.get_named_property(&error, "message").unwrap();
    assert_eq!(env.get_string(&message), "t");

    let name = env.get_named_property(&error, "name").unwrap();
    assert_eq!(env.get_string(&name), "TypeError");

    assert!(!env.is_exception_pending());

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn uncaught_exception_callback_consumes_the_error() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let seen = Rc::new(Cell::new(0));

    env.on_uncaught_exception({
        let seen = seen.clone();
        move |env, error| {
            let message = env.get_named_property(error, "message").unwrap();
            assert_eq!(env.get_string(&message), "boom");

            seen.set(seen.get() + 1);
        }
    });

    let result = eval(&env, "throw new Error('boom')");

    assert_eq!(result.unwrap_err(), Error::UncaughtException);
    assert_eq!(seen.get(), 1);
    assert!(!env.is_exception_pending());

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn pending_exception_blocks_script_apis() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    env.throw_error(Some("EFAIL"), "stuck").unwrap();

    assert_eq!(
        eval(&env, "1 + 1").unwrap_err(),
        Error::PendingException
    );

    let error = env.get_and_clear_last_exception();
    let code = env.get_named_property(&error, "code").unwrap();
    assert_eq!(env.get_string(&code), "EFAIL");

    assert!(eval(&env, "1 + 1").is_ok());

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn created_errors_carry_codes() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let code = env.create_string_utf8("ERANGE");
    let message = env.create_string_utf8("out of range");

    let error = env.create_range_error(Some(&code), &message);

    let name = env.get_named_property(&error, "name").unwrap();
    assert_eq!(env.get_string(&name), "RangeError");

    let read = env.get_named_property(&error, "code").unwrap();
    assert_eq!(env.get_string(&read), "ERANGE");

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn terminate_execution_leaves_a_pending_error() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    env.terminate_execution();

    assert!(env.is_exception_pending());

    let error = env.get_and_clear_last_exception();
    let message = env.get_named_property(&error, "message").unwrap();
    assert_eq!(env.get_string(&message), "terminated");

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn fatal_exception_routes_to_the_uncaught_callback() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let seen = Rc::new(Cell::new(0));

    env.on_uncaught_exception({
        let seen = seen.clone();
        move |_env, _error| seen.set(seen.get() + 1)
    });

    let message = env.create_string_utf8("fatal");
    let error = env.create_error(None, &message);

    env.fatal_exception(&error);

    assert_eq!(seen.get(), 1);
    assert!(!env.is_exception_pending());

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn native_functions_receive_arguments() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let function = env
        .create_function(
            "add",
            |env, info| {
                let call = env.get_callback_info(info, 2);

                assert_eq!(call.argc, 2);

                let sum =
                    env.get_value_int32(&call.args[0]) + env.get_value_int32(&call.args[1]);

                Some(env.create_int32(sum))
            },
            std::ptr::null_mut(),
        )
        .unwrap();

    let recv = env.get_undefined();
    let args = [env.create_int32(19), env.create_int32(23)];

    let result = env.call_function(&recv, &function, &args).unwrap();

    assert_eq!(env.get_value_int32(&result), 42);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn missing_arguments_pad_with_distinct_undefined() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let function = env
        .create_function(
            "padded",
            |env, info| {
                let call = env.get_callback_info(info, 3);

                assert_eq!(call.argc, 1);
                assert_eq!(call.args.len(), 3);
                assert!(env.is_undefined(&call.args[1]));
                assert!(env.is_undefined(&call.args[2]));

                None
            },
            std::ptr::null_mut(),
        )
        .unwrap();

    let recv = env.get_undefined();
    let args = [env.create_int32(1)];

    let result = env.call_function(&recv, &function, &args).unwrap();
    assert!(env.is_undefined(&result));

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn throwing_callbacks_propagate() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let function = env
        .create_function(
            "fail",
            |env, _info| {
                env.throw_type_error(None, "nope").unwrap();

                None
            },
            std::ptr::null_mut(),
        )
        .unwrap();

    let recv = env.get_undefined();
    let result = env.call_function(&recv, &function, &[]);

    assert_eq!(result.unwrap_err(), Error::PendingException);

    let error = env.get_and_clear_last_exception();
    let name = env.get_named_property(&error, "name").unwrap();
    assert_eq!(env.get_string(&name), "TypeError");

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn checkpoint_calls_surface_uncaught_exceptions() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let seen = Rc::new(Cell::new(0));

    env.on_uncaught_exception({
        let seen = seen.clone();
        move |_env, _error| seen.set(seen.get() + 1)
    });

    let function = eval(&env, "(() => { throw new Error('later') })").unwrap();

    let recv = env.get_undefined();
    let result = env.call_function_with_checkpoint(&recv, &function, &[]);

    assert_eq!(result.unwrap_err(), Error::UncaughtException);
    assert_eq!(seen.get(), 1);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn functions_from_source_close_over_arguments() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let args = [env.create_string_utf8("a"), env.create_string_utf8("b")];
    let body = env.create_string_utf8("return a * b;");

    let function = env
        .create_function_with_source(Some("mul"), "mul.js", &args, &body)
        .unwrap();

    assert!(env.is_function(&function));

    let recv = env.get_undefined();
    let argv = [env.create_int32(6), env.create_int32(7)];

    let result = env.call_function(&recv, &function, &argv).unwrap();
    assert_eq!(env.get_value_int32(&result), 42);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn classes_split_instance_and_static_properties() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let properties = vec![
        PropertyDescriptor {
            name: env.create_string_utf8("kind"),
            value: Some(env.create_string_utf8("widget")),
            method: None,
            getter: None,
            setter: None,
            attributes: PropertyAttributes::ENUMERABLE | PropertyAttributes::STATIC,
            data: std::ptr::null_mut(),
        },
        PropertyDescriptor {
            name: env.create_string_utf8("double"),
            value: None,
            method: Some(Box::new(|env, info| {
                let call = env.get_callback_info(info, 1);

                Some(env.create_int32(env.get_value_int32(&call.args[0]) * 2))
            })),
            getter: None,
            setter: None,
            attributes: PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
            data: std::ptr::null_mut(),
        },
    ];

    let class = env
        .define_class(
            "Widget",
            |env, info| {
                let call = env.get_callback_info(info, 1);

                let target = env.get_new_target(info);
                assert!(!env.is_null(&target));

                env.set_named_property(&call.receiver, "size", &call.args[0])
                    .unwrap();

                None
            },
            std::ptr::null_mut(),
            properties,
        )
        .unwrap();

    let kind = env.get_named_property(&class, "kind").unwrap();
    assert_eq!(env.get_string(&kind), "widget");

    let args = [env.create_int32(9)];
    let instance = env.new_instance(&class, &args).unwrap();

    assert!(env.instanceof(&instance, &class).unwrap());

    let size = env.get_named_property(&instance, "size").unwrap();
    assert_eq!(env.get_value_int32(&size), 9);

    let double = env.get_named_property(&instance, "double").unwrap();
    let result = env.call_function(&instance, &double, &args).unwrap();
    assert_eq!(env.get_value_int32(&result), 18);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn microtasks_drain_before_new_instance_returns() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let class = env
        .define_class(
            "Scheduler",
            |env, _info| {
                let source = env.create_string_utf8(
                    "globalThis.ticked = 0; Promise.resolve().then(() => globalThis.ticked = 1);",
                );

                env.run_script("schedule", &source).unwrap();

                None
            },
            std::ptr::null_mut(),
            Vec::new(),
        )
        .unwrap();

    env.new_instance(&class, &[]).unwrap();

    let global = env.get_global();
    let ticked = env.get_named_property(&global, "ticked").unwrap();

    assert_eq!(env.get_value_int32(&ticked), 1);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn define_properties_with_accessors() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let object = env.create_object();

    let properties = vec![PropertyDescriptor {
        name: env.create_string_utf8("answer"),
        value: None,
        method: None,
        getter: Some(Box::new(|env, _info| Some(env.create_int32(42)))),
        setter: None,
        attributes: PropertyAttributes::ENUMERABLE,
        data: std::ptr::null_mut(),
    }];

    env.define_properties(&object, properties).unwrap();

    let answer = env.get_named_property(&object, "answer").unwrap();
    assert_eq!(env.get_value_int32(&answer), 42);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn delegates_trap_property_operations() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let callbacks = DelegateCallbacks {
        get: Some(Box::new(|env, key, _data| {
            (env.get_string(key) == "answer").then(|| env.create_int32(42))
        })),
        has: Some(Box::new(|env, key, _data| {
            env.get_string(key) == "answer"
        })),
        set: Some(Box::new(|env, key, _value, _data| {
            env.get_string(key) == "writable"
        })),
        delete_property: Some(Box::new(|_env, _key, _data| true)),
        own_keys: Some(Box::new(|env, _data| {
            let keys = env.create_array();
            let name = env.create_string_utf8("answer");

            env.set_element(&keys, 0, &name).unwrap();

            Some(keys)
        })),
    };

    let delegate = env.create_delegate(
        callbacks,
        std::ptr::null_mut(),
        None,
        std::ptr::null_mut(),
    );

    assert!(env.is_delegate(&delegate));

    let global = env.get_global();
    env.set_named_property(&global, "d", &delegate).unwrap();

    let answer = eval(&env, "d.answer").unwrap();
    assert_eq!(env.get_value_int32(&answer), 42);

    let missing = eval(&env, "d.missing").unwrap();
    assert!(env.is_undefined(&missing));

    let keys = eval(&env, "Object.keys(d).join(',')").unwrap();
    assert_eq!(env.get_string(&keys), "answer");

    let deleted = eval(&env, "delete d.answer").unwrap();
    assert!(env.get_value_bool(&deleted));

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn escaped_handles_outlive_their_scope() {
    let (_lp, env) = setup();
    let outer = env.open_handle_scope();

    let escaped = {
        let inner = env.open_escapable_handle_scope();

        let value = env.create_int32(7);
        let escaped = env.escape_handle(&inner, &value);

        env.close_escapable_handle_scope(inner);

        escaped
    };

    assert_eq!(env.get_value_int32(&escaped), 7);

    env.close_handle_scope(outer);
    env.destroy();
}

#[test]
#[should_panic(expected = "scope already escaped")]
fn second_escape_panics() {
    let (_lp, env) = setup();
    let outer = env.open_handle_scope();

    let inner = env.open_escapable_handle_scope();

    let value = env.create_int32(1);
    let _ = env.escape_handle(&inner, &value);
    let _ = env.escape_handle(&inner, &value);

    env.close_escapable_handle_scope(inner);
    env.close_handle_scope(outer);
}

#[test]
fn bindings_object_persists() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let bindings = env.get_bindings().unwrap();
    let value = env.create_int32(13);

    env.set_named_property(&bindings, "slot", &value).unwrap();

    let again = env.get_bindings().unwrap();
    let read = env.get_named_property(&again, "slot").unwrap();

    assert_eq!(env.get_value_int32(&read), 13);

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn unsupported_operations_throw() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let function = eval(&env, "(() => 1)").unwrap();

    let result = env.create_threadsafe_function(&function, 0, 1);
    assert!(result.is_err());

    let error = env.get_and_clear_last_exception();
    let message = env.get_named_property(&error, "message").unwrap();
    assert_eq!(env.get_string(&message), "Unsupported operation");

    assert!(env.create_context().is_err());
    let _ = env.get_and_clear_last_exception();

    assert!(env.get_heap_statistics().is_err());
    let _ = env.get_and_clear_last_exception();

    assert!(env.create_inspector().is_err());
    let _ = env.get_and_clear_last_exception();

    env.close_handle_scope(scope);
    env.destroy();
}

#[test]
fn external_values_round_trip_data() {
    let (_lp, env) = setup();
    let scope = env.open_handle_scope();

    let data = Box::into_raw(Box::new(77u32)) as *mut std::os::raw::c_void;

    let external = env.create_external(data, None, std::ptr::null_mut());

    assert!(env.is_external(&external));
    assert_eq!(env.get_value_external(&external), data);

    env.close_handle_scope(scope);
    env.destroy();

    drop(unsafe { Box::from_raw(data as *mut u32) });
}
