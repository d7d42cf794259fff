//! Delegates: objects whose property operations are trapped by host
//! callbacks.
//!
//! The environment registers a delegate class whose exotic hooks route
//! `get`/`set`/`has`/`delete`/`own_keys` through the stored callback
//! vector. Exceptions raised by a trap propagate to the engine.

use std::os::raw::{c_int, c_void};

use crate::{
    env::{env_from_context, env_from_runtime, Env},
    finalizer::FinalizeCallback,
    handle::Value,
    sys,
};

/// Trap callbacks for a delegate. Absent traps fall through to "not
/// present" (`get`, `own_keys`) or "not handled" (`set`, `delete`).
#[derive(Default)]
pub struct DelegateCallbacks {
    /// `(env, key, data)`; `None` means the property is absent.
    pub get: Option<Box<dyn Fn(&Env, &Value, *mut c_void) -> Option<Value>>>,
    /// `(env, key, data)`; consulted before `get`.
    pub has: Option<Box<dyn Fn(&Env, &Value, *mut c_void) -> bool>>,
    /// `(env, key, value, data)`; returns whether the write was accepted.
    pub set: Option<Box<dyn Fn(&Env, &Value, &Value, *mut c_void) -> bool>>,
    /// `(env, key, data)`; returns whether the delete was accepted.
    pub delete_property: Option<Box<dyn Fn(&Env, &Value, *mut c_void) -> bool>>,
    /// `(env, data)`; returns an array of own keys.
    pub own_keys: Option<Box<dyn Fn(&Env, *mut c_void) -> Option<Value>>>,
}

pub(crate) struct Delegate {
    callbacks: DelegateCallbacks,
    data: *mut c_void,
    finalize_cb: Option<FinalizeCallback>,
    finalize_hint: *mut c_void,
}

pub(crate) static DELEGATE_EXOTIC: sys::JSClassExoticMethods = sys::JSClassExoticMethods {
    get_own_property: Some(on_delegate_get_own_property),
    get_own_property_names: Some(on_delegate_get_own_property_names),
    delete_property: Some(on_delegate_delete_property),
    define_own_property: None,
    has_property: None,
    get_property: None,
    set_property: Some(on_delegate_set_property),
};

unsafe fn delegate_of<'a>(env: &Env, object: sys::JSValue) -> &'a Delegate {
    &*(sys::JS_GetOpaque(object, env.classes.delegate) as *const Delegate)
}

unsafe extern "C" fn on_delegate_get_own_property(
    ctx: *mut sys::JSContext,
    descriptor: *mut sys::JSPropertyDescriptor,
    object: sys::JSValue,
    name: sys::JSAtom,
) -> c_int {
    let env = env_from_context(ctx);
    let delegate = delegate_of(env, object);

    if let Some(has) = &delegate.callbacks.has {
        let property = Value::from_raw(sys::JS_AtomToValue(ctx, name));

        let exists = has(env, &property, delegate.data);

        sys::free_value(ctx, property.raw());

        if sys::JS_HasException(ctx) {
            return -1;
        }

        if !exists {
            return 0;
        }
    }

    if let Some(get) = &delegate.callbacks.get {
        let property = Value::from_raw(sys::JS_AtomToValue(ctx, name));

        let result = get(env, &property, delegate.data);

        sys::free_value(ctx, property.raw());

        if sys::JS_HasException(ctx) {
            return -1;
        }

        let Some(result) = result else {
            return 0;
        };

        if !descriptor.is_null() {
            // The engine consumes the descriptor's references.
            (*descriptor).flags = sys::JS_PROP_ENUMERABLE;
            (*descriptor).value = sys::dup(ctx, result.raw());
            (*descriptor).getter = sys::undefined();
            (*descriptor).setter = sys::undefined();
        }

        return 1;
    }

    0
}

unsafe extern "C" fn on_delegate_get_own_property_names(
    ctx: *mut sys::JSContext,
    pproperties: *mut *mut sys::JSPropertyEnum,
    plen: *mut u32,
    object: sys::JSValue,
) -> c_int {
    let env = env_from_context(ctx);
    let delegate = delegate_of(env, object);

    if let Some(own_keys) = &delegate.callbacks.own_keys {
        let result = own_keys(env, delegate.data);

        if sys::JS_HasException(ctx) {
            return -1;
        }

        let Some(result) = result else {
            *pproperties = std::ptr::null_mut();
            *plen = 0;

            return 0;
        };

        let len = {
            let length = sys::JS_GetPropertyStr(ctx, result.raw(), c"length".as_ptr());

            let mut len = 0u32;
            sys::JS_ToInt32(ctx, &mut len as *mut u32 as *mut i32, length);

            sys::free_value(ctx, length);

            len
        };

        let properties =
            sys::js_mallocz(ctx, len as usize * std::mem::size_of::<sys::JSPropertyEnum>())
                as *mut sys::JSPropertyEnum;

        for i in 0..len {
            let value = sys::JS_GetPropertyUint32(ctx, result.raw(), i);

            (*properties.add(i as usize)).atom = sys::JS_ValueToAtom(ctx, value);

            sys::free_value(ctx, value);
        }

        *pproperties = properties;
        *plen = len;

        return 0;
    }

    *pproperties = std::ptr::null_mut();
    *plen = 0;

    0
}

unsafe extern "C" fn on_delegate_delete_property(
    ctx: *mut sys::JSContext,
    object: sys::JSValue,
    name: sys::JSAtom,
) -> c_int {
    let env = env_from_context(ctx);
    let delegate = delegate_of(env, object);

    if let Some(delete_property) = &delegate.callbacks.delete_property {
        let property = Value::from_raw(sys::JS_AtomToValue(ctx, name));

        let success = delete_property(env, &property, delegate.data);

        sys::free_value(ctx, property.raw());

        if sys::JS_HasException(ctx) {
            return -1;
        }

        return success as c_int;
    }

    0
}

unsafe extern "C" fn on_delegate_set_property(
    ctx: *mut sys::JSContext,
    object: sys::JSValue,
    name: sys::JSAtom,
    value: sys::JSValue,
    _receiver: sys::JSValue,
    _flags: c_int,
) -> c_int {
    let env = env_from_context(ctx);
    let delegate = delegate_of(env, object);

    if let Some(set) = &delegate.callbacks.set {
        let property = Value::from_raw(sys::JS_AtomToValue(ctx, name));
        let value = Value::from_raw(value);

        let success = set(env, &property, &value, delegate.data);

        sys::free_value(ctx, property.raw());

        if sys::JS_HasException(ctx) {
            return -1;
        }

        return success as c_int;
    }

    0
}

pub(crate) unsafe extern "C" fn on_delegate_finalize(rt: *mut sys::JSRuntime, value: sys::JSValue) {
    let env = env_from_runtime(rt);

    let delegate =
        Box::from_raw(sys::JS_GetOpaque(value, env.classes.delegate) as *mut Delegate);

    if let Some(cb) = delegate.finalize_cb {
        cb(env, delegate.data, delegate.finalize_hint);
    }
}

impl Env {
    /// Creates a delegate trapping property operations through `callbacks`.
    /// Allowed even with a pending exception.
    pub fn create_delegate(
        &self,
        callbacks: DelegateCallbacks,
        data: *mut c_void,
        finalize_cb: Option<FinalizeCallback>,
        finalize_hint: *mut c_void,
    ) -> Value {
        let delegate = Box::into_raw(Box::new(Delegate {
            callbacks,
            data,
            finalize_cb,
            finalize_hint,
        }));

        let object = unsafe {
            let object = sys::JS_NewObjectClass(self.context, self.classes.delegate as i32);

            sys::JS_SetOpaque(object, delegate as *mut c_void);

            object
        };

        self.root(object)
    }
}
