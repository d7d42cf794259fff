//! The callback bridge: native functions, constructors and classes.
//!
//! A native function is an engine function object whose bound data slot
//! holds a function-class instance carrying the boxed host callback. Every
//! dispatch opens a fresh handle scope around the host callback and closes
//! it on the way out, on both the normal and the exceptional path.

use std::os::raw::{c_int, c_void};

use crate::{
    env::{env_from_context, Env},
    error::Result,
    handle::Value,
    sys,
};

/// A host function callback. Returning `None` yields `undefined` unless an
/// exception is pending, in which case the exception propagates.
pub type FunctionCallback = Box<dyn Fn(&Env, &CallbackInfo) -> Option<Value>>;

pub(crate) struct Callback {
    pub(crate) cb: FunctionCallback,
    pub(crate) data: *mut c_void,
}

/// Per-call record handed to host callbacks.
pub struct CallbackInfo {
    callback: *const Callback,
    argc: c_int,
    argv: *mut sys::JSValue,
    receiver: sys::JSValue,
    new_target: sys::JSValue,
}

impl CallbackInfo {
    /// The number of arguments the script caller actually passed.
    pub fn argc(&self) -> usize {
        self.argc as usize
    }
}

/// Arguments unpacked from a [`CallbackInfo`].
pub struct CallArgs {
    /// Rooted wrappers, one per requested slot; slots past the actual
    /// argument count hold distinct `undefined` wrappers.
    pub args: Vec<Value>,
    /// The actual argument count.
    pub argc: usize,
    pub receiver: Value,
    pub data: *mut c_void,
}

/// Value kinds named by typed-function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Int32,
    Uint32,
    Int64,
    Float64,
    Boolean,
    Value,
}

/// A typed-function signature. Carried for API compatibility; this backend
/// always dispatches through the untyped path.
pub struct CallbackSignature {
    pub result: SignatureType,
    pub args: Vec<SignatureType>,
}

/// Attribute bits for property descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertyAttributes(u32);

impl PropertyAttributes {
    pub const NONE: PropertyAttributes = PropertyAttributes(0);
    pub const WRITABLE: PropertyAttributes = PropertyAttributes(1);
    pub const ENUMERABLE: PropertyAttributes = PropertyAttributes(2);
    pub const CONFIGURABLE: PropertyAttributes = PropertyAttributes(4);
    /// Defined on the constructor rather than the prototype.
    pub const STATIC: PropertyAttributes = PropertyAttributes(8);

    pub fn contains(self, other: PropertyAttributes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PropertyAttributes {
    type Output = PropertyAttributes;

    fn bitor(self, rhs: PropertyAttributes) -> PropertyAttributes {
        PropertyAttributes(self.0 | rhs.0)
    }
}

/// One entry for [`Env::define_properties`] and [`Env::define_class`].
/// Exactly one of `value`, `method`, or a getter/setter pair should be
/// populated.
pub struct PropertyDescriptor {
    pub name: Value,
    pub value: Option<Value>,
    pub method: Option<FunctionCallback>,
    pub getter: Option<FunctionCallback>,
    pub setter: Option<FunctionCallback>,
    pub attributes: PropertyAttributes,
    pub data: *mut c_void,
}

pub(crate) unsafe extern "C" fn on_function_finalize(rt: *mut sys::JSRuntime, value: sys::JSValue) {
    let env = crate::env::env_from_runtime(rt);

    let callback = sys::JS_GetOpaque(value, env.classes.function) as *mut Callback;

    drop(Box::from_raw(callback));
}

pub(crate) unsafe extern "C" fn on_constructor_finalize(
    rt: *mut sys::JSRuntime,
    value: sys::JSValue,
) {
    let env = crate::env::env_from_runtime(rt);

    let callback = sys::JS_GetOpaque(value, env.classes.constructor) as *mut Callback;

    drop(Box::from_raw(callback));
}

pub(crate) unsafe extern "C" fn on_function_call(
    ctx: *mut sys::JSContext,
    receiver: sys::JSValue,
    argc: c_int,
    argv: *mut sys::JSValue,
    _magic: c_int,
    data: *mut sys::JSValue,
) -> sys::JSValue {
    let env = env_from_context(ctx);

    let callback = sys::JS_GetOpaque(*data, env.classes.function) as *const Callback;

    let info = CallbackInfo {
        callback,
        argc,
        argv,
        receiver,
        new_target: sys::null(),
    };

    let scope = env.open_handle_scope();

    let result = ((*callback).cb)(env, &info);

    let value = if sys::JS_HasException(ctx) {
        sys::exception()
    } else {
        match result {
            Some(result) => sys::dup(ctx, result.raw()),
            None => sys::undefined(),
        }
    };

    env.close_handle_scope(scope);

    value
}

pub(crate) unsafe extern "C" fn on_constructor_call(
    ctx: *mut sys::JSContext,
    new_target: sys::JSValue,
    argc: c_int,
    argv: *mut sys::JSValue,
    _magic: c_int,
    data: *mut sys::JSValue,
) -> sys::JSValue {
    let env = env_from_context(ctx);

    let prototype = sys::JS_GetPropertyStr(ctx, new_target, c"prototype".as_ptr());

    let receiver = sys::JS_NewObjectProto(ctx, prototype);

    sys::free_value(ctx, prototype);

    let callback = sys::JS_GetOpaque(*data, env.classes.constructor) as *const Callback;

    let info = CallbackInfo {
        callback,
        argc,
        argv,
        receiver,
        new_target,
    };

    let scope = env.open_handle_scope();

    // The engine-visible result is the pre-constructed receiver; the host
    // return value is discarded.
    let _ = ((*callback).cb)(env, &info);

    env.close_handle_scope(scope);

    if sys::JS_HasException(ctx) {
        sys::free_value(ctx, receiver);

        return sys::exception();
    }

    receiver
}

impl Env {
    /// Creates a native function. `name` is carried for API compatibility;
    /// the engine names bound-data functions itself.
    pub fn create_function(
        &self,
        _name: &str,
        cb: impl Fn(&Env, &CallbackInfo) -> Option<Value> + 'static,
        data: *mut c_void,
    ) -> Result<Value> {
        self.check_no_pending()?;

        let function = unsafe {
            let callback = Box::into_raw(Box::new(Callback {
                cb: Box::new(cb),
                data,
            }));

            let mut external = sys::JS_NewObjectClass(self.context, self.classes.function as i32);

            sys::JS_SetOpaque(external, callback as *mut c_void);

            let function =
                sys::JS_NewCFunctionData(self.context, on_function_call, 0, 0, 1, &mut external);

            sys::free_value(self.context, external);

            function
        };

        Ok(self.root(function))
    }

    /// Accepts a typed-call signature but dispatches through the regular
    /// callback path.
    pub fn create_typed_function(
        &self,
        name: &str,
        cb: impl Fn(&Env, &CallbackInfo) -> Option<Value> + 'static,
        _signature: &CallbackSignature,
        _address: *const c_void,
        data: *mut c_void,
    ) -> Result<Value> {
        self.create_function(name, cb, data)
    }

    /// Evaluates `const NAME = (ARGS) => { BODY }` and returns the
    /// resulting closure.
    pub fn create_function_with_source(
        &self,
        name: Option<&str>,
        file: &str,
        args: &[Value],
        source: &Value,
    ) -> Result<Value> {
        self.check_no_pending()?;

        let mut buf = String::new();

        if let Some(name) = name {
            buf.push_str("const ");
            buf.push_str(name);
            buf.push_str(" = ");
        }

        buf.push('(');

        for (i, arg) in args.iter().enumerate() {
            if i != 0 {
                buf.push_str(", ");
            }

            buf.push_str(&self.get_string(arg));
        }

        buf.push_str(") => {\n");
        buf.push_str(&self.get_string(source));
        buf.push_str("}\n");

        if let Some(name) = name {
            buf.push_str(name);
            buf.push('\n');
        }

        let filename = std::ffi::CString::new(file).unwrap_or_default();

        let function = unsafe {
            sys::JS_Eval(
                self.context,
                buf.as_ptr().cast(),
                buf.len(),
                filename.as_ptr(),
                sys::JS_EVAL_TYPE_GLOBAL,
            )
        };

        if sys::is_exception(function) {
            return Err(self.surface_exception());
        }

        Ok(self.root(function))
    }

    /// Defines a class: a constructor function dispatching to `constructor`
    /// plus instance properties on the prototype and static properties on
    /// the constructor, split by the `STATIC` attribute bit.
    pub fn define_class(
        &self,
        _name: &str,
        constructor: impl Fn(&Env, &CallbackInfo) -> Option<Value> + 'static,
        data: *mut c_void,
        properties: Vec<PropertyDescriptor>,
    ) -> Result<Value> {
        self.check_no_pending()?;

        let class = unsafe {
            let callback = Box::into_raw(Box::new(Callback {
                cb: Box::new(constructor),
                data,
            }));

            let mut external =
                sys::JS_NewObjectClass(self.context, self.classes.constructor as i32);

            sys::JS_SetOpaque(external, callback as *mut c_void);

            let class =
                sys::JS_NewCFunctionData(self.context, on_constructor_call, 0, 0, 1, &mut external);

            sys::JS_SetConstructorBit(self.context, class, true);

            let prototype = sys::JS_NewObject(self.context);

            sys::JS_SetConstructor(self.context, class, prototype);

            let class = self.root(class);

            let mut instance = Vec::new();
            let mut statics = Vec::new();

            for property in properties {
                if property.attributes.contains(PropertyAttributes::STATIC) {
                    statics.push(property);
                } else {
                    instance.push(property);
                }
            }

            if !instance.is_empty() {
                let prototype = Value::from_raw(prototype);

                self.define_properties(&prototype, instance)?;
            }

            if !statics.is_empty() {
                self.define_properties(&class, statics)?;
            }

            sys::free_value(self.context, external);
            sys::free_value(self.context, prototype);

            class
        };

        Ok(class)
    }

    /// Unpacks up to `capacity` arguments into rooted wrappers, padding
    /// missing slots with `undefined`.
    pub fn get_callback_info(&self, info: &CallbackInfo, capacity: usize) -> CallArgs {
        let argc = info.argc as usize;

        let mut args = Vec::with_capacity(capacity);

        for i in 0..capacity {
            if i < argc {
                let raw = unsafe { sys::dup(self.context, *info.argv.add(i)) };

                args.push(self.root(raw));
            } else {
                // One wrapper per slot; sharing would alias host mutations.
                args.push(self.root(sys::undefined()));
            }
        }

        let receiver = {
            let raw = unsafe { sys::dup(self.context, info.receiver) };

            self.root(raw)
        };

        CallArgs {
            args,
            argc,
            receiver,
            data: unsafe { (*info.callback).data },
        }
    }

    /// The `new.target` of a constructor call; `null` for plain calls.
    pub fn get_new_target(&self, info: &CallbackInfo) -> Value {
        let raw = unsafe { sys::dup(self.context, info.new_target) };

        self.root(raw)
    }

    /// Defines `properties` on `object`.
    pub fn define_properties(
        &self,
        object: &Value,
        properties: Vec<PropertyDescriptor>,
    ) -> Result<()> {
        self.check_no_pending()?;

        for property in properties {
            let mut flags = sys::JS_PROP_HAS_WRITABLE
                | sys::JS_PROP_HAS_ENUMERABLE
                | sys::JS_PROP_HAS_CONFIGURABLE;

            let accessor = property.getter.is_some() || property.setter.is_some();

            if property.attributes.contains(PropertyAttributes::WRITABLE) || accessor {
                flags |= sys::JS_PROP_WRITABLE;
            }

            if property.attributes.contains(PropertyAttributes::ENUMERABLE) {
                flags |= sys::JS_PROP_ENUMERABLE;
            }

            if property
                .attributes
                .contains(PropertyAttributes::CONFIGURABLE)
            {
                flags |= sys::JS_PROP_CONFIGURABLE;
            }

            let mut value = sys::undefined();
            let mut getter = sys::undefined();
            let mut setter = sys::undefined();

            if accessor {
                if let Some(cb) = property.getter {
                    flags |= sys::JS_PROP_HAS_GET;

                    getter = self.create_function("fn", cb, property.data)?.raw();
                }

                if let Some(cb) = property.setter {
                    flags |= sys::JS_PROP_HAS_SET;

                    setter = self.create_function("fn", cb, property.data)?.raw();
                }
            } else if let Some(cb) = property.method {
                flags |= sys::JS_PROP_HAS_VALUE;

                value = self.create_function("fn", cb, property.data)?.raw();
            } else {
                flags |= sys::JS_PROP_HAS_VALUE;

                value = property
                    .value
                    .as_ref()
                    .map(Value::raw)
                    .unwrap_or(sys::undefined());
            }

            let err = unsafe {
                let atom = sys::Atom::from_value(self.context, property.name.raw());

                sys::JS_DefineProperty(
                    self.context,
                    object.raw(),
                    atom.raw(),
                    value,
                    getter,
                    setter,
                    flags,
                )
            };

            if err < 0 {
                return Err(self.status());
            }
        }

        Ok(())
    }
}
