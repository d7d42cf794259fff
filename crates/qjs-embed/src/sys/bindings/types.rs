#![allow(non_camel_case_types, non_snake_case, clippy::upper_case_acronyms)]

use std::os::raw::{c_char, c_int, c_void};

/// Opaque engine runtime. One per environment.
#[repr(C)]
pub struct JSRuntime {
    _unused: [u8; 0],
}

/// Opaque execution context. One per environment.
#[repr(C)]
pub struct JSContext {
    _unused: [u8; 0],
}

/// Opaque compiled-module record.
#[repr(C)]
pub struct JSModuleDef {
    _unused: [u8; 0],
}

pub type JSAtom = u32;
pub type JSClassID = u32;

#[repr(C)]
#[derive(Copy, Clone)]
pub union JSValueUnion {
    pub int32: i32,
    pub float64: f64,
    pub ptr: *mut c_void,
}

/// An engine value slot. Sixteen bytes, passed and returned by value.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct JSValue {
    pub u: JSValueUnion,
    pub tag: i64,
}

/// Header shared by all reference-counted engine cells. The tag of a
/// `JSValue` is negative exactly when its pointer leads with this header.
#[repr(C)]
pub struct JSRefCountHeader {
    pub ref_count: c_int,
}

// Value tags. These mirror the engine's tag enum; all reference-counted
// tags are negative.
pub const JS_TAG_BIG_INT: i64 = -9;
pub const JS_TAG_SYMBOL: i64 = -8;
pub const JS_TAG_STRING: i64 = -7;
pub const JS_TAG_MODULE: i64 = -3;
pub const JS_TAG_FUNCTION_BYTECODE: i64 = -2;
pub const JS_TAG_OBJECT: i64 = -1;
pub const JS_TAG_INT: i64 = 0;
pub const JS_TAG_BOOL: i64 = 1;
pub const JS_TAG_NULL: i64 = 2;
pub const JS_TAG_UNDEFINED: i64 = 3;
pub const JS_TAG_UNINITIALIZED: i64 = 4;
pub const JS_TAG_CATCH_OFFSET: i64 = 5;
pub const JS_TAG_EXCEPTION: i64 = 6;
pub const JS_TAG_FLOAT64: i64 = 7;

// JS_Eval modes and flags.
pub const JS_EVAL_TYPE_GLOBAL: c_int = 0;
pub const JS_EVAL_TYPE_MODULE: c_int = 1;
pub const JS_EVAL_FLAG_COMPILE_ONLY: c_int = 1 << 5;

// JS_GetOwnPropertyNames filters.
pub const JS_GPN_STRING_MASK: c_int = 1 << 0;
pub const JS_GPN_SYMBOL_MASK: c_int = 1 << 1;
pub const JS_GPN_ENUM_ONLY: c_int = 1 << 4;

// Property flags for JS_DefineProperty and friends.
pub const JS_PROP_CONFIGURABLE: c_int = 1 << 0;
pub const JS_PROP_WRITABLE: c_int = 1 << 1;
pub const JS_PROP_ENUMERABLE: c_int = 1 << 2;
pub const JS_PROP_HAS_CONFIGURABLE: c_int = 1 << 8;
pub const JS_PROP_HAS_WRITABLE: c_int = 1 << 9;
pub const JS_PROP_HAS_ENUMERABLE: c_int = 1 << 10;
pub const JS_PROP_HAS_GET: c_int = 1 << 11;
pub const JS_PROP_HAS_SET: c_int = 1 << 12;
pub const JS_PROP_HAS_VALUE: c_int = 1 << 13;

// JS_PromiseState results.
pub const JS_PROMISE_PENDING: c_int = 0;
pub const JS_PROMISE_FULFILLED: c_int = 1;
pub const JS_PROMISE_REJECTED: c_int = 2;

pub type JSClassFinalizer = unsafe extern "C" fn(rt: *mut JSRuntime, val: JSValue);

pub type JSClassGCMark =
    unsafe extern "C" fn(rt: *mut JSRuntime, val: JSValue, mark_func: *mut c_void);

pub type JSClassCall = unsafe extern "C" fn(
    ctx: *mut JSContext,
    func_obj: JSValue,
    this_val: JSValue,
    argc: c_int,
    argv: *mut JSValue,
    flags: c_int,
) -> JSValue;

#[repr(C)]
pub struct JSPropertyEnum {
    pub is_enumerable: bool,
    pub atom: JSAtom,
}

#[repr(C)]
pub struct JSPropertyDescriptor {
    pub flags: c_int,
    pub value: JSValue,
    pub getter: JSValue,
    pub setter: JSValue,
}

#[repr(C)]
pub struct JSClassExoticMethods {
    pub get_own_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            desc: *mut JSPropertyDescriptor,
            obj: JSValue,
            prop: JSAtom,
        ) -> c_int,
    >,
    pub get_own_property_names: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            ptab: *mut *mut JSPropertyEnum,
            plen: *mut u32,
            obj: JSValue,
        ) -> c_int,
    >,
    pub delete_property:
        Option<unsafe extern "C" fn(ctx: *mut JSContext, obj: JSValue, prop: JSAtom) -> c_int>,
    pub define_own_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            this_obj: JSValue,
            prop: JSAtom,
            val: JSValue,
            getter: JSValue,
            setter: JSValue,
            flags: c_int,
        ) -> c_int,
    >,
    pub has_property:
        Option<unsafe extern "C" fn(ctx: *mut JSContext, obj: JSValue, atom: JSAtom) -> c_int>,
    pub get_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            obj: JSValue,
            atom: JSAtom,
            receiver: JSValue,
        ) -> JSValue,
    >,
    pub set_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            obj: JSValue,
            atom: JSAtom,
            value: JSValue,
            receiver: JSValue,
            flags: c_int,
        ) -> c_int,
    >,
}

#[repr(C)]
pub struct JSClassDef {
    pub class_name: *const c_char,
    pub finalizer: Option<JSClassFinalizer>,
    pub gc_mark: Option<JSClassGCMark>,
    pub call: Option<JSClassCall>,
    pub exotic: *mut JSClassExoticMethods,
}

#[repr(C)]
pub struct JSSharedArrayBufferFunctions {
    pub sab_alloc: Option<unsafe extern "C" fn(opaque: *mut c_void, size: usize) -> *mut c_void>,
    pub sab_free: Option<unsafe extern "C" fn(opaque: *mut c_void, ptr: *mut c_void)>,
    pub sab_dup: Option<unsafe extern "C" fn(opaque: *mut c_void, ptr: *mut c_void)>,
    pub sab_opaque: *mut c_void,
}

pub type JSCFunctionData = unsafe extern "C" fn(
    ctx: *mut JSContext,
    this_val: JSValue,
    argc: c_int,
    argv: *mut JSValue,
    magic: c_int,
    func_data: *mut JSValue,
) -> JSValue;

pub type JSModuleInitFunc =
    unsafe extern "C" fn(ctx: *mut JSContext, m: *mut JSModuleDef) -> c_int;

pub type JSModuleNormalizeFunc = unsafe extern "C" fn(
    ctx: *mut JSContext,
    module_base_name: *const c_char,
    module_name: *const c_char,
    opaque: *mut c_void,
) -> *mut c_char;

pub type JSModuleLoaderFunc = unsafe extern "C" fn(
    ctx: *mut JSContext,
    module_name: *const c_char,
    opaque: *mut c_void,
) -> *mut JSModuleDef;

pub type JSHostPromiseRejectionTracker = unsafe extern "C" fn(
    ctx: *mut JSContext,
    promise: JSValue,
    reason: JSValue,
    is_handled: bool,
    opaque: *mut c_void,
);

pub type JSFreeArrayBufferDataFunc =
    unsafe extern "C" fn(rt: *mut JSRuntime, opaque: *mut c_void, ptr: *mut c_void);
