//! Type predicates, coercions, and scalar/string conversion.
//!
//! Predicates are read-only and exception-transparent: they never disturb
//! a pending exception, and brand checks that would raise one of their own
//! swallow it. Scalar extractors are deliberately lossy and infallible,
//! matching the embedding contract. String extraction into caller buffers
//! keeps the legacy convention of null-terminating only when the written
//! count is strictly less than the capacity.

use std::os::raw::{c_char, c_void};

use crate::{
    env::Env,
    error::Result,
    finalizer::FinalizeCallback,
    handle::Value,
    sys,
};

/// The result of [`Env::typeof_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    BigInt,
    String,
    Symbol,
    Function,
    Object,
    /// An object of the environment's external class.
    External,
}

/// Encodings reported by [`Env::get_string_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Utf8,
    Utf16,
}

/// A borrowed view over the engine's UTF-8 representation of a string.
/// Release with [`Env::release_string_view`].
pub struct StringView {
    ptr: *const c_char,
    len: usize,
}

impl StringView {
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.cast(), self.len) }
    }
}

impl Env {
    /// Runs `f`, swallowing any exception it newly raises. Predicates use
    /// this to stay exception-transparent.
    fn quietly<T>(&self, f: impl FnOnce() -> T) -> T {
        let had_exception = self.is_exception_pending();

        let result = f();

        if !had_exception && self.is_exception_pending() {
            let error = unsafe { sys::JS_GetException(self.context) };

            unsafe { sys::free_value(self.context, error) };
        }

        result
    }

    /// Whether `raw` is an instance of the global constructor `name`.
    pub(crate) fn instance_of_global(&self, raw: sys::JSValue, name: &str) -> bool {
        self.quietly(|| unsafe {
            let global = sys::JS_GetGlobalObject(self.context);
            let atom = sys::Atom::new(self.context, name);
            let constructor = sys::JS_GetProperty(self.context, global, atom.raw());

            let result = sys::JS_IsInstanceOf(self.context, raw, constructor);

            sys::free_value(self.context, constructor);
            sys::free_value(self.context, global);

            result == 1
        })
    }

    // Rooted singletons and literals.

    pub fn get_global(&self) -> Value {
        self.root(unsafe { sys::JS_GetGlobalObject(self.context) })
    }

    pub fn get_undefined(&self) -> Value {
        self.root(sys::undefined())
    }

    pub fn get_null(&self) -> Value {
        self.root(sys::null())
    }

    pub fn get_boolean(&self, value: bool) -> Value {
        self.root(sys::new_bool(value))
    }

    pub fn create_int32(&self, value: i32) -> Value {
        self.root(sys::new_int32(value))
    }

    pub fn create_uint32(&self, value: u32) -> Value {
        self.root(sys::new_uint32(value))
    }

    pub fn create_int64(&self, value: i64) -> Value {
        self.root(sys::new_int64(value))
    }

    pub fn create_double(&self, value: f64) -> Value {
        self.root(sys::new_float64(value))
    }

    pub fn create_bigint_int64(&self, value: i64) -> Value {
        self.root(unsafe { sys::JS_NewBigInt64(self.context, value) })
    }

    pub fn create_bigint_uint64(&self, value: u64) -> Value {
        self.root(unsafe { sys::JS_NewBigUint64(self.context, value) })
    }

    pub fn create_object(&self) -> Value {
        self.root(unsafe { sys::JS_NewObject(self.context) })
    }

    pub fn create_array(&self) -> Value {
        self.root(unsafe { sys::JS_NewArray(self.context) })
    }

    pub fn create_array_with_length(&self, len: usize) -> Value {
        let array = unsafe {
            let global = sys::JS_GetGlobalObject(self.context);
            let constructor = sys::JS_GetPropertyStr(self.context, global, c"Array".as_ptr());

            let mut arg = sys::new_uint32(len as u32);

            let array = sys::JS_CallConstructor(self.context, constructor, 1, &mut arg);

            sys::free_value(self.context, constructor);
            sys::free_value(self.context, global);

            array
        };

        self.root(array)
    }

    pub fn create_date(&self, time: f64) -> Value {
        self.root(unsafe { sys::JS_NewDate(self.context, time) })
    }

    pub fn create_symbol(&self, description: Option<&Value>) -> Value {
        let symbol = unsafe {
            let global = sys::JS_GetGlobalObject(self.context);
            let constructor = sys::JS_GetPropertyStr(self.context, global, c"Symbol".as_ptr());

            let mut arg = description.map(Value::raw).unwrap_or(sys::null());

            let symbol = sys::JS_Call(self.context, constructor, global, 1, &mut arg);

            sys::free_value(self.context, constructor);
            sys::free_value(self.context, global);

            symbol
        };

        self.root(symbol)
    }

    // Strings.

    pub fn create_string_utf8(&self, value: &str) -> Value {
        let raw =
            unsafe { sys::JS_NewStringLen(self.context, value.as_ptr().cast(), value.len()) };

        self.root(raw)
    }

    pub fn create_string_utf16le(&self, value: &[u16]) -> Value {
        self.create_string_utf8(&String::from_utf16_lossy(value))
    }

    pub fn create_string_latin1(&self, value: &[u8]) -> Value {
        let decoded: String = value.iter().map(|&byte| byte as char).collect();

        self.create_string_utf8(&decoded)
    }

    /// External string creation. This backend always copies; the finalizer
    /// runs immediately and the returned flag reports the copy.
    pub fn create_external_string_utf8(
        &self,
        value: &str,
        cb: Option<FinalizeCallback>,
        hint: *mut c_void,
    ) -> (Value, bool) {
        let string = self.create_string_utf8(value);

        if let Some(cb) = cb {
            cb(self, value.as_ptr() as *mut c_void, hint);
        }

        (string, true)
    }

    pub fn create_external_string_utf16le(
        &self,
        value: &[u16],
        cb: Option<FinalizeCallback>,
        hint: *mut c_void,
    ) -> (Value, bool) {
        let string = self.create_string_utf16le(value);

        if let Some(cb) = cb {
            cb(self, value.as_ptr() as *mut c_void, hint);
        }

        (string, true)
    }

    pub fn create_external_string_latin1(
        &self,
        value: &[u8],
        cb: Option<FinalizeCallback>,
        hint: *mut c_void,
    ) -> (Value, bool) {
        let string = self.create_string_latin1(value);

        if let Some(cb) = cb {
            cb(self, value.as_ptr() as *mut c_void, hint);
        }

        (string, true)
    }

    pub fn create_property_key_utf8(&self, value: &str) -> Value {
        self.create_string_utf8(value)
    }

    pub fn create_property_key_utf16le(&self, value: &[u16]) -> Value {
        self.create_string_utf16le(value)
    }

    pub fn create_property_key_latin1(&self, value: &[u8]) -> Value {
        self.create_string_latin1(value)
    }

    // Predicates.

    pub fn typeof_value(&self, value: &Value) -> ValueType {
        let raw = value.raw();

        if sys::is_number(raw) {
            ValueType::Number
        } else if sys::is_bigint(raw) {
            ValueType::BigInt
        } else if sys::is_string(raw) {
            ValueType::String
        } else if unsafe { sys::JS_IsFunction(self.context, raw) } {
            ValueType::Function
        } else if sys::is_object(raw) {
            let external =
                unsafe { !sys::JS_GetOpaque(raw, self.classes.external).is_null() };

            if external {
                ValueType::External
            } else {
                ValueType::Object
            }
        } else if sys::is_bool(raw) {
            ValueType::Boolean
        } else if sys::is_symbol(raw) {
            ValueType::Symbol
        } else if sys::is_null(raw) {
            ValueType::Null
        } else {
            ValueType::Undefined
        }
    }

    pub fn is_undefined(&self, value: &Value) -> bool {
        sys::is_undefined(value.raw())
    }

    pub fn is_null(&self, value: &Value) -> bool {
        sys::is_null(value.raw())
    }

    pub fn is_boolean(&self, value: &Value) -> bool {
        sys::is_bool(value.raw())
    }

    pub fn is_number(&self, value: &Value) -> bool {
        sys::is_number(value.raw())
    }

    /// Whether `value` is a whole number within `i32` range.
    pub fn is_int32(&self, value: &Value) -> bool {
        if !sys::is_number(value.raw()) {
            return false;
        }

        let number = self.get_value_double(value);

        number.fract() == 0.0 && number >= i32::MIN as f64 && number <= i32::MAX as f64
    }

    /// Whether `value` is a whole number within `u32` range.
    pub fn is_uint32(&self, value: &Value) -> bool {
        if !sys::is_number(value.raw()) {
            return false;
        }

        let number = self.get_value_double(value);

        number.fract() == 0.0 && number >= 0.0 && number <= u32::MAX as f64
    }

    pub fn is_bigint(&self, value: &Value) -> bool {
        sys::is_bigint(value.raw())
    }

    pub fn is_string(&self, value: &Value) -> bool {
        sys::is_string(value.raw())
    }

    pub fn is_symbol(&self, value: &Value) -> bool {
        sys::is_symbol(value.raw())
    }

    pub fn is_object(&self, value: &Value) -> bool {
        sys::is_object(value.raw())
    }

    pub fn is_function(&self, value: &Value) -> bool {
        unsafe { sys::JS_IsFunction(self.context, value.raw()) }
    }

    /// The engine does not distinguish async functions.
    pub fn is_async_function(&self, _value: &Value) -> bool {
        false
    }

    pub fn is_generator_function(&self, _value: &Value) -> bool {
        false
    }

    pub fn is_generator(&self, _value: &Value) -> bool {
        false
    }

    pub fn is_arguments(&self, _value: &Value) -> bool {
        false
    }

    pub fn is_array(&self, value: &Value) -> bool {
        self.quietly(|| unsafe {
            let global = sys::JS_GetGlobalObject(self.context);
            let constructor = sys::JS_GetPropertyStr(self.context, global, c"Array".as_ptr());
            let is_array = sys::JS_GetPropertyStr(self.context, constructor, c"isArray".as_ptr());

            let mut arg = value.raw();
            let result = sys::JS_Call(self.context, is_array, global, 1, &mut arg);

            let answer = sys::is_bool(result) && sys::JS_ToBool(self.context, result) == 1;

            sys::free_value(self.context, result);
            sys::free_value(self.context, is_array);
            sys::free_value(self.context, constructor);
            sys::free_value(self.context, global);

            answer
        })
    }

    pub fn is_external(&self, value: &Value) -> bool {
        sys::is_object(value.raw())
            && unsafe { !sys::JS_GetOpaque(value.raw(), self.classes.external).is_null() }
    }

    /// Whether [`Env::wrap`](Env::wrap) has attached native data to
    /// `value`.
    pub fn is_wrapped(&self, value: &Value) -> bool {
        if !sys::is_object(value.raw()) {
            return false;
        }

        unsafe {
            let atom = sys::Atom::new(self.context, crate::finalizer::EXTERNAL_PROPERTY);

            sys::JS_HasProperty(self.context, value.raw(), atom.raw()) == 1
        }
    }

    pub fn is_delegate(&self, value: &Value) -> bool {
        sys::is_object(value.raw())
            && unsafe { !sys::JS_GetOpaque(value.raw(), self.classes.delegate).is_null() }
    }

    pub fn is_date(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Date")
    }

    pub fn is_regexp(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "RegExp")
    }

    pub fn is_error(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Error")
    }

    pub fn is_promise(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Promise")
    }

    pub fn is_proxy(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Proxy")
    }

    pub fn is_map(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Map")
    }

    pub fn is_map_iterator(&self, _value: &Value) -> bool {
        false
    }

    pub fn is_set(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Set")
    }

    pub fn is_set_iterator(&self, _value: &Value) -> bool {
        false
    }

    pub fn is_weak_map(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "WeakMap")
    }

    pub fn is_weak_set(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "WeakSet")
    }

    pub fn is_weak_ref(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "WeakRef")
    }

    pub fn is_arraybuffer(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "ArrayBuffer")
    }

    pub fn is_sharedarraybuffer(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "SharedArrayBuffer")
    }

    pub fn is_detached_arraybuffer(&self, value: &Value) -> bool {
        self.quietly(|| {
            let mut len = 0;

            unsafe { sys::JS_GetArrayBuffer(self.context, &mut len, value.raw()).is_null() }
        })
    }

    pub fn is_typedarray(&self, value: &Value) -> bool {
        [
            "Int8Array",
            "Uint8Array",
            "Uint8ClampedArray",
            "Int16Array",
            "Uint16Array",
            "Int32Array",
            "Uint32Array",
            "Float32Array",
            "Float64Array",
            "BigInt64Array",
            "BigUint64Array",
        ]
        .iter()
        .any(|brand| self.instance_of_global(value.raw(), brand))
    }

    pub fn is_int8array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Int8Array")
    }

    pub fn is_uint8array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Uint8Array")
    }

    pub fn is_uint8clampedarray(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Uint8ClampedArray")
    }

    pub fn is_int16array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Int16Array")
    }

    pub fn is_uint16array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Uint16Array")
    }

    pub fn is_int32array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Int32Array")
    }

    pub fn is_uint32array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Uint32Array")
    }

    pub fn is_float16array(&self, _value: &Value) -> bool {
        false
    }

    pub fn is_float32array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Float32Array")
    }

    pub fn is_float64array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "Float64Array")
    }

    pub fn is_bigint64array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "BigInt64Array")
    }

    pub fn is_biguint64array(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "BigUint64Array")
    }

    pub fn is_dataview(&self, value: &Value) -> bool {
        self.instance_of_global(value.raw(), "DataView")
    }

    pub fn is_module_namespace(&self, _value: &Value) -> bool {
        false
    }

    pub fn strict_equals(&self, a: &Value, b: &Value) -> bool {
        unsafe { sys::JS_IsStrictEqual(self.context, a.raw(), b.raw()) }
    }

    pub fn instanceof(&self, object: &Value, constructor: &Value) -> Result<bool> {
        self.check_no_pending()?;

        let result =
            unsafe { sys::JS_IsInstanceOf(self.context, object.raw(), constructor.raw()) };

        if result < 0 {
            return Err(self.status());
        }

        Ok(result == 1)
    }

    // Scalar extractors. Lossy by contract: out-of-range and fractional
    // inputs coerce silently.

    pub fn get_value_bool(&self, value: &Value) -> bool {
        unsafe { sys::JS_ToBool(self.context, value.raw()) == 1 }
    }

    pub fn get_value_int32(&self, value: &Value) -> i32 {
        let mut result = 0;

        unsafe { sys::JS_ToInt32(self.context, &mut result, value.raw()) };

        result
    }

    pub fn get_value_uint32(&self, value: &Value) -> u32 {
        self.get_value_int32(value) as u32
    }

    pub fn get_value_int64(&self, value: &Value) -> i64 {
        let mut result = 0;

        unsafe { sys::JS_ToInt64(self.context, &mut result, value.raw()) };

        result
    }

    pub fn get_value_double(&self, value: &Value) -> f64 {
        let mut result = 0.0;

        unsafe { sys::JS_ToFloat64(self.context, &mut result, value.raw()) };

        result
    }

    /// The second element reports losslessness; this backend always
    /// reports `true`.
    pub fn get_value_bigint_int64(&self, value: &Value) -> (i64, bool) {
        let mut result = 0;

        unsafe { sys::JS_ToBigInt64(self.context, &mut result, value.raw()) };

        (result, true)
    }

    pub fn get_value_bigint_uint64(&self, value: &Value) -> (u64, bool) {
        let (result, lossless) = self.get_value_bigint_int64(value);

        (result as u64, lossless)
    }

    pub fn get_value_date(&self, value: &Value) -> f64 {
        self.get_value_double(value)
    }

    // String extractors.

    /// The string as owned UTF-8.
    pub fn get_string(&self, value: &Value) -> String {
        let mut len = 0;

        unsafe {
            let cstr = sys::JS_ToCStringLen2(self.context, &mut len, value.raw(), false);

            let bytes = std::slice::from_raw_parts(cstr.cast::<u8>(), len);
            let string = String::from_utf8_lossy(bytes).into_owned();

            sys::JS_FreeCString(self.context, cstr);

            string
        }
    }

    /// Legacy buffer extraction: with no buffer, reports the required
    /// length; otherwise writes `min(required, capacity)` bytes and
    /// null-terminates only when the written count is strictly less than
    /// the capacity. Returns the reported or written count.
    pub fn get_value_string_utf8(&self, value: &Value, buf: Option<&mut [u8]>) -> usize {
        let mut len = 0;

        unsafe {
            let cstr = sys::JS_ToCStringLen2(self.context, &mut len, value.raw(), false);
            let bytes = std::slice::from_raw_parts(cstr.cast::<u8>(), len);

            let result = match buf {
                None => len,
                Some(buf) if buf.is_empty() => 0,
                Some(buf) => {
                    let written = len.min(buf.len());

                    buf[..written].copy_from_slice(&bytes[..written]);

                    if written < buf.len() {
                        buf[written] = 0;
                    }

                    written
                }
            };

            sys::JS_FreeCString(self.context, cstr);

            result
        }
    }

    /// UTF-16 variant of [`Env::get_value_string_utf8`]; counts are in
    /// code units.
    pub fn get_value_string_utf16le(&self, value: &Value, buf: Option<&mut [u16]>) -> usize {
        let units: Vec<u16> = self.get_string(value).encode_utf16().collect();

        match buf {
            None => units.len(),
            Some(buf) if buf.is_empty() => 0,
            Some(buf) => {
                let written = units.len().min(buf.len());

                buf[..written].copy_from_slice(&units[..written]);

                if written < buf.len() {
                    buf[written] = 0;
                }

                written
            }
        }
    }

    /// Latin-1 variant; characters outside Latin-1 degrade to `?`.
    pub fn get_value_string_latin1(&self, value: &Value, buf: Option<&mut [u8]>) -> usize {
        let bytes: Vec<u8> = self
            .get_string(value)
            .chars()
            .map(|c| if (c as u32) <= 0xff { c as u8 } else { b'?' })
            .collect();

        match buf {
            None => bytes.len(),
            Some(buf) if buf.is_empty() => 0,
            Some(buf) => {
                let written = bytes.len().min(buf.len());

                buf[..written].copy_from_slice(&bytes[..written]);

                if written < buf.len() {
                    buf[written] = 0;
                }

                written
            }
        }
    }

    /// Borrows the engine's UTF-8 buffer for `string`.
    pub fn get_string_view(&self, string: &Value) -> (StringEncoding, StringView) {
        let mut len = 0;

        let ptr = unsafe { sys::JS_ToCStringLen2(self.context, &mut len, string.raw(), false) };

        (StringEncoding::Utf8, StringView { ptr, len })
    }

    pub fn release_string_view(&self, view: StringView) {
        unsafe { sys::JS_FreeCString(self.context, view.ptr) };
    }

    // Coercions.

    pub fn coerce_to_boolean(&self, value: &Value) -> Value {
        let result = unsafe { sys::JS_ToBool(self.context, value.raw()) };

        self.root(sys::new_bool(result == 1))
    }

    pub fn coerce_to_number(&self, value: &Value) -> Result<Value> {
        self.check_no_pending()?;

        let mut result = 0.0;

        let err = unsafe { sys::JS_ToFloat64(self.context, &mut result, value.raw()) };

        if err < 0 {
            return Err(self.status());
        }

        Ok(self.root(sys::new_float64(result)))
    }

    pub fn coerce_to_string(&self, value: &Value) -> Result<Value> {
        self.check_no_pending()?;

        let string = unsafe { sys::JS_ToString(self.context, value.raw()) };

        if sys::is_exception(string) {
            return Err(self.status());
        }

        Ok(self.root(string))
    }

    pub fn coerce_to_object(&self, value: &Value) -> Result<Value> {
        self.check_no_pending()?;

        if sys::is_null(value.raw()) || sys::is_undefined(value.raw()) {
            self.throw_type_error(None, "Cannot convert undefined or null to object")?;

            return Err(self.status());
        }

        let object = unsafe {
            let global = sys::JS_GetGlobalObject(self.context);
            let constructor = sys::JS_GetPropertyStr(self.context, global, c"Object".as_ptr());

            let mut arg = value.raw();
            let object = sys::JS_Call(self.context, constructor, global, 1, &mut arg);

            sys::free_value(self.context, constructor);
            sys::free_value(self.context, global);

            object
        };

        if sys::is_exception(object) {
            return Err(self.status());
        }

        Ok(self.root(object))
    }
}
