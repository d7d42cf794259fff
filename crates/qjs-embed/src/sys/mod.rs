//! Low-level engine access.
//!
//! [`bindings`] declares the exported QuickJS symbols; this module adds the
//! helpers the engine header only provides as `static inline` C functions:
//! value literals, tag tests and reference-count bookkeeping. Everything
//! here traffics in raw [`JSValue`]s and is `unsafe` where it touches
//! engine state; the safe embedding API lives a layer up.

pub mod bindings;

pub use bindings::*;

/// A value literal with an immediate (non-heap) payload.
#[inline]
pub const fn mkval(tag: i64, val: i32) -> JSValue {
    JSValue {
        u: JSValueUnion { int32: val },
        tag,
    }
}

#[inline]
pub const fn undefined() -> JSValue {
    mkval(JS_TAG_UNDEFINED, 0)
}

#[inline]
pub const fn null() -> JSValue {
    mkval(JS_TAG_NULL, 0)
}

#[inline]
pub const fn uninitialized() -> JSValue {
    mkval(JS_TAG_UNINITIALIZED, 0)
}

#[inline]
pub const fn exception() -> JSValue {
    mkval(JS_TAG_EXCEPTION, 0)
}

#[inline]
pub const fn new_bool(value: bool) -> JSValue {
    mkval(JS_TAG_BOOL, value as i32)
}

#[inline]
pub const fn new_int32(value: i32) -> JSValue {
    mkval(JS_TAG_INT, value)
}

/// Numbers are canonicalised the way the engine's own constructor does it:
/// doubles that are bit-identical to their `int32` truncation take the
/// integer tag.
#[inline]
pub fn new_float64(value: f64) -> JSValue {
    let as_int = value as i32;
    if (as_int as f64).to_bits() == value.to_bits() {
        return mkval(JS_TAG_INT, as_int);
    }

    JSValue {
        u: JSValueUnion { float64: value },
        tag: JS_TAG_FLOAT64,
    }
}

#[inline]
pub fn new_uint32(value: u32) -> JSValue {
    if value <= i32::MAX as u32 {
        new_int32(value as i32)
    } else {
        new_float64(value as f64)
    }
}

#[inline]
pub fn new_int64(value: i64) -> JSValue {
    if let Ok(value) = i32::try_from(value) {
        new_int32(value)
    } else {
        new_float64(value as f64)
    }
}

#[inline]
pub fn tag(value: JSValue) -> i64 {
    value.tag
}

/// The heap pointer of a reference-counted value.
#[inline]
pub fn ptr(value: JSValue) -> *mut std::os::raw::c_void {
    unsafe { value.u.ptr }
}

#[inline]
pub fn is_undefined(value: JSValue) -> bool {
    value.tag == JS_TAG_UNDEFINED
}

#[inline]
pub fn is_null(value: JSValue) -> bool {
    value.tag == JS_TAG_NULL
}

#[inline]
pub fn is_uninitialized(value: JSValue) -> bool {
    value.tag == JS_TAG_UNINITIALIZED
}

#[inline]
pub fn is_bool(value: JSValue) -> bool {
    value.tag == JS_TAG_BOOL
}

#[inline]
pub fn is_number(value: JSValue) -> bool {
    value.tag == JS_TAG_INT || value.tag == JS_TAG_FLOAT64
}

#[inline]
pub fn is_bigint(value: JSValue) -> bool {
    value.tag == JS_TAG_BIG_INT
}

#[inline]
pub fn is_string(value: JSValue) -> bool {
    value.tag == JS_TAG_STRING
}

#[inline]
pub fn is_symbol(value: JSValue) -> bool {
    value.tag == JS_TAG_SYMBOL
}

#[inline]
pub fn is_object(value: JSValue) -> bool {
    value.tag == JS_TAG_OBJECT
}

#[inline]
pub fn is_exception(value: JSValue) -> bool {
    value.tag == JS_TAG_EXCEPTION
}

/// All reference-counted tags are negative.
#[inline]
fn has_ref_count(value: JSValue) -> bool {
    value.tag < 0
}

/// Takes an additional engine reference on `value` and returns it.
///
/// # Safety
/// `value` must be live in the context's runtime.
#[inline]
pub unsafe fn dup(_ctx: *mut JSContext, value: JSValue) -> JSValue {
    if has_ref_count(value) {
        let header = ptr(value) as *mut JSRefCountHeader;
        (*header).ref_count += 1;
    }

    value
}

/// Releases one engine reference on `value`.
///
/// # Safety
/// `value` must hold a reference the caller owns.
#[inline]
pub unsafe fn free_value(ctx: *mut JSContext, value: JSValue) {
    if has_ref_count(value) {
        JS_FreeValue(ctx, value);
    }
}

/// Like [`free_value`], for paths that only have the runtime at hand
/// (class finalizers).
///
/// # Safety
/// `value` must hold a reference the caller owns.
#[inline]
pub unsafe fn free_value_rt(rt: *mut JSRuntime, value: JSValue) {
    if has_ref_count(value) {
        JS_FreeValueRT(rt, value);
    }
}

/// Interned-string handle scoped to a context. Frees the atom on drop.
pub struct Atom {
    ctx: *mut JSContext,
    raw: JSAtom,
}

impl Atom {
    /// # Safety
    /// `ctx` must outlive the returned guard.
    pub unsafe fn new(ctx: *mut JSContext, name: &str) -> Atom {
        Atom {
            ctx,
            raw: JS_NewAtomLen(ctx, name.as_ptr().cast(), name.len()),
        }
    }

    /// # Safety
    /// `ctx` must outlive the returned guard.
    pub unsafe fn index(ctx: *mut JSContext, index: u32) -> Atom {
        Atom {
            ctx,
            raw: JS_NewAtomUInt32(ctx, index),
        }
    }

    /// # Safety
    /// `ctx` must outlive the returned guard; `value` must be live.
    pub unsafe fn from_value(ctx: *mut JSContext, value: JSValue) -> Atom {
        Atom {
            ctx,
            raw: JS_ValueToAtom(ctx, value),
        }
    }

    #[inline]
    pub fn raw(&self) -> JSAtom {
        self.raw
    }
}

impl Drop for Atom {
    fn drop(&mut self) {
        unsafe { JS_FreeAtom(self.ctx, self.raw) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_literals_canonicalise() {
        assert_eq!(tag(new_float64(7.0)), JS_TAG_INT);
        assert_eq!(tag(new_float64(7.5)), JS_TAG_FLOAT64);
        // Negative zero is not bit-identical to integer zero.
        assert_eq!(tag(new_float64(-0.0)), JS_TAG_FLOAT64);
        assert_eq!(tag(new_float64(f64::NAN)), JS_TAG_FLOAT64);
    }

    #[test]
    fn uint32_literals_spill_to_float() {
        assert_eq!(tag(new_uint32(1)), JS_TAG_INT);
        assert_eq!(tag(new_uint32(u32::MAX)), JS_TAG_FLOAT64);
    }

    #[test]
    fn immediate_tags() {
        assert!(is_undefined(undefined()));
        assert!(is_null(null()));
        assert!(is_bool(new_bool(true)));
        assert!(is_number(new_int32(-1)));
        assert!(!has_ref_count(new_int32(0)));
    }
}
