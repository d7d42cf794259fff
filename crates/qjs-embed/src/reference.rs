//! Strong and weak references to script values.
//!
//! A reference with a positive count holds a strong engine reference and
//! keeps its target alive across scope closes. Dropping the count to zero
//! converts the reference into a weak one: the strong reference is
//! released and a hidden, symbol-keyed external object is installed on the
//! target whose finalizer observes the target's collection. Re-referencing
//! before collection removes the observer and restores the strong
//! reference.
//!
//! Weak conversion only applies to objects and functions; references to
//! primitives behave as strong regardless of count.

use std::{
    cell::Cell,
    os::raw::c_void,
    rc::{Rc, Weak},
};

use crate::{
    env::Env,
    finalizer::FinalizerRecord,
    handle::Value,
    sys,
};

const REFERENCE_SYMBOL_DESCRIPTION: &str = "__native_reference";

pub(crate) struct RefInner {
    value: Cell<sys::JSValue>,
    /// Key of the weak-observer property; `null` for primitives.
    symbol: Cell<sys::JSValue>,
    count: Cell<u32>,
    finalized: Cell<bool>,
}

/// A named handle to a script value that persists across scope closes.
/// Deleted on drop.
pub struct Reference {
    env: Weak<Env>,
    inner: Rc<RefInner>,
}

/// Weak-observer finalizer: records that the target was collected.
fn on_reference_finalize(_env: &Env, data: *mut c_void, _hint: *mut c_void) {
    let inner = unsafe { &*(data as *const RefInner) };

    inner.value.set(sys::null());
    inner.finalized.set(true);
}

impl Env {
    fn is_object_like(&self, raw: sys::JSValue) -> bool {
        sys::is_object(raw) || unsafe { sys::JS_IsFunction(self.context, raw) }
    }

    /// Releases the strong reference and installs the weak observer on the
    /// target.
    fn set_weak_reference(&self, inner: &Rc<RefInner>) {
        if inner.finalized.get() {
            return;
        }

        unsafe {
            let external = self.make_external(FinalizerRecord {
                data: Rc::as_ptr(inner) as *mut c_void,
                cb: Some(on_reference_finalize),
                hint: std::ptr::null_mut(),
            });

            let atom = sys::Atom::from_value(self.context, inner.symbol.get());

            let err = sys::JS_DefinePropertyValue(
                self.context,
                inner.value.get(),
                atom.raw(),
                external,
                0,
            );
            debug_assert!(err >= 0);

            // The observer now holds the only tie to the target; the raw
            // bits stay behind so a later re-reference can duplicate them.
            sys::free_value(self.context, inner.value.get());
        }
    }

    /// Removes the weak observer, restoring a strong engine reference.
    fn clear_weak_reference(&self, inner: &Rc<RefInner>) {
        if inner.finalized.get() {
            return;
        }

        unsafe {
            sys::dup(self.context, inner.value.get());

            let atom = sys::Atom::from_value(self.context, inner.symbol.get());

            let external = sys::JS_GetProperty(self.context, inner.value.get(), atom.raw());

            let record = sys::JS_GetOpaque(external, self.classes.external) as *mut FinalizerRecord;

            sys::free_value(self.context, external);

            if !record.is_null() {
                (*record).cb = None;
            }

            let err = sys::JS_DeleteProperty(self.context, inner.value.get(), atom.raw(), 0);
            debug_assert!(err >= 0);
        }
    }

    /// Creates a reference to `value` with the given initial count.
    /// Allowed even with a pending exception.
    pub fn create_reference(&self, value: &Value, count: u32) -> Reference {
        let raw = unsafe { sys::dup(self.context, value.raw()) };

        let inner = Rc::new(RefInner {
            value: Cell::new(raw),
            symbol: Cell::new(sys::null()),
            count: Cell::new(count),
            finalized: Cell::new(false),
        });

        if self.is_object_like(raw) {
            unsafe {
                let global = sys::JS_GetGlobalObject(self.context);
                let constructor = sys::JS_GetPropertyStr(self.context, global, c"Symbol".as_ptr());

                let mut description = sys::JS_NewStringLen(
                    self.context,
                    REFERENCE_SYMBOL_DESCRIPTION.as_ptr().cast(),
                    REFERENCE_SYMBOL_DESCRIPTION.len(),
                );

                let symbol = sys::JS_Call(self.context, constructor, global, 1, &mut description);

                inner.symbol.set(symbol);

                sys::free_value(self.context, description);
                sys::free_value(self.context, constructor);
                sys::free_value(self.context, global);
            }

            if count == 0 {
                self.set_weak_reference(&inner);
            }
        }

        Reference {
            env: self.weak.clone(),
            inner,
        }
    }

    /// Increments the count; the 0 -> 1 transition restores a strong
    /// reference.
    pub fn reference_ref(&self, reference: &Reference) -> u32 {
        let inner = &reference.inner;

        inner.count.set(inner.count.get() + 1);

        if inner.count.get() == 1 && self.is_object_like(inner.value.get()) {
            self.clear_weak_reference(inner);
        }

        inner.count.get()
    }

    /// Decrements the count; the 1 -> 0 transition converts the reference
    /// into a weak one.
    pub fn reference_unref(&self, reference: &Reference) -> u32 {
        let inner = &reference.inner;

        if inner.count.get() > 0 {
            inner.count.set(inner.count.get() - 1);

            if inner.count.get() == 0 && self.is_object_like(inner.value.get()) {
                self.set_weak_reference(inner);
            }
        }

        inner.count.get()
    }

    /// A fresh rooted wrapper for the target, or `None` once a weak
    /// target has been collected.
    pub fn get_reference_value(&self, reference: &Reference) -> Option<Value> {
        let inner = &reference.inner;

        if inner.finalized.get() {
            return None;
        }

        let raw = unsafe { sys::dup(self.context, inner.value.get()) };

        Some(self.root(raw))
    }

    fn delete_reference(&self, inner: &Rc<RefInner>) {
        if inner.count.get() == 0 && self.is_object_like(inner.value.get()) {
            self.clear_weak_reference(inner);
        }

        unsafe {
            sys::free_value(self.context, inner.value.get());
            sys::free_value(self.context, inner.symbol.get());
        }
    }
}

impl Drop for Reference {
    fn drop(&mut self) {
        let Some(env) = self.env.upgrade() else {
            return;
        };

        // The engine already reclaimed everything the reference points at.
        if env.is_closed() {
            return;
        }

        env.delete_reference(&self.inner);
    }
}
