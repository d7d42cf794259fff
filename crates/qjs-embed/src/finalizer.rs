//! Native finalizers, wraps and type tags.
//!
//! All three ride on hidden, non-enumerable properties holding instances
//! of the environment's internal classes: a wrap is a single
//! external-class property, additional finalizers chain behind a
//! finalizer-class property, and a type tag is a one-shot tag-class
//! property. The class finalizer fires when the carrying object is
//! collected.

use std::os::raw::c_void;

use crate::{
    env::{env_from_runtime, Env},
    error::Result,
    handle::Value,
    sys,
};

/// A host finalizer: `(env, data, hint)`. Runs when the engine collects
/// the object it was attached to.
pub type FinalizeCallback = fn(&Env, *mut c_void, *mut c_void);

/// Hidden property carrying a wrap (and the weak-reference observer).
pub(crate) const EXTERNAL_PROPERTY: &str = "__native_external";

/// Hidden property carrying the finalizer chain.
const FINALIZER_PROPERTY: &str = "__native_finalizer";

/// Hidden property carrying the type tag.
const TYPE_TAG_PROPERTY: &str = "__native_type_tag";

/// `(data, callback, hint)`. A cancelled record keeps its data but drops
/// the callback.
pub(crate) struct FinalizerRecord {
    pub(crate) data: *mut c_void,
    pub(crate) cb: Option<FinalizeCallback>,
    pub(crate) hint: *mut c_void,
}

struct FinalizerNode {
    record: FinalizerRecord,
    next: *mut FinalizerNode,
}

/// A 128-bit tag attached at most once per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTag {
    pub lower: u64,
    pub upper: u64,
}

pub(crate) unsafe extern "C" fn on_external_finalize(rt: *mut sys::JSRuntime, value: sys::JSValue) {
    let env = env_from_runtime(rt);

    let record = sys::JS_GetOpaque(value, env.classes.external) as *mut FinalizerRecord;
    let record = Box::from_raw(record);

    if let Some(cb) = record.cb {
        cb(env, record.data, record.hint);
    }
}

pub(crate) unsafe extern "C" fn on_finalizer_finalize(
    rt: *mut sys::JSRuntime,
    value: sys::JSValue,
) {
    let env = env_from_runtime(rt);

    let mut next = sys::JS_GetOpaque(value, env.classes.finalizer) as *mut FinalizerNode;

    // Chain order is reverse attachment order.
    while !next.is_null() {
        let node = Box::from_raw(next);

        if let Some(cb) = node.record.cb {
            cb(env, node.record.data, node.record.hint);
        }

        next = node.next;
    }
}

pub(crate) unsafe extern "C" fn on_type_tag_finalize(rt: *mut sys::JSRuntime, value: sys::JSValue) {
    let env = env_from_runtime(rt);

    let tag = sys::JS_GetOpaque(value, env.classes.type_tag) as *mut TypeTag;

    drop(Box::from_raw(tag));
}

impl Env {
    /// Builds an external-class object owning `record`.
    pub(crate) unsafe fn make_external(&self, record: FinalizerRecord) -> sys::JSValue {
        let external = sys::JS_NewObjectClass(self.context, self.classes.external as i32);

        sys::JS_SetOpaque(external, Box::into_raw(Box::new(record)) as *mut c_void);

        external
    }

    /// Creates an external value carrying `data`; `cb` runs at collection.
    pub fn create_external(
        &self,
        data: *mut c_void,
        cb: Option<FinalizeCallback>,
        hint: *mut c_void,
    ) -> Value {
        let external = unsafe { self.make_external(FinalizerRecord { data, cb, hint }) };

        self.root(external)
    }

    /// The data word of an external value.
    pub fn get_value_external(&self, value: &Value) -> *mut c_void {
        let record =
            unsafe { sys::JS_GetOpaque(value.raw(), self.classes.external) } as *mut FinalizerRecord;

        if record.is_null() {
            return std::ptr::null_mut();
        }

        unsafe { (*record).data }
    }

    /// Attaches native `data` to `object` with a finalizer that runs
    /// `cb(env, data, hint)` when the object is collected. An object holds
    /// at most one wrap.
    pub fn wrap(
        &self,
        object: &Value,
        data: *mut c_void,
        cb: Option<FinalizeCallback>,
        hint: *mut c_void,
    ) -> Result<()> {
        self.check_no_pending()?;

        unsafe {
            let external = self.make_external(FinalizerRecord { data, cb, hint });

            let atom = sys::Atom::new(self.context, EXTERNAL_PROPERTY);

            let err =
                sys::JS_DefinePropertyValue(self.context, object.raw(), atom.raw(), external, 0);

            if err < 0 {
                return Err(self.status());
            }
        }

        Ok(())
    }

    /// Reads the data word installed by [`Env::wrap`].
    pub fn unwrap(&self, object: &Value) -> Result<*mut c_void> {
        self.check_no_pending()?;

        unsafe {
            let atom = sys::Atom::new(self.context, EXTERNAL_PROPERTY);

            let external = sys::JS_GetProperty(self.context, object.raw(), atom.raw());

            let record = sys::JS_GetOpaque(external, self.classes.external) as *mut FinalizerRecord;

            sys::free_value(self.context, external);

            if record.is_null() {
                self.throw_error(None, "Object is not wrapped")?;

                return Err(self.status());
            }

            Ok((*record).data)
        }
    }

    /// Reads the wrapped data word, cancels the finalizer, and removes the
    /// wrap.
    pub fn remove_wrap(&self, object: &Value) -> Result<*mut c_void> {
        self.check_no_pending()?;

        unsafe {
            let atom = sys::Atom::new(self.context, EXTERNAL_PROPERTY);

            let external = sys::JS_GetProperty(self.context, object.raw(), atom.raw());

            let record = sys::JS_GetOpaque(external, self.classes.external) as *mut FinalizerRecord;

            sys::free_value(self.context, external);

            if record.is_null() {
                self.throw_error(None, "Object is not wrapped")?;

                return Err(self.status());
            }

            (*record).cb = None;

            let data = (*record).data;

            let err = sys::JS_DeleteProperty(self.context, object.raw(), atom.raw(), 0);

            if err < 0 {
                return Err(self.status());
            }

            Ok(data)
        }
    }

    /// Attaches one of possibly many finalizers to `object`. At
    /// collection, finalizers run in reverse attachment order.
    pub fn add_finalizer(
        &self,
        object: &Value,
        data: *mut c_void,
        cb: Option<FinalizeCallback>,
        hint: *mut c_void,
    ) -> Result<()> {
        unsafe {
            let atom = sys::Atom::new(self.context, FINALIZER_PROPERTY);

            let external = if sys::JS_HasProperty(self.context, object.raw(), atom.raw()) == 1 {
                sys::JS_GetProperty(self.context, object.raw(), atom.raw())
            } else {
                let external = sys::JS_NewObjectClass(self.context, self.classes.finalizer as i32);

                sys::JS_SetOpaque(external, std::ptr::null_mut());

                let err = sys::JS_DefinePropertyValue(
                    self.context,
                    object.raw(),
                    atom.raw(),
                    external,
                    0,
                );
                debug_assert!(err >= 0);

                sys::dup(self.context, external)
            };

            let node = Box::into_raw(Box::new(FinalizerNode {
                record: FinalizerRecord { data, cb, hint },
                next: sys::JS_GetOpaque(external, self.classes.finalizer) as *mut FinalizerNode,
            }));

            sys::JS_SetOpaque(external, node as *mut c_void);

            sys::free_value(self.context, external);
        }

        Ok(())
    }

    /// Tags `object`. Fails if the object already carries a tag.
    pub fn add_type_tag(&self, object: &Value, tag: &TypeTag) -> Result<()> {
        self.check_no_pending()?;

        unsafe {
            let atom = sys::Atom::new(self.context, TYPE_TAG_PROPERTY);

            if sys::JS_HasProperty(self.context, object.raw(), atom.raw()) == 1 {
                self.throw_error(None, "Object is already type tagged")?;

                return Err(self.status());
            }

            let external = sys::JS_NewObjectClass(self.context, self.classes.type_tag as i32);

            sys::JS_SetOpaque(external, Box::into_raw(Box::new(*tag)) as *mut c_void);

            let err =
                sys::JS_DefinePropertyValue(self.context, object.raw(), atom.raw(), external, 0);
            debug_assert!(err >= 0);
        }

        Ok(())
    }

    /// Whether `object` carries exactly the given tag.
    pub fn check_type_tag(&self, object: &Value, tag: &TypeTag) -> Result<bool> {
        self.check_no_pending()?;

        unsafe {
            let atom = sys::Atom::new(self.context, TYPE_TAG_PROPERTY);

            if sys::JS_HasProperty(self.context, object.raw(), atom.raw()) != 1 {
                return Ok(false);
            }

            let external = sys::JS_GetProperty(self.context, object.raw(), atom.raw());

            let existing = sys::JS_GetOpaque(external, self.classes.type_tag) as *const TypeTag;

            sys::free_value(self.context, external);

            Ok(!existing.is_null() && *existing == *tag)
        }
    }
}
