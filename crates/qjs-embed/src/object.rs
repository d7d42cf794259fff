//! Property access by key, name and element index.
//!
//! Property reads and writes can trip getters, setters and proxy traps, so
//! every operation here runs under the depth bracket: microtasks drain
//! when the operation is outermost, and failures at the outermost depth go
//! through the uncaught-exception path.

use crate::{env::Env, error::Result, handle::Value, sys};

impl Env {
    pub fn get_property(&self, object: &Value, key: &Value) -> Result<Value> {
        self.check_no_pending()?;

        let value = self.with_depth(|| unsafe {
            let atom = sys::Atom::from_value(self.context, key.raw());

            sys::JS_GetProperty(self.context, object.raw(), atom.raw())
        });

        if sys::is_exception(value) {
            return Err(self.surface_exception());
        }

        Ok(self.root(value))
    }

    pub fn has_property(&self, object: &Value, key: &Value) -> Result<bool> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::from_value(self.context, key.raw());

            sys::JS_HasProperty(self.context, object.raw(), atom.raw())
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(success == 1)
    }

    pub fn has_own_property(&self, object: &Value, key: &Value) -> Result<bool> {
        self.has_property(object, key)
    }

    pub fn set_property(&self, object: &Value, key: &Value, value: &Value) -> Result<()> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::from_value(self.context, key.raw());

            sys::JS_SetProperty(
                self.context,
                object.raw(),
                atom.raw(),
                sys::dup(self.context, value.raw()),
            )
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(())
    }

    pub fn delete_property(&self, object: &Value, key: &Value) -> Result<bool> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::from_value(self.context, key.raw());

            sys::JS_DeleteProperty(self.context, object.raw(), atom.raw(), 0)
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(success == 1)
    }

    pub fn get_named_property(&self, object: &Value, name: &str) -> Result<Value> {
        self.check_no_pending()?;

        let value = self.with_depth(|| unsafe {
            let atom = sys::Atom::new(self.context, name);

            sys::JS_GetProperty(self.context, object.raw(), atom.raw())
        });

        if sys::is_exception(value) {
            return Err(self.surface_exception());
        }

        Ok(self.root(value))
    }

    pub fn has_named_property(&self, object: &Value, name: &str) -> Result<bool> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::new(self.context, name);

            sys::JS_HasProperty(self.context, object.raw(), atom.raw())
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(success == 1)
    }

    pub fn set_named_property(&self, object: &Value, name: &str, value: &Value) -> Result<()> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::new(self.context, name);

            sys::JS_SetProperty(
                self.context,
                object.raw(),
                atom.raw(),
                sys::dup(self.context, value.raw()),
            )
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(())
    }

    pub fn delete_named_property(&self, object: &Value, name: &str) -> Result<bool> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::new(self.context, name);

            sys::JS_DeleteProperty(self.context, object.raw(), atom.raw(), 0)
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(success == 1)
    }

    pub fn get_element(&self, object: &Value, index: u32) -> Result<Value> {
        self.check_no_pending()?;

        let value = self.with_depth(|| unsafe {
            sys::JS_GetPropertyUint32(self.context, object.raw(), index)
        });

        if sys::is_exception(value) {
            return Err(self.surface_exception());
        }

        Ok(self.root(value))
    }

    pub fn has_element(&self, object: &Value, index: u32) -> Result<bool> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::index(self.context, index);

            sys::JS_HasProperty(self.context, object.raw(), atom.raw())
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(success == 1)
    }

    pub fn set_element(&self, object: &Value, index: u32, value: &Value) -> Result<()> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            sys::JS_SetPropertyUint32(
                self.context,
                object.raw(),
                index,
                sys::dup(self.context, value.raw()),
            )
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(())
    }

    pub fn delete_element(&self, object: &Value, index: u32) -> Result<bool> {
        self.check_no_pending()?;

        let success = self.with_depth(|| unsafe {
            let atom = sys::Atom::index(self.context, index);

            sys::JS_DeleteProperty(self.context, object.raw(), atom.raw(), 0)
        });

        if success < 0 {
            return Err(self.surface_exception());
        }

        Ok(success == 1)
    }

    /// The object's own enumerable string-keyed property names, as an
    /// array.
    pub fn get_property_names(&self, object: &Value) -> Result<Value> {
        self.check_no_pending()?;

        let mut properties: *mut sys::JSPropertyEnum = std::ptr::null_mut();
        let mut len = 0u32;

        let err = self.with_depth(|| unsafe {
            sys::JS_GetOwnPropertyNames(
                self.context,
                &mut properties,
                &mut len,
                object.raw(),
                sys::JS_GPN_ENUM_ONLY | sys::JS_GPN_STRING_MASK,
            )
        });

        if err < 0 {
            return Err(self.surface_exception());
        }

        let array = unsafe { sys::JS_NewArray(self.context) };

        let mut failed = false;

        for i in 0..len {
            unsafe {
                let entry = properties.add(i as usize);

                if !failed {
                    let name = sys::JS_AtomToValue(self.context, (*entry).atom);

                    if sys::JS_SetPropertyUint32(self.context, array, i, name) < 0 {
                        failed = true;
                    }
                }

                sys::JS_FreeAtom(self.context, (*entry).atom);
            }
        }

        unsafe { sys::js_free(self.context, properties.cast()) };

        if failed {
            unsafe { sys::free_value(self.context, array) };

            return Err(self.status());
        }

        Ok(self.root(array))
    }

    pub fn get_prototype(&self, object: &Value) -> Value {
        let prototype = unsafe { sys::JS_GetPrototype(self.context, object.raw()) };

        self.root(prototype)
    }

    pub fn get_array_length(&self, array: &Value) -> u32 {
        unsafe {
            let length = sys::JS_GetPropertyStr(self.context, array.raw(), c"length".as_ptr());

            let mut result = 0i32;
            sys::JS_ToInt32(self.context, &mut result, length);

            sys::free_value(self.context, length);

            result as u32
        }
    }

    /// Reads up to `len` elements starting at `offset` into rooted
    /// wrappers, stopping at the array's length.
    pub fn get_array_elements(
        &self,
        array: &Value,
        len: usize,
        offset: usize,
    ) -> Result<Vec<Value>> {
        self.check_no_pending()?;

        self.depth.set(self.depth.get() + 1);

        let length = self.get_array_length(array) as usize;

        let mut elements = Vec::new();

        for index in (offset..length).take(len) {
            let value =
                unsafe { sys::JS_GetPropertyUint32(self.context, array.raw(), index as u32) };

            if sys::is_exception(value) {
                if self.depth.get() == 1 {
                    self.run_microtasks();
                }

                self.depth.set(self.depth.get() - 1);

                return Err(self.surface_exception());
            }

            elements.push(self.root(value));
        }

        if self.depth.get() == 1 {
            self.run_microtasks();
        }

        self.depth.set(self.depth.get() - 1);

        Ok(elements)
    }

    /// Writes `elements` into the array starting at `offset`.
    pub fn set_array_elements(
        &self,
        array: &Value,
        elements: &[Value],
        offset: usize,
    ) -> Result<()> {
        self.check_no_pending()?;

        let result = self.with_depth(|| {
            for (i, element) in elements.iter().enumerate() {
                let success = unsafe {
                    sys::JS_SetPropertyUint32(
                        self.context,
                        array.raw(),
                        (offset + i) as u32,
                        sys::dup(self.context, element.raw()),
                    )
                };

                if success < 0 {
                    return Err(());
                }
            }

            Ok(())
        });

        if result.is_err() {
            return Err(self.surface_exception());
        }

        Ok(())
    }
}
