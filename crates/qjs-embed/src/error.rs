//! Failure statuses and the exception lifecycle.
//!
//! The embedding contract distinguishes two failure shapes: the engine is
//! holding a pending exception the caller must collect, or the operation
//! failed after the exception was already consumed (typically delivered to
//! the uncaught-exception callback). Both travel as [`Error`]; hosts follow
//! an `Err` with [`Env::is_exception_pending`] and
//! [`Env::get_and_clear_last_exception`].

use crate::{env::Env, handle::Value, sys};

/// Why an engine operation could not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The engine holds a pending exception. No further script work may
    /// happen until the caller retrieves or clears it.
    #[error("pending JavaScript exception")]
    PendingException,

    /// The operation failed and the exception has already been consumed,
    /// usually by the uncaught-exception callback.
    #[error("uncaught JavaScript exception")]
    UncaughtException,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Env {
    /// The status to report for the failure currently recorded in the
    /// engine.
    pub(crate) fn status(&self) -> Error {
        if unsafe { sys::JS_HasException(self.context) } {
            Error::PendingException
        } else {
            Error::UncaughtException
        }
    }

    /// Precondition shared by every API that may run script: refuse to
    /// proceed while an exception is pending.
    pub(crate) fn check_no_pending(&self) -> Result<()> {
        if unsafe { sys::JS_HasException(self.context) } {
            Err(self.status())
        } else {
            Ok(())
        }
    }

    /// Constructs a raw error value without rooting it. The caller owns the
    /// returned engine reference.
    pub(crate) unsafe fn make_error(
        &self,
        constructor: &str,
        code: Option<&str>,
        message: &str,
    ) -> sys::JSValue {
        let global = sys::JS_GetGlobalObject(self.context);
        let atom = sys::Atom::new(self.context, constructor);
        let ctor = sys::JS_GetProperty(self.context, global, atom.raw());

        let mut arg = sys::JS_NewStringLen(self.context, message.as_ptr().cast(), message.len());

        let error = sys::JS_CallConstructor(self.context, ctor, 1, &mut arg);

        if let Some(code) = code {
            sys::JS_SetPropertyStr(
                self.context,
                error,
                c"code".as_ptr(),
                sys::JS_NewStringLen(self.context, code.as_ptr().cast(), code.len()),
            );
        }

        sys::free_value(self.context, arg);
        sys::free_value(self.context, ctor);
        sys::free_value(self.context, global);

        error
    }

    fn create_error_with(&self, constructor: &str, code: Option<&Value>, message: &Value) -> Value {
        unsafe {
            let global = sys::JS_GetGlobalObject(self.context);
            let atom = sys::Atom::new(self.context, constructor);
            let ctor = sys::JS_GetProperty(self.context, global, atom.raw());

            let mut arg = message.raw();
            let error = sys::JS_CallConstructor(self.context, ctor, 1, &mut arg);

            if let Some(code) = code {
                sys::JS_SetPropertyStr(
                    self.context,
                    error,
                    c"code".as_ptr(),
                    sys::dup(self.context, code.raw()),
                );
            }

            sys::free_value(self.context, ctor);
            sys::free_value(self.context, global);

            self.root(error)
        }
    }

    fn throw_with(&self, constructor: &str, code: Option<&str>, message: &str) -> Result<()> {
        self.check_no_pending()?;

        unsafe {
            let error = self.make_error(constructor, code, message);

            sys::JS_Throw(self.context, error);
        }

        Ok(())
    }

    /// Throws an error value constructed by a `create_*_error` sibling.
    pub fn throw(&self, error: &Value) -> Result<()> {
        self.check_no_pending()?;

        unsafe {
            let raw = sys::dup(self.context, error.raw());
            sys::JS_Throw(self.context, raw);
        }

        Ok(())
    }

    /// Whether the engine currently holds a pending exception.
    pub fn is_exception_pending(&self) -> bool {
        unsafe { sys::JS_HasException(self.context) }
    }

    /// Returns the pending exception and clears it, or `undefined` when no
    /// exception is pending.
    pub fn get_and_clear_last_exception(&self) -> Value {
        let error = unsafe { sys::JS_GetException(self.context) };

        if sys::is_uninitialized(error) {
            return self.get_undefined();
        }

        self.root(error)
    }

    /// Routes `error` straight through the uncaught-exception path without
    /// making it pending first.
    pub fn fatal_exception(&self, error: &Value) {
        let raw = unsafe { sys::dup(self.context, error.raw()) };

        self.deliver_uncaught_exception(raw);
    }

    /// Installs an uncatchable internal error as the pending exception,
    /// unwinding the nearest script frame.
    pub fn terminate_execution(&self) {
        unsafe {
            sys::JS_ThrowInternalError(self.context, c"terminated".as_ptr());

            let error = sys::JS_GetException(self.context);

            sys::JS_SetUncatchableError(self.context, error);
            sys::JS_Throw(self.context, error);
        }
    }

    pub fn create_error(&self, code: Option<&Value>, message: &Value) -> Value {
        self.create_error_with("Error", code, message)
    }

    pub fn create_type_error(&self, code: Option<&Value>, message: &Value) -> Value {
        self.create_error_with("TypeError", code, message)
    }

    pub fn create_range_error(&self, code: Option<&Value>, message: &Value) -> Value {
        self.create_error_with("RangeError", code, message)
    }

    pub fn create_syntax_error(&self, code: Option<&Value>, message: &Value) -> Value {
        self.create_error_with("SyntaxError", code, message)
    }

    /// Constructs an `Error` and makes it the pending exception. The
    /// printf-style variants of the C surface collapse into this method;
    /// format at the call site.
    pub fn throw_error(&self, code: Option<&str>, message: &str) -> Result<()> {
        self.throw_with("Error", code, message)
    }

    pub fn throw_type_error(&self, code: Option<&str>, message: &str) -> Result<()> {
        self.throw_with("TypeError", code, message)
    }

    pub fn throw_range_error(&self, code: Option<&str>, message: &str) -> Result<()> {
        self.throw_with("RangeError", code, message)
    }

    pub fn throw_syntax_error(&self, code: Option<&str>, message: &str) -> Result<()> {
        self.throw_with("SyntaxError", code, message)
    }

    /// Shared tail for every stubbed operation.
    pub(crate) fn unsupported<T>(&self) -> Result<T> {
        let _ = self.throw_error(None, "Unsupported operation");

        Err(self.status())
    }
}
