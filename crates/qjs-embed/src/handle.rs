//! Value wrappers and the handle-scope stack.
//!
//! Every [`Value`] handed out by the API is rooted in the innermost open
//! [`HandleScope`]: the scope owns one engine reference per wrapper and
//! releases them, in insertion order, when it closes. Scopes close in
//! strict LIFO order. A wrapper only survives its scope when it is
//! explicitly escaped into the parent scope or promoted into a
//! [`Reference`](crate::reference::Reference).

use std::{cell::Cell, rc::Rc};

use crate::{env::Env, sys};

/// A rooted wrapper around one engine value slot.
///
/// Cloning a `Value` clones the handle, not the underlying engine
/// reference; both clones go dead together when the owning scope closes.
/// A dead handle reads as `undefined` instead of dangling.
#[derive(Clone)]
pub struct Value {
    cell: Rc<ValueCell>,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("tag", &self.raw().tag)
            .finish()
    }
}

pub(crate) struct ValueCell {
    raw: Cell<sys::JSValue>,
}

impl Value {
    pub(crate) fn from_raw(raw: sys::JSValue) -> Value {
        Value {
            cell: Rc::new(ValueCell {
                raw: Cell::new(raw),
            }),
        }
    }

    /// The raw engine slot. Owned by the scope (or reference) this wrapper
    /// is rooted in; callers duplicate before storing.
    pub(crate) fn raw(&self) -> sys::JSValue {
        self.cell.raw.get()
    }

    fn neutralize(&self) -> sys::JSValue {
        self.cell.raw.replace(sys::undefined())
    }
}

pub(crate) struct ScopeFrame {
    values: Vec<Value>,
    escapable: bool,
    escaped: bool,
}

/// A frame of rooted wrappers. Returned by [`Env::open_handle_scope`] and
/// consumed by [`Env::close_handle_scope`]; scopes must close in the
/// reverse order they were opened.
pub struct HandleScope {
    index: usize,
}

/// A handle scope that can transfer at most one wrapper into its parent
/// before closing.
pub struct EscapableHandleScope {
    index: usize,
}

impl Env {
    /// Opens a new handle scope. Allowed even with a pending exception.
    pub fn open_handle_scope(&self) -> HandleScope {
        HandleScope {
            index: self.push_scope(false),
        }
    }

    /// Closes the innermost scope, releasing every wrapper rooted in it.
    ///
    /// Panics if `scope` is not the innermost open scope.
    pub fn close_handle_scope(&self, scope: HandleScope) {
        self.pop_scope(scope.index);
    }

    pub fn open_escapable_handle_scope(&self) -> EscapableHandleScope {
        EscapableHandleScope {
            index: self.push_scope(true),
        }
    }

    pub fn close_escapable_handle_scope(&self, scope: EscapableHandleScope) {
        self.pop_scope(scope.index);
    }

    /// Re-roots `escapee` in the scope's parent so it survives the close.
    ///
    /// At most one escape is allowed per scope; a second call panics.
    pub fn escape_handle(&self, scope: &EscapableHandleScope, escapee: &Value) -> Value {
        assert!(scope.index > 0, "cannot escape from an outermost scope");

        let raw = unsafe { sys::dup(self.context, escapee.raw()) };
        let wrapper = Value::from_raw(raw);

        let mut scopes = self.scopes.borrow_mut();
        let frame = &mut scopes[scope.index];

        assert!(frame.escapable && !frame.escaped, "scope already escaped");
        frame.escaped = true;

        scopes[scope.index - 1].values.push(wrapper.clone());

        wrapper
    }

    /// Opens a scope around `f`, closing it on the way out.
    pub fn with_handle_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        let scope = self.open_handle_scope();
        let result = f();
        self.close_handle_scope(scope);

        result
    }

    /// Roots an owned raw value in the innermost scope.
    ///
    /// Panics if no scope is open; the context's implicit global scope does
    /// not root wrappers.
    pub(crate) fn root(&self, raw: sys::JSValue) -> Value {
        let wrapper = Value::from_raw(raw);

        let mut scopes = self.scopes.borrow_mut();
        let frame = scopes.last_mut().expect("no open handle scope");

        frame.values.push(wrapper.clone());

        wrapper
    }

    fn push_scope(&self, escapable: bool) -> usize {
        let mut scopes = self.scopes.borrow_mut();

        scopes.push(ScopeFrame {
            values: Vec::new(),
            escapable,
            escaped: false,
        });

        scopes.len() - 1
    }

    fn pop_scope(&self, index: usize) {
        let frame = {
            let mut scopes = self.scopes.borrow_mut();

            assert_eq!(
                index,
                scopes.len() - 1,
                "handle scopes must close in LIFO order"
            );

            scopes.pop().unwrap()
        };

        // The frame is detached before any engine reference is released:
        // releasing may run finalizers, and a finalizer may call back into
        // the host and root new wrappers.
        for value in frame.values {
            let raw = value.neutralize();

            unsafe { sys::free_value(self.context, raw) };
        }
    }
}
