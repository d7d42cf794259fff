//! Source-text and synthetic modules.
//!
//! Instantiating a source-text module compiles it with the engine's
//! module-eval flag while a resolver frame sits on the environment's
//! resolver stack; the engine's resolution hook consults the top frame and
//! recursively instantiates whatever the host resolver returns. Synthetic
//! modules register an evaluator record instead, matched by definition
//! pointer when the engine evaluates the module.

use std::{
    cell::Cell,
    ffi::{CStr, CString},
    rc::{Rc, Weak},
};

use crate::{
    env::{env_from_context, Env},
    error::Result,
    handle::Value,
    sys,
};

/// Populates `import.meta` before a module runs: `(env, module, meta)`.
pub type ModuleMetaCallback = Box<dyn Fn(&Env, &Module, &Value)>;

/// Maps a specifier to a module: `(env, specifier, assertions, referrer)`.
/// Returning `None` (with an exception thrown) aborts resolution.
pub type ModuleResolveCallback = Rc<dyn Fn(&Env, &Value, &Value, Option<&Module>) -> Option<Module>>;

/// Fills a synthetic module's exports: `(env, module)`.
pub type ModuleEvaluateCallback = Rc<dyn Fn(&Env, &Module)>;

/// A source-text or synthetic module.
#[derive(Clone)]
pub struct Module {
    pub(crate) inner: Rc<ModuleInner>,
}

pub(crate) struct ModuleInner {
    env: Weak<Env>,
    context: *mut sys::JSContext,
    source: Cell<sys::JSValue>,
    bytecode: Cell<sys::JSValue>,
    pub(crate) definition: Cell<*mut sys::JSModuleDef>,
    meta: Option<ModuleMetaCallback>,
    name: String,
}

impl Drop for ModuleInner {
    fn drop(&mut self) {
        let Some(env) = self.env.upgrade() else {
            return;
        };

        if env.is_closed() {
            return;
        }

        unsafe {
            sys::free_value(self.context, self.source.get());
            sys::free_value(self.context, self.bytecode.get());
        }
    }
}

/// One active instantiation, giving the resolution hook its resolver.
#[derive(Clone)]
pub(crate) struct ResolverFrame {
    pub(crate) module: Module,
    pub(crate) cb: ModuleResolveCallback,
}

/// One synthetic module's evaluator, matched by definition pointer.
pub(crate) struct Evaluator {
    pub(crate) module: Module,
    pub(crate) cb: ModuleEvaluateCallback,
}

/// Engine hook: resolves an import specifier against the active resolver,
/// falling back to the host's dynamic-import callback at the stack edge.
pub(crate) unsafe extern "C" fn on_resolve_module(
    ctx: *mut sys::JSContext,
    name: *const std::os::raw::c_char,
    _opaque: *mut std::os::raw::c_void,
) -> *mut sys::JSModuleDef {
    let env = env_from_context(ctx);

    let frame = env.resolvers.borrow().last().cloned();

    let scope = env.open_handle_scope();

    let bytes = CStr::from_ptr(name).to_bytes();

    let specifier = env.root(sys::JS_NewStringLen(ctx, name, bytes.len()));
    let assertions = env.root(sys::null());

    let mut definition: *mut sys::JSModuleDef = std::ptr::null_mut();

    match frame {
        Some(frame) => {
            if let Some(module) = (frame.cb)(env, &specifier, &assertions, Some(&frame.module)) {
                if module.inner.definition.get().is_null() {
                    if env.instantiate_module(&module, frame.cb.clone()).is_ok() {
                        definition = module.inner.definition.get();
                    }
                } else {
                    definition = module.inner.definition.get();
                }
            }
        }
        None => {
            let cb = env.callbacks.borrow().dynamic_import.clone();

            match cb {
                Some(cb) => {
                    let referrer = env.root(sys::null());

                    if let Some(module) = cb(env, &specifier, &assertions, &referrer) {
                        definition = module.inner.definition.get();
                    }
                }
                None => {
                    let _ = env.throw_error(None, "Dynamic import() is not supported");
                }
            }
        }
    }

    env.close_handle_scope(scope);

    definition
}

/// Engine hook: runs a synthetic module's evaluator.
pub(crate) unsafe extern "C" fn on_evaluate_module(
    ctx: *mut sys::JSContext,
    definition: *mut sys::JSModuleDef,
) -> std::os::raw::c_int {
    let env = env_from_context(ctx);

    let evaluator = env
        .evaluators
        .borrow()
        .iter()
        .find(|evaluator| evaluator.module.inner.definition.get() == definition)
        .map(|evaluator| (evaluator.module.clone(), evaluator.cb.clone()));

    let Some((module, cb)) = evaluator else {
        return -1;
    };

    let scope = env.open_handle_scope();

    cb(env, &module);

    env.close_handle_scope(scope);

    0
}

impl Env {
    /// Creates a source-text module. Compilation happens at
    /// [`Env::instantiate_module`] time.
    pub fn create_module(
        &self,
        name: &str,
        source: &Value,
        meta: Option<ModuleMetaCallback>,
    ) -> Result<Module> {
        self.check_no_pending()?;

        Ok(Module {
            inner: Rc::new(ModuleInner {
                env: self.weak.clone(),
                context: self.context,
                source: Cell::new(unsafe { sys::dup(self.context, source.raw()) }),
                bytecode: Cell::new(sys::null()),
                definition: Cell::new(std::ptr::null_mut()),
                meta,
                name: name.to_owned(),
            }),
        })
    }

    /// Creates a synthetic module exporting `export_names`. The evaluator
    /// runs during the engine's evaluation of the module and is expected
    /// to call [`Env::set_module_export`] for each name.
    pub fn create_synthetic_module(
        &self,
        name: &str,
        export_names: &[Value],
        evaluate: impl Fn(&Env, &Module) + 'static,
    ) -> Result<Module> {
        self.check_no_pending()?;

        let cname = CString::new(name).unwrap_or_default();

        let definition =
            unsafe { sys::JS_NewCModule(self.context, cname.as_ptr(), on_evaluate_module) };

        for export in export_names {
            let export = CString::new(self.get_string(export)).unwrap_or_default();

            unsafe { sys::JS_AddModuleExport(self.context, definition, export.as_ptr()) };
        }

        let module = Module {
            inner: Rc::new(ModuleInner {
                env: self.weak.clone(),
                context: self.context,
                source: Cell::new(sys::null()),
                bytecode: Cell::new(sys::null()),
                definition: Cell::new(definition),
                meta: None,
                name: name.to_owned(),
            }),
        };

        self.evaluators.borrow_mut().push(Evaluator {
            module: module.clone(),
            cb: Rc::new(evaluate),
        });

        Ok(module)
    }

    /// Releases a module. Allowed even with a pending exception.
    pub fn delete_module(&self, module: Module) {
        drop(module);
    }

    pub fn get_module_name<'a>(&self, module: &'a Module) -> &'a str {
        &module.inner.name
    }

    /// The module's namespace object.
    pub fn get_module_namespace(&self, module: &Module) -> Value {
        let namespace =
            unsafe { sys::JS_GetModuleNamespace(self.context, module.inner.definition.get()) };

        self.root(namespace)
    }

    /// Sets one export of a synthetic module.
    pub fn set_module_export(&self, module: &Module, name: &Value, value: &Value) -> Result<()> {
        self.check_no_pending()?;

        let export = CString::new(self.get_string(name)).unwrap_or_default();

        let success = unsafe {
            sys::JS_SetModuleExport(
                self.context,
                module.inner.definition.get(),
                export.as_ptr(),
                sys::dup(self.context, value.raw()),
            )
        };

        if success < 0 {
            self.throw_error(None, "Could not set module export")?;

            return Err(self.status());
        }

        Ok(())
    }

    /// Compiles `module` with `resolver` on the resolver stack; imports
    /// resolve through it, recursively instantiating as needed. A no-op
    /// for synthetic modules.
    pub fn instantiate_module(
        &self,
        module: &Module,
        resolver: ModuleResolveCallback,
    ) -> Result<()> {
        self.check_no_pending()?;

        if sys::is_null(module.inner.source.get()) {
            return Ok(());
        }

        self.resolvers.borrow_mut().push(ResolverFrame {
            module: module.clone(),
            cb: resolver,
        });

        let mut len = 0;
        let input = unsafe {
            sys::JS_ToCStringLen2(self.context, &mut len, module.inner.source.get(), false)
        };

        let filename = CString::new(module.inner.name.as_str()).unwrap_or_default();

        let bytecode = self.with_depth(|| unsafe {
            sys::JS_Eval(
                self.context,
                input,
                len,
                filename.as_ptr(),
                sys::JS_EVAL_TYPE_MODULE | sys::JS_EVAL_FLAG_COMPILE_ONLY,
            )
        });

        unsafe { sys::JS_FreeCString(self.context, input) };

        self.resolvers.borrow_mut().pop();

        if sys::is_exception(bytecode) {
            return Err(self.surface_exception());
        }

        module.inner.bytecode.set(bytecode);
        module
            .inner
            .definition
            .set(sys::ptr(bytecode) as *mut sys::JSModuleDef);

        Ok(())
    }

    /// Evaluates an instantiated module. A thrown exception is captured
    /// into a rejected promise rather than surfacing as an error.
    pub fn run_module(&self, module: &Module) -> Result<Value> {
        self.check_no_pending()?;

        if let Some(meta) = &module.inner.meta {
            let raw = unsafe {
                sys::JS_GetImportMeta(self.context, module.inner.definition.get())
            };

            let meta_object = self.root(raw);

            meta(self, module, &meta_object);

            if self.is_exception_pending() {
                return Ok(self.capture_rejection());
            }
        }

        let bytecode = module.inner.bytecode.replace(sys::null());

        let value = self.with_depth(|| unsafe { sys::JS_EvalFunction(self.context, bytecode) });

        if sys::is_exception(value) {
            return Ok(self.capture_rejection());
        }

        Ok(self.root(value))
    }

    /// Captures the pending exception into a freshly rejected promise.
    fn capture_rejection(&self) -> Value {
        let error = unsafe { sys::JS_GetException(self.context) };
        let error = self.root(error);

        let (deferred, promise) = self.create_promise();

        self.reject_deferred(deferred, &error);

        promise
    }
}
