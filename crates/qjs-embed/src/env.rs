//! The environment: one runtime, one global context, and every piece of
//! host-facing state hanging off them.
//!
//! # Reentrancy
//!
//! Every API that can transitively run script brackets the engine call with
//! the depth counter. When the counter falls back to the outermost level
//! the microtask queue is drained and still-unhandled rejections are
//! flushed; failures at the outermost level are consumed and delivered to
//! the uncaught-exception callback instead of staying pending.

use std::{
    cell::{Cell, RefCell},
    ffi::CString,
    os::raw::c_void,
    rc::{Rc, Weak},
};

use smallvec::SmallVec;

use crate::{
    error::Result,
    event_loop::{AsyncHandle, EventLoop, LoopHandle},
    handle::{ScopeFrame, Value},
    module::{Evaluator, Module, ResolverFrame},
    platform::Platform,
    promise::Rejection,
    sys,
    teardown::TeardownTask,
};

/// Options fixed at environment creation.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvOptions {
    /// Engine heap ceiling in bytes. Unlimited when absent; probing system
    /// memory is the host's concern.
    pub memory_limit: Option<usize>,
}

pub(crate) struct ClassIds {
    pub(crate) external: sys::JSClassID,
    pub(crate) finalizer: sys::JSClassID,
    pub(crate) type_tag: sys::JSClassID,
    pub(crate) function: sys::JSClassID,
    pub(crate) constructor: sys::JSClassID,
    pub(crate) delegate: sys::JSClassID,
}

#[derive(Default)]
pub(crate) struct HostCallbacks {
    pub(crate) uncaught_exception: Option<Rc<dyn Fn(&Env, &Value)>>,
    pub(crate) unhandled_rejection: Option<Rc<dyn Fn(&Env, &Value, &Value)>>,
    pub(crate) dynamic_import: Option<Rc<dyn Fn(&Env, &Value, &Value, &Value) -> Option<Module>>>,
}

/// A script execution instance. Created with [`Env::new`], destroyed with
/// [`Env::destroy`]; all methods take `&self` and must be called on the
/// loop thread.
pub struct Env {
    pub(crate) weak: Weak<Env>,

    platform: Rc<Platform>,
    event_loop: Rc<dyn EventLoop>,

    prepare: RefCell<Option<Box<dyn LoopHandle>>>,
    check: RefCell<Option<Box<dyn LoopHandle>>>,
    teardown_async: RefCell<Option<Box<dyn AsyncHandle>>>,

    pub(crate) runtime: *mut sys::JSRuntime,
    pub(crate) context: *mut sys::JSContext,
    bindings: Cell<sys::JSValue>,

    pub(crate) scopes: RefCell<Vec<ScopeFrame>>,
    pub(crate) depth: Cell<u32>,

    /// Outstanding deferred teardown tasks blocking the close.
    pub(crate) outstanding: Cell<u32>,
    pub(crate) destroying: Cell<bool>,
    closed: Cell<bool>,

    external_memory: Cell<i64>,

    pub(crate) resolvers: RefCell<Vec<ResolverFrame>>,
    pub(crate) evaluators: RefCell<Vec<Evaluator>>,
    pub(crate) rejections: RefCell<Vec<Rejection>>,
    pub(crate) teardown_queue: RefCell<Vec<TeardownTask>>,
    pub(crate) next_teardown_id: Cell<u64>,

    pub(crate) classes: ClassIds,
    pub(crate) callbacks: RefCell<HostCallbacks>,
}

/// Recovers the environment from an engine context inside a hook.
///
/// # Safety
/// The context opaque must have been installed by [`Env::new`] and the
/// environment must still be alive.
pub(crate) unsafe fn env_from_context<'a>(ctx: *mut sys::JSContext) -> &'a Env {
    &*(sys::JS_GetContextOpaque(ctx) as *const Env)
}

/// Like [`env_from_context`], for runtime-level hooks (class finalizers).
///
/// # Safety
/// See [`env_from_context`].
pub(crate) unsafe fn env_from_runtime<'a>(rt: *mut sys::JSRuntime) -> &'a Env {
    &*(sys::JS_GetRuntimeOpaque(rt) as *const Env)
}

unsafe fn register_classes(rt: *mut sys::JSRuntime) -> ClassIds {
    let mut ids = ClassIds {
        external: 0,
        finalizer: 0,
        type_tag: 0,
        function: 0,
        constructor: 0,
        delegate: 0,
    };

    unsafe fn register(rt: *mut sys::JSRuntime, id: &mut sys::JSClassID, def: &sys::JSClassDef) {
        sys::JS_NewClassID(rt, id);

        let err = sys::JS_NewClass(rt, *id, def);
        debug_assert_eq!(err, 0);
    }

    register(
        rt,
        &mut ids.external,
        &sys::JSClassDef {
            class_name: c"External".as_ptr(),
            finalizer: Some(crate::finalizer::on_external_finalize),
            gc_mark: None,
            call: None,
            exotic: std::ptr::null_mut(),
        },
    );

    register(
        rt,
        &mut ids.finalizer,
        &sys::JSClassDef {
            class_name: c"Finalizer".as_ptr(),
            finalizer: Some(crate::finalizer::on_finalizer_finalize),
            gc_mark: None,
            call: None,
            exotic: std::ptr::null_mut(),
        },
    );

    register(
        rt,
        &mut ids.type_tag,
        &sys::JSClassDef {
            class_name: c"TypeTag".as_ptr(),
            finalizer: Some(crate::finalizer::on_type_tag_finalize),
            gc_mark: None,
            call: None,
            exotic: std::ptr::null_mut(),
        },
    );

    register(
        rt,
        &mut ids.function,
        &sys::JSClassDef {
            class_name: c"Function".as_ptr(),
            finalizer: Some(crate::function::on_function_finalize),
            gc_mark: None,
            call: None,
            exotic: std::ptr::null_mut(),
        },
    );

    register(
        rt,
        &mut ids.constructor,
        &sys::JSClassDef {
            class_name: c"Constructor".as_ptr(),
            finalizer: Some(crate::function::on_constructor_finalize),
            gc_mark: None,
            call: None,
            exotic: std::ptr::null_mut(),
        },
    );

    register(
        rt,
        &mut ids.delegate,
        &sys::JSClassDef {
            class_name: c"Delegate".as_ptr(),
            finalizer: Some(crate::delegate::on_delegate_finalize),
            gc_mark: None,
            call: None,
            exotic: &crate::delegate::DELEGATE_EXOTIC as *const _ as *mut _,
        },
    );

    ids
}

impl Env {
    /// Creates an environment bound to `event_loop`.
    pub fn new(
        event_loop: Rc<dyn EventLoop>,
        platform: Rc<Platform>,
        options: EnvOptions,
    ) -> Rc<Env> {
        let env = Rc::new_cyclic(|weak: &Weak<Env>| unsafe {
            let runtime = sys::JS_NewRuntime();

            sys::JS_SetSharedArrayBufferFunctions(
                runtime,
                &sys::JSSharedArrayBufferFunctions {
                    sab_alloc: Some(crate::arraybuffer::on_shared_alloc),
                    sab_free: Some(crate::arraybuffer::on_shared_free),
                    sab_dup: Some(crate::arraybuffer::on_shared_dup),
                    sab_opaque: std::ptr::null_mut(),
                },
            );

            sys::JS_SetMaxStackSize(runtime, 0);
            sys::JS_SetCanBlock(runtime, false);
            sys::JS_SetModuleLoaderFunc(
                runtime,
                None,
                Some(crate::module::on_resolve_module),
                std::ptr::null_mut(),
            );
            sys::JS_SetHostPromiseRejectionTracker(
                runtime,
                Some(crate::promise::on_promise_rejection),
                std::ptr::null_mut(),
            );

            if let Some(limit) = options.memory_limit {
                sys::JS_SetMemoryLimit(runtime, limit);
            }

            let classes = register_classes(runtime);

            let context = sys::JS_NewContext(runtime);
            let bindings = sys::JS_NewObject(context);

            Env {
                weak: weak.clone(),
                platform,
                event_loop,
                prepare: RefCell::new(None),
                check: RefCell::new(None),
                teardown_async: RefCell::new(None),
                runtime,
                context,
                bindings: Cell::new(bindings),
                scopes: RefCell::new(Vec::new()),
                depth: Cell::new(0),
                outstanding: Cell::new(0),
                destroying: Cell::new(false),
                closed: Cell::new(false),
                external_memory: Cell::new(0),
                resolvers: RefCell::new(Vec::new()),
                evaluators: RefCell::new(Vec::new()),
                rejections: RefCell::new(Vec::new()),
                teardown_queue: RefCell::new(Vec::new()),
                next_teardown_id: Cell::new(1),
                classes,
                callbacks: RefCell::new(HostCallbacks::default()),
            }
        });

        unsafe {
            let opaque = Rc::as_ptr(&env) as *mut c_void;

            sys::JS_SetRuntimeOpaque(env.runtime, opaque);
            sys::JS_SetContextOpaque(env.context, opaque);
        }

        let prepare = env.event_loop.prepare(Box::new({
            let weak = env.weak.clone();
            move || {
                if let Some(env) = weak.upgrade() {
                    env.check_liveness();
                }
            }
        }));
        prepare.start();
        *env.prepare.borrow_mut() = Some(prepare);

        let check = env.event_loop.check(Box::new({
            let weak = env.weak.clone();
            move || {
                if let Some(env) = weak.upgrade() {
                    env.on_check();
                }
            }
        }));
        check.start();
        // The check handle must not on its own keep the loop alive; it only
        // runs outstanding work that may queue more.
        check.keep_alive(false);
        *env.check.borrow_mut() = Some(check);

        let teardown_async = env.event_loop.asynchronous(Box::new({
            let weak = env.weak.clone();
            move || {
                if let Some(env) = weak.upgrade() {
                    env.on_teardown_signal();
                }
            }
        }));
        teardown_async.keep_alive(false);
        *env.teardown_async.borrow_mut() = Some(teardown_async);

        log::debug!("environment created");

        env
    }

    /// Begins teardown: runs immediate teardown tasks, hands deferred tasks
    /// their handles, and closes the environment once nothing is
    /// outstanding.
    pub fn destroy(&self) {
        self.destroying.set(true);

        self.run_teardown_queue();

        if self.outstanding.get() == 0 {
            self.close();
        } else {
            log::debug!(
                "destroy deferred behind {} outstanding task(s)",
                self.outstanding.get()
            );

            if let Some(teardown) = &*self.teardown_async.borrow() {
                teardown.keep_alive(true);
            }
        }
    }

    pub(crate) fn on_teardown_signal(&self) {
        if self.outstanding.get() == 0 {
            self.close();
        }
    }

    /// Wakes the teardown-async handle; called when the last outstanding
    /// deferred task finishes during destroy.
    pub(crate) fn signal_teardown(&self) {
        if let Some(teardown) = &*self.teardown_async.borrow() {
            teardown.send();
        }
    }

    /// Whether the engine state has already been released.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }

        unsafe {
            sys::free_value(self.context, self.bindings.replace(sys::undefined()));
            sys::JS_FreeContext(self.context);
            sys::JS_FreeRuntime(self.runtime);
        }

        for handle in [
            self.prepare.borrow_mut().take(),
            self.check.borrow_mut().take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.close();
        }

        if let Some(teardown) = self.teardown_async.borrow_mut().take() {
            teardown.close();
        }

        log::debug!("environment closed");
    }

    fn check_liveness(&self) {
        // There is no macrotask queue yet, so the prepare handle must never
        // keep the loop alive on its own.
        if let Some(prepare) = &*self.prepare.borrow() {
            prepare.stop();
        }
    }

    fn on_check(&self) {
        if self.event_loop.alive() {
            return;
        }

        self.check_liveness();
    }

    /// Installs the callback invoked when an exception reaches the
    /// outermost depth without being handled.
    pub fn on_uncaught_exception(&self, cb: impl Fn(&Env, &Value) + 'static) {
        self.callbacks.borrow_mut().uncaught_exception = Some(Rc::new(cb));
    }

    /// Installs the callback invoked, after a microtask drain, with each
    /// promise that was rejected and never handled. Arguments are
    /// `(env, reason, promise)`.
    pub fn on_unhandled_rejection(&self, cb: impl Fn(&Env, &Value, &Value) + 'static) {
        self.callbacks.borrow_mut().unhandled_rejection = Some(Rc::new(cb));
    }

    /// Installs the callback consulted by dynamic `import()` when no module
    /// resolver is active. Arguments are `(env, specifier, assertions,
    /// referrer)`.
    pub fn on_dynamic_import(
        &self,
        cb: impl Fn(&Env, &Value, &Value, &Value) -> Option<Module> + 'static,
    ) {
        self.callbacks.borrow_mut().dynamic_import = Some(Rc::new(cb));
    }

    pub fn platform(&self) -> Rc<Platform> {
        self.platform.clone()
    }

    pub fn event_loop(&self) -> Rc<dyn EventLoop> {
        self.event_loop.clone()
    }

    /// The environment's owned bindings object.
    pub fn get_bindings(&self) -> Result<Value> {
        self.check_no_pending()?;

        let raw = unsafe { sys::dup(self.context, self.bindings.get()) };

        Ok(self.root(raw))
    }

    /// Compiles and runs `source` as a classic script.
    pub fn run_script(&self, file: &str, source: &Value) -> Result<Value> {
        self.check_no_pending()?;

        let mut len = 0;
        let input = unsafe { sys::JS_ToCStringLen2(self.context, &mut len, source.raw(), false) };

        let filename = CString::new(file).unwrap_or_default();

        let value = self.with_depth(|| unsafe {
            sys::JS_Eval(
                self.context,
                input,
                len,
                filename.as_ptr(),
                sys::JS_EVAL_TYPE_GLOBAL,
            )
        });

        unsafe { sys::JS_FreeCString(self.context, input) };

        if sys::is_exception(value) {
            return Err(self.surface_exception());
        }

        Ok(self.root(value))
    }

    /// Calls `function` with `recv` as the receiver.
    pub fn call_function(&self, recv: &Value, function: &Value, args: &[Value]) -> Result<Value> {
        self.check_no_pending()?;

        let mut argv: SmallVec<[sys::JSValue; 8]> = args.iter().map(Value::raw).collect();

        let value = self.with_depth(|| unsafe {
            sys::JS_Call(
                self.context,
                function.raw(),
                recv.raw(),
                argv.len() as i32,
                argv.as_mut_ptr(),
            )
        });

        if sys::is_exception(value) {
            return Err(self.surface_exception());
        }

        Ok(self.root(value))
    }

    /// Like [`Env::call_function`], but always drains microtasks and
    /// surfaces uncaught exceptions, regardless of depth.
    pub fn call_function_with_checkpoint(
        &self,
        recv: &Value,
        function: &Value,
        args: &[Value],
    ) -> Result<Value> {
        self.check_no_pending()?;

        let mut argv: SmallVec<[sys::JSValue; 8]> = args.iter().map(Value::raw).collect();

        self.depth.set(self.depth.get() + 1);

        let value = unsafe {
            sys::JS_Call(
                self.context,
                function.raw(),
                recv.raw(),
                argv.len() as i32,
                argv.as_mut_ptr(),
            )
        };

        self.run_microtasks();

        self.depth.set(self.depth.get() - 1);

        if sys::is_exception(value) {
            let error = unsafe { sys::JS_GetException(self.context) };

            self.deliver_uncaught_exception(error);

            return Err(self.status());
        }

        Ok(self.root(value))
    }

    /// Invokes `constructor` as a constructor.
    pub fn new_instance(&self, constructor: &Value, args: &[Value]) -> Result<Value> {
        self.check_no_pending()?;

        let mut argv: SmallVec<[sys::JSValue; 8]> = args.iter().map(Value::raw).collect();

        let value = self.with_depth(|| unsafe {
            sys::JS_CallConstructor(
                self.context,
                constructor.raw(),
                argv.len() as i32,
                argv.as_mut_ptr(),
            )
        });

        if sys::is_exception(value) {
            return Err(self.surface_exception());
        }

        Ok(self.root(value))
    }

    /// Adjusts the host-reported external memory figure, returning the new
    /// total.
    pub fn adjust_external_memory(&self, delta: i64) -> i64 {
        let total = self.external_memory.get() + delta;

        self.external_memory.set(total);

        total
    }

    /// Forces a collection pass when the platform exposes garbage
    /// collection; a no-op otherwise.
    pub fn request_garbage_collection(&self) {
        if self.platform.options().expose_garbage_collection {
            unsafe { sys::JS_RunGC(self.runtime) };
        }
    }

    /// Brackets `f` with the depth counter, draining microtasks when the
    /// call is the outermost one.
    pub(crate) fn with_depth<T>(&self, f: impl FnOnce() -> T) -> T {
        self.depth.set(self.depth.get() + 1);

        let result = f();

        if self.depth.get() == 1 {
            self.run_microtasks();
        }

        self.depth.set(self.depth.get() - 1);

        result
    }

    /// Error tail for depth-bracketed operations: at the outermost depth
    /// the pending exception is consumed and delivered to the
    /// uncaught-exception callback; inner frames leave it pending.
    pub(crate) fn surface_exception(&self) -> crate::error::Error {
        if self.depth.get() == 0 {
            let error = unsafe { sys::JS_GetException(self.context) };

            self.deliver_uncaught_exception(error);
        }

        self.status()
    }

    /// Runs engine jobs until the queue is empty, then flushes pending
    /// unhandled-rejection notifications in insertion order.
    pub(crate) fn run_microtasks(&self) {
        let scope = self.open_handle_scope();

        loop {
            let mut ctx: *mut sys::JSContext = std::ptr::null_mut();

            let err = unsafe { sys::JS_ExecutePendingJob(self.runtime, &mut ctx) };

            if err == 0 {
                break;
            }

            if err < 0 {
                let error = unsafe { sys::JS_GetException(ctx) };

                self.deliver_uncaught_exception(error);
            }
        }

        let rejections = self.rejections.take();

        for rejection in rejections {
            self.deliver_unhandled_rejection(rejection);
        }

        self.close_handle_scope(scope);
    }

    /// Delivers an owned error value to the uncaught-exception callback,
    /// or re-throws it when none is installed.
    pub(crate) fn deliver_uncaught_exception(&self, error: sys::JSValue) {
        let cb = self.callbacks.borrow().uncaught_exception.clone();

        match cb {
            Some(cb) => {
                let scope = self.open_handle_scope();
                let error = self.root(error);

                cb(self, &error);

                self.close_handle_scope(scope);
            }
            None => {
                log::debug!("no uncaught-exception callback installed; rethrowing");

                unsafe { sys::JS_Throw(self.context, error) };
            }
        }
    }

    fn deliver_unhandled_rejection(&self, rejection: Rejection) {
        let cb = self.callbacks.borrow().unhandled_rejection.clone();

        match cb {
            Some(cb) => {
                let scope = self.open_handle_scope();

                let reason = self.root(rejection.reason);
                let promise = self.root(rejection.promise);

                cb(self, &reason, &promise);

                self.close_handle_scope(scope);
            }
            None => unsafe {
                sys::free_value(self.context, rejection.promise);
                sys::free_value(self.context, rejection.reason);
            },
        }
    }

    fn run_teardown_queue(&self) {
        let tasks: Vec<TeardownTask> = self.teardown_queue.borrow().clone();

        // Reverse registration order.
        for task in tasks.into_iter().rev() {
            match task {
                TeardownTask::Immediate { cb, data } => {
                    cb(data);

                    self.teardown_queue
                        .borrow_mut()
                        .retain(|t| !matches!(t, TeardownTask::Immediate { cb: c, data: d } if *c == cb && *d == data));
                }
                TeardownTask::Deferred { id, cb, data } => {
                    cb(crate::teardown::DeferredTeardown::new(self.weak.clone(), id), data);
                }
            }
        }
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        if !self.closed.get() {
            log::warn!("environment dropped without destroy; closing inline");

            self.close();
        }
    }
}
