//! Shared test fixtures: a deterministic manual event loop and environment
//! setup helpers.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use qjs_embed::{
    AsyncHandle, Env, EnvOptions, EventLoop, LoopHandle, Platform, PlatformOptions, Result, Value,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Prepare,
    Check,
    Async,
}

struct HandleState {
    kind: HandleKind,
    cb: Box<dyn Fn()>,
    started: Cell<bool>,
    keep_alive: Cell<bool>,
    closed: Cell<bool>,
    pending: Cell<bool>,
}

struct ManualHandle {
    state: Rc<HandleState>,
}

impl LoopHandle for ManualHandle {
    fn start(&self) {
        self.state.started.set(true);
    }

    fn stop(&self) {
        self.state.started.set(false);
    }

    fn keep_alive(&self, keep: bool) {
        self.state.keep_alive.set(keep);
    }

    fn close(&self) {
        self.state.closed.set(true);
    }
}

impl AsyncHandle for ManualHandle {
    fn send(&self) {
        self.state.pending.set(true);
    }
}

/// A hand-cranked loop: handles record their state, async sends queue
/// until [`ManualLoop::run_asyncs`] dispatches them.
#[derive(Default)]
pub struct ManualLoop {
    handles: RefCell<Vec<Rc<HandleState>>>,
}

impl ManualLoop {
    pub fn new() -> Rc<ManualLoop> {
        Rc::new(ManualLoop::default())
    }

    fn register(&self, kind: HandleKind, cb: Box<dyn Fn()>) -> Rc<HandleState> {
        let state = Rc::new(HandleState {
            kind,
            cb,
            started: Cell::new(false),
            keep_alive: Cell::new(true),
            closed: Cell::new(false),
            pending: Cell::new(false),
        });

        self.handles.borrow_mut().push(state.clone());

        state
    }

    /// Dispatches queued async sends.
    pub fn run_asyncs(&self) {
        let pending: Vec<Rc<HandleState>> = self
            .handles
            .borrow()
            .iter()
            .filter(|state| {
                state.kind == HandleKind::Async && state.pending.get() && !state.closed.get()
            })
            .cloned()
            .collect();

        for state in pending {
            state.pending.set(false);

            (state.cb)();
        }
    }

    /// Whether every handle the environment created has been closed.
    pub fn all_closed(&self) -> bool {
        self.handles
            .borrow()
            .iter()
            .all(|state| state.closed.get())
    }

    /// Whether any handle would keep a real loop alive.
    pub fn keeping_alive(&self) -> bool {
        self.handles
            .borrow()
            .iter()
            .any(|state| state.keep_alive.get() && !state.closed.get())
    }
}

impl EventLoop for ManualLoop {
    fn prepare(&self, cb: Box<dyn Fn()>) -> Box<dyn LoopHandle> {
        Box::new(ManualHandle {
            state: self.register(HandleKind::Prepare, cb),
        })
    }

    fn check(&self, cb: Box<dyn Fn()>) -> Box<dyn LoopHandle> {
        Box::new(ManualHandle {
            state: self.register(HandleKind::Check, cb),
        })
    }

    fn asynchronous(&self, cb: Box<dyn Fn()>) -> Box<dyn AsyncHandle> {
        Box::new(ManualHandle {
            state: self.register(HandleKind::Async, cb),
        })
    }

    fn alive(&self) -> bool {
        false
    }
}

/// A fresh environment on a manual loop, with garbage collection exposed.
pub fn setup() -> (Rc<ManualLoop>, Rc<Env>) {
    let event_loop = ManualLoop::new();

    let platform = Platform::new(
        event_loop.clone(),
        PlatformOptions {
            expose_garbage_collection: true,
        },
    );

    let env = Env::new(event_loop.clone(), platform, EnvOptions::default());

    (event_loop, env)
}

/// Evaluates `code` as a script.
pub fn eval(env: &Env, code: &str) -> Result<Value> {
    let source = env.create_string_utf8(code);

    env.run_script("test", &source)
}

/// A leaked counter cell addressable from fn-pointer finalizers.
pub fn counter() -> &'static Cell<u32> {
    Box::leak(Box::new(Cell::new(0)))
}

pub fn counter_ptr(counter: &'static Cell<u32>) -> *mut std::os::raw::c_void {
    counter as *const Cell<u32> as *mut std::os::raw::c_void
}

pub fn bump(data: *mut std::os::raw::c_void) {
    let count = unsafe { &*(data as *const Cell<u32>) };

    count.set(count.get() + 1);
}
