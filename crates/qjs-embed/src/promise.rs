//! Promises, deferreds and the unhandled-rejection tracker.

use crate::{
    env::{env_from_context, Env},
    error::Result,
    handle::Value,
    sys,
};

/// The `(resolve, reject)` pair produced with a promise. Concluding a
/// deferred consumes it.
pub struct Deferred {
    resolve: sys::JSValue,
    reject: sys::JSValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// One promise the engine reported as rejected and not yet handled.
pub(crate) struct Rejection {
    pub(crate) promise: sys::JSValue,
    pub(crate) reason: sys::JSValue,
}

/// Engine hook: tracks rejections as they become unhandled and un-tracks
/// them when a handler shows up before the drain point.
pub(crate) unsafe extern "C" fn on_promise_rejection(
    ctx: *mut sys::JSContext,
    promise: sys::JSValue,
    reason: sys::JSValue,
    is_handled: bool,
    _opaque: *mut std::os::raw::c_void,
) {
    let env = env_from_context(ctx);

    if env.callbacks.borrow().unhandled_rejection.is_none() {
        return;
    }

    if is_handled {
        // Detach the node before releasing its values; a release can run
        // finalizers that call back into the tracker.
        let node = {
            let mut rejections = env.rejections.borrow_mut();

            rejections
                .iter()
                .position(|rejection| sys::ptr(rejection.promise) == sys::ptr(promise))
                .map(|index| rejections.remove(index))
        };

        if let Some(rejection) = node {
            sys::free_value(ctx, rejection.promise);
            sys::free_value(ctx, rejection.reason);
        }
    } else {
        env.rejections.borrow_mut().push(Rejection {
            promise: sys::dup(ctx, promise),
            reason: sys::dup(ctx, reason),
        });
    }
}

impl Env {
    /// Creates a pending promise plus the deferred that concludes it.
    pub fn create_promise(&self) -> (Deferred, Value) {
        let mut functions = [sys::undefined(); 2];

        let promise =
            unsafe { sys::JS_NewPromiseCapability(self.context, functions.as_mut_ptr()) };

        let deferred = Deferred {
            resolve: functions[0],
            reject: functions[1],
        };

        (deferred, self.root(promise))
    }

    pub fn resolve_deferred(&self, deferred: Deferred, resolution: &Value) {
        self.conclude_deferred(deferred, resolution, true);
    }

    pub fn reject_deferred(&self, deferred: Deferred, resolution: &Value) {
        self.conclude_deferred(deferred, resolution, false);
    }

    fn conclude_deferred(&self, deferred: Deferred, resolution: &Value, resolved: bool) {
        unsafe {
            let global = sys::JS_GetGlobalObject(self.context);

            let function = if resolved {
                deferred.resolve
            } else {
                deferred.reject
            };

            let mut arg = resolution.raw();
            let result = sys::JS_Call(self.context, function, global, 1, &mut arg);

            if self.depth.get() == 0 {
                self.run_microtasks();
            }

            sys::free_value(self.context, global);
            sys::free_value(self.context, result);
            sys::free_value(self.context, deferred.resolve);
            sys::free_value(self.context, deferred.reject);
        }
    }

    pub fn get_promise_state(&self, promise: &Value) -> PromiseState {
        match unsafe { sys::JS_PromiseState(self.context, promise.raw()) } {
            sys::JS_PROMISE_FULFILLED => PromiseState::Fulfilled,
            sys::JS_PROMISE_REJECTED => PromiseState::Rejected,
            _ => PromiseState::Pending,
        }
    }

    /// The settled value of `promise`. The promise must not be pending.
    pub fn get_promise_result(&self, promise: &Value) -> Result<Value> {
        assert_ne!(
            self.get_promise_state(promise),
            PromiseState::Pending,
            "promise is still pending"
        );

        let result = unsafe { sys::JS_PromiseResult(self.context, promise.raw()) };

        Ok(self.root(result))
    }
}
