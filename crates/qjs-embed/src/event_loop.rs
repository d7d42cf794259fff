//! The event-loop seam.
//!
//! The embedding core never owns a loop; it consumes one through these
//! traits as an opaque collaborator. An environment asks its loop for
//! three handles at creation time:
//!
//! * a **prepare** handle, fired every iteration while started, used to
//!   re-evaluate liveness;
//! * a **check** handle, fired at the end of each iteration and kept
//!   un-referenced so it never keeps the loop alive by itself;
//! * a **teardown async** handle, un-referenced until `destroy` finds
//!   deferred teardown work outstanding, and signalled when the last
//!   deferred task finishes.
//!
//! Hosts back these with whatever loop they run (libuv, a test harness, a
//! bespoke reactor). `AsyncHandle::send` is the one entry point that must
//! tolerate being called from another thread.

/// A host event loop.
pub trait EventLoop {
    /// Creates a prepare handle invoking `cb` once per loop iteration while
    /// started. Handles start stopped.
    fn prepare(&self, cb: Box<dyn Fn()>) -> Box<dyn LoopHandle>;

    /// Creates a check handle invoking `cb` at the end of each iteration
    /// while started.
    fn check(&self, cb: Box<dyn Fn()>) -> Box<dyn LoopHandle>;

    /// Creates an async handle invoking `cb` on the loop thread after
    /// [`AsyncHandle::send`].
    fn asynchronous(&self, cb: Box<dyn Fn()>) -> Box<dyn AsyncHandle>;

    /// Whether anything else keeps the loop alive this iteration.
    fn alive(&self) -> bool;
}

/// One registered loop handle.
pub trait LoopHandle {
    fn start(&self);

    fn stop(&self);

    /// Whether the handle should keep the loop alive while active
    /// (`uv_ref`/`uv_unref` in libuv terms). Handles are created keeping
    /// the loop alive.
    fn keep_alive(&self, keep: bool);

    /// Releases the handle. The loop must not invoke its callback again.
    fn close(&self);
}

/// A loop handle that can be signalled, possibly from another thread.
pub trait AsyncHandle: LoopHandle {
    fn send(&self);
}
