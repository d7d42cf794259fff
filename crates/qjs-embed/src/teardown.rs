//! The teardown queue.
//!
//! Hosts register work that must run before the environment goes away.
//! Immediate tasks are plain callbacks invoked inline during
//! [`Env::destroy`](crate::env::Env::destroy). Deferred tasks receive a
//! [`DeferredTeardown`] handle instead and block the close until the host
//! calls [`DeferredTeardown::finish`]; the environment keeps its loop
//! handles alive in the meantime.

use std::{os::raw::c_void, rc::Weak};

use crate::{env::Env, error::Result};

/// An immediate teardown callback. Identified for removal by the
/// `(callback, data)` pair.
pub type TeardownCallback = fn(*mut c_void);

/// A deferred teardown callback, invoked during destroy with the handle
/// that later finishes the task.
pub type DeferredTeardownCallback = fn(DeferredTeardown, *mut c_void);

#[derive(Clone, Copy)]
pub(crate) enum TeardownTask {
    Immediate {
        cb: TeardownCallback,
        data: *mut c_void,
    },
    Deferred {
        id: u64,
        cb: DeferredTeardownCallback,
        data: *mut c_void,
    },
}

/// Names one outstanding deferred teardown task.
pub struct DeferredTeardown {
    env: Weak<Env>,
    id: u64,
}

impl DeferredTeardown {
    pub(crate) fn new(env: Weak<Env>, id: u64) -> DeferredTeardown {
        DeferredTeardown { env, id }
    }

    /// Declares the associated work complete. Returns `false` when the task
    /// was already finished or the environment is gone.
    ///
    /// Finishing the last outstanding task of a destroying environment
    /// wakes the teardown-async handle, which closes the environment.
    pub fn finish(self) -> bool {
        let Some(env) = self.env.upgrade() else {
            return false;
        };

        let removed = {
            let mut queue = env.teardown_queue.borrow_mut();

            match queue
                .iter()
                .position(|task| matches!(task, TeardownTask::Deferred { id, .. } if *id == self.id))
            {
                Some(index) => {
                    queue.remove(index);
                    true
                }
                None => false,
            }
        };

        if !removed {
            return false;
        }

        env.outstanding.set(env.outstanding.get() - 1);

        if env.outstanding.get() == 0 && env.destroying.get() {
            env.signal_teardown();
        }

        true
    }
}

impl Env {
    /// Registers an immediate teardown callback. Callbacks run in reverse
    /// registration order during destroy.
    pub fn add_teardown_callback(&self, cb: TeardownCallback, data: *mut c_void) -> Result<()> {
        self.check_no_pending()?;

        self.teardown_queue
            .borrow_mut()
            .push(TeardownTask::Immediate { cb, data });

        Ok(())
    }

    /// Removes the most recent registration matching `(cb, data)`. A no-op
    /// once destroy has begun.
    pub fn remove_teardown_callback(&self, cb: TeardownCallback, data: *mut c_void) -> Result<()> {
        self.check_no_pending()?;

        if self.destroying.get() {
            return Ok(());
        }

        let mut queue = self.teardown_queue.borrow_mut();

        if let Some(index) = queue.iter().rposition(
            |task| matches!(task, TeardownTask::Immediate { cb: c, data: d } if *c == cb && *d == data),
        ) {
            queue.remove(index);
        }

        Ok(())
    }

    /// Registers a deferred teardown task. The environment will not close
    /// until the returned handle (also handed to `cb` during destroy) is
    /// finished.
    pub fn add_deferred_teardown_callback(
        &self,
        cb: DeferredTeardownCallback,
        data: *mut c_void,
    ) -> Result<DeferredTeardown> {
        self.check_no_pending()?;

        let id = self.next_teardown_id.get();
        self.next_teardown_id.set(id + 1);

        self.teardown_queue
            .borrow_mut()
            .push(TeardownTask::Deferred { id, cb, data });

        self.outstanding.set(self.outstanding.get() + 1);

        Ok(DeferredTeardown::new(self.weak.clone(), id))
    }
}
