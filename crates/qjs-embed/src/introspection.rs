//! Introspection surfaces this backend does not support.
//!
//! The operations exist so hosts written against the engine-neutral
//! contract keep compiling and linking; each one throws an ordinary
//! `Error` with the message `"Unsupported operation"` and reports the
//! pending exception.

use std::os::raw::c_void;

use crate::{env::Env, error::Result, handle::Value};

/// Cross-thread function invocation is not supported by this backend.
pub struct ThreadsafeFunction {
    _private: (),
}

impl ThreadsafeFunction {
    pub fn context(&self) -> Option<*mut c_void> {
        None
    }

    pub fn call(&self, _data: *mut c_void) -> Result<()> {
        Err(crate::error::Error::UncaughtException)
    }

    pub fn acquire(&self) -> Result<()> {
        Err(crate::error::Error::UncaughtException)
    }

    pub fn release(&self) -> Result<()> {
        Err(crate::error::Error::UncaughtException)
    }
}

/// Inspector sessions are not supported by this backend.
pub struct Inspector {
    _private: (),
}

/// Engine heap figures; never produced by this backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStatistics {
    pub total_heap_size: usize,
    pub used_heap_size: usize,
    pub external_memory: i64,
}

impl Env {
    pub fn create_threadsafe_function(
        &self,
        _function: &Value,
        _queue_limit: usize,
        _initial_thread_count: usize,
    ) -> Result<ThreadsafeFunction> {
        self.unsupported()
    }

    pub fn ref_threadsafe_function(&self, _function: &ThreadsafeFunction) -> Result<()> {
        self.unsupported()
    }

    pub fn unref_threadsafe_function(&self, _function: &ThreadsafeFunction) -> Result<()> {
        self.unsupported()
    }

    pub fn get_heap_statistics(&self) -> Result<HeapStatistics> {
        self.unsupported()
    }

    pub fn create_inspector(&self) -> Result<Inspector> {
        self.unsupported()
    }

    pub fn connect_inspector(&self, _inspector: &Inspector) -> Result<()> {
        self.unsupported()
    }

    pub fn send_inspector_request(&self, _inspector: &Inspector, _message: &Value) -> Result<()> {
        self.unsupported()
    }

    /// Environments hold exactly one context; additional contexts are not
    /// supported.
    pub fn create_context(&self) -> Result<()> {
        self.unsupported()
    }

    pub fn destroy_context(&self) -> Result<()> {
        self.unsupported()
    }

    pub fn enter_context(&self) -> Result<()> {
        self.unsupported()
    }

    pub fn exit_context(&self) -> Result<()> {
        self.unsupported()
    }
}
