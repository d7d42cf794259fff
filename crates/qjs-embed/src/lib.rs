//! A QuickJS backend for the engine-neutral JavaScript embedding API.
//!
//! This crate is glue: it translates between the engine's value model,
//! garbage collector and module machinery on one side, and the host's
//! event loop, native callbacks and manually-managed memory on the other.
//! The interesting parts are the ones a host cannot see:
//!
//! * **Handle scopes** root every wrapper the API hands out; closing a
//!   scope releases its engine references in insertion order.
//! * **References** persist across scopes and convert between strong and
//!   weak as their count crosses zero.
//! * The **depth counter** brackets every script-executing path; when it
//!   returns to zero, microtasks drain and uncaught exceptions surface.
//! * The **teardown queue** lets hosts block environment disposal on
//!   outstanding work.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use qjs_embed::{Env, EnvOptions, Platform, PlatformOptions};
//! # fn host_loop() -> Rc<dyn qjs_embed::EventLoop> { unimplemented!() }
//!
//! let event_loop = host_loop();
//! let platform = Platform::new(event_loop.clone(), PlatformOptions::default());
//! let env = Env::new(event_loop, platform, EnvOptions::default());
//!
//! let scope = env.open_handle_scope();
//!
//! let source = env.create_string_utf8("6 * 7");
//! let result = env.run_script("demo", &source).unwrap();
//! assert_eq!(env.get_value_int32(&result), 42);
//!
//! env.close_handle_scope(scope);
//! env.destroy();
//! ```

mod arraybuffer;
mod convert;
mod delegate;
mod env;
mod error;
mod event_loop;
mod finalizer;
mod function;
mod handle;
mod introspection;
mod module;
mod object;
mod platform;
mod promise;
mod reference;
pub mod sys;
mod teardown;

pub use arraybuffer::{
    BackingStore, DataViewInfo, DataViewView, TypedArrayInfo, TypedArrayType, TypedArrayView,
};
pub use convert::{StringEncoding, StringView, ValueType};
pub use delegate::DelegateCallbacks;
pub use env::{Env, EnvOptions};
pub use error::{Error, Result};
pub use event_loop::{AsyncHandle, EventLoop, LoopHandle};
pub use finalizer::{FinalizeCallback, TypeTag};
pub use function::{
    CallArgs, CallbackInfo, CallbackSignature, FunctionCallback, PropertyAttributes,
    PropertyDescriptor, SignatureType,
};
pub use handle::{EscapableHandleScope, HandleScope, Value};
pub use introspection::{HeapStatistics, Inspector, ThreadsafeFunction};
pub use module::{
    Module, ModuleEvaluateCallback, ModuleMetaCallback, ModuleResolveCallback,
};
pub use platform::{Platform, PlatformOptions};
pub use promise::{Deferred, PromiseState};
pub use reference::Reference;
pub use teardown::{DeferredTeardown, DeferredTeardownCallback, TeardownCallback};
