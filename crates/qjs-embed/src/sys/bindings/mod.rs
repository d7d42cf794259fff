//! # FFI bindings to the QuickJS C API
//!
//! Hand-maintained declarations of the engine symbols the embedding layer
//! calls, plus the `#[repr(C)]` types they traffic in.
//!
//! The engine itself (quickjs-ng) is compiled and linked by the bundled
//! build in `rquickjs-sys`; nothing else from that crate is used. The
//! declarations here are kept in lockstep with the engine's `quickjs.h`:
//!
//! * Only real exported symbols are declared. Helpers that the header
//!   defines as `static inline` (value literals, tag predicates, reference
//!   counting) are reimplemented in Rust in [`super`] instead.
//! * Parameter and return types follow the header, with `JS_BOOL`/`bool`
//!   mapped to `bool` and `size_t` to `usize`.

pub use self::{functions::*, types::*};

mod functions;
mod types;
