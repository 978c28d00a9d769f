//! studioanim plugin - FFI layer
//!
//! This crate provides the C ABI a host engine drives the animation core
//! through. It compiles to a cdylib (.so/.dll); every world the host creates
//! lives in a process-wide registry and is addressed by an opaque `u64`.

pub mod ffi;
