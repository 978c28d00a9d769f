//! C ABI for host engines

pub mod exports;
pub mod host;
mod registry;

pub use host::HostCallbacks;
