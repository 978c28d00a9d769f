//! studioanim Engine - World Globals and Model Registry
//!
//! This crate handles:
//! - Per-world frame state (bone computation epoch, clock, frame phase)
//! - The bone access permission stack used to catch ordering bugs
//! - Registering and looking up immutable studio models
//! - The error taxonomy shared by the animation core
//!
//! # Architecture
//!
//! Nothing here is process-global. A host creates one [`WorldGlobals`] and one
//! [`ModelRegistry`] per simulation context and threads them through every
//! per-frame call, so a listen server can run a client and a server world side
//! by side.

pub mod error;
pub mod globals;
pub mod loader;

pub use error::{AnimError, AnimResult, InvalidStateError};
pub use globals::{BoneAccess, FramePhase, WorldGlobals, INVALID_EPOCH};
pub use loader::{fnv1a_32, ModelHandle, ModelRegistry};
