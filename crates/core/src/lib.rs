//! studioanim Core - Animation, Bones and Ragdolls
//!
//! This crate contains the per-entity animation pipeline of a studio model
//! client: sequence playback, pose blending, bone setup and caching, bone
//! merging for attached models, and the ragdoll hand-off.
//!
//! # Modules
//!
//! - [`anim`] - Playback clock, events, pose blending, transitions and overlays
//! - [`bones`] - Bone accessor, bone cache pool and bone merge cache
//! - [`ragdoll`] - Ragdoll snapshot, lifecycle and LRU
//! - [`entities`] - The animated entity aggregate and its handles
//! - [`world`] - One simulation context and its frame driver
//! - [`config`] - TOML configuration
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and engine crates for convenience:
//! - [`sdk`] - Studio model types and bone math
//! - [`engine`] - World globals, model registry and errors

pub use studioanim_engine as engine;
pub use studioanim_sdk as sdk;

pub mod anim;
pub mod bones;
pub mod config;
pub mod entities;
pub mod ragdoll;
pub mod world;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used items
pub use anim::{AnimEvent, EventListenerKey, HookResult};
pub use config::{AnimConfig, ConfigError, ConfigResult};
pub use entities::{AnimatingEntity, DataUpdateType, EntityHandle, EntityKind, NetworkUpdate};
pub use ragdoll::RagdollState;
pub use studioanim_engine::{AnimError, AnimResult, InvalidStateError};
pub use world::{FrameStats, World};
