//! Fixed engine limits
//!
//! These mirror the compile-time array sizes used by the studio model format.
//! Models that exceed them are rejected by the model registry.

/// Maximum number of bones in a single studio model
pub const MAX_STUDIO_BONES: usize = 128;

/// Maximum number of pose parameters per entity
pub const MAX_STUDIO_POSE_PARAM: usize = 24;

/// Maximum number of animation overlay layers per entity
pub const MAX_OVERLAYS: usize = 15;

/// Number of per-hitbox fire slots on a burning ragdoll
pub const NUM_HITBOX_FIRES: usize = 10;

/// Cycle value the event scanner starts from so frame-0 events fire
pub const EVENT_CYCLE_START: f32 = -0.01;
