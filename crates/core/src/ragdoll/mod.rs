//! Client ragdolls
//!
//! - [`RagdollInfo`] - parent-local pose snapshots and the unragdoll blend
//! - [`ClientRagdoll`] - the pending/active/fading/destroyed lifecycle
//! - [`RagdollLru`] - the cap on concurrent ragdolls

mod info;
mod lifecycle;
mod lru;

pub use info::RagdollInfo;
pub use lifecycle::{ClientRagdoll, Dissolve, HitboxFire, RagdollState};
pub use lru::RagdollLru;
