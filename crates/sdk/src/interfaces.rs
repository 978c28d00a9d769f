//! Host collaborator interfaces
//!
//! The animation core never renders or simulates physics itself. It talks to
//! the host through these traits, which the host (or a test) implements and
//! hands to a world at creation time.

use crate::math::Matrix3x4;

/// Raw entity identifier as seen by the host (slot index + generation)
pub type RawEntityHandle = u64;

/// Identifier of a physics ragdoll owned by the host physics engine
pub type PhysicsRagdollId = u64;

/// Render-to-texture shadow bookkeeping
pub trait ShadowManager: Send {
    /// Entity entered the PVS and wants a shadow
    fn create_shadow(&mut self, entity: RawEntityHandle);

    /// Entity left the PVS or was destroyed
    fn destroy_shadow(&mut self, entity: RawEntityHandle);

    /// Bones moved without a render trigger; the cached shadow must be redrawn
    fn mark_render_to_texture_shadow_dirty(&mut self, entity: RawEntityHandle);
}

/// Physics engine side of a ragdoll
pub trait RagdollPhysics: Send {
    /// Create a physics ragdoll posed with the given bone-to-world matrices
    ///
    /// # Returns
    /// The physics object id, or `None` if the model has no ragdoll collision data
    fn create_ragdoll(
        &mut self,
        entity: RawEntityHandle,
        model: &str,
        bones: &[Matrix3x4],
    ) -> Option<PhysicsRagdollId>;

    /// Copy the simulated bone-to-world matrices into `out`
    ///
    /// # Returns
    /// `false` until physics has produced at least one position for this ragdoll
    fn read_bone_transforms(&self, id: PhysicsRagdollId, out: &mut Vec<Matrix3x4>) -> bool;

    fn destroy_ragdoll(&mut self, id: PhysicsRagdollId);
}

/// Shadow manager that ignores every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NullShadowManager;

impl ShadowManager for NullShadowManager {
    fn create_shadow(&mut self, _entity: RawEntityHandle) {}
    fn destroy_shadow(&mut self, _entity: RawEntityHandle) {}
    fn mark_render_to_texture_shadow_dirty(&mut self, _entity: RawEntityHandle) {}
}

/// Physics backend with no ragdoll support
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRagdollPhysics;

impl RagdollPhysics for NullRagdollPhysics {
    fn create_ragdoll(
        &mut self,
        _entity: RawEntityHandle,
        _model: &str,
        _bones: &[Matrix3x4],
    ) -> Option<PhysicsRagdollId> {
        None
    }

    fn read_bone_transforms(&self, _id: PhysicsRagdollId, _out: &mut Vec<Matrix3x4>) -> bool {
        false
    }

    fn destroy_ragdoll(&mut self, _id: PhysicsRagdollId) {}
}
