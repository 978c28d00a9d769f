//! Client ragdoll lifecycle
//!
//! ```text
//! Animated -> RagdollPending -> RagdollActive -> FadingOut -> Destroyed
//! ```
//!
//! A ragdoll is pending from creation until physics reports the first
//! simulated pose; only then is its snapshot handed out. Fading, release,
//! burning and dissolving all funnel through `FadingOut`, and the owning
//! world removes the entity once it reaches `Destroyed`.

use std::fmt;

use tracing::{debug, trace};

use studioanim_engine::{AnimResult, InvalidStateError};
use studioanim_sdk::{
    Matrix3x4, PhysicsRagdollId, RagdollPhysics, RawEntityHandle, ShadowManager, NUM_HITBOX_FIRES,
};

use super::RagdollInfo;
use crate::entities::EntityHandle;

/// Where an entity is in its ragdoll lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RagdollState {
    /// Driven by animation, not a ragdoll
    #[default]
    Animated,
    /// Created, waiting for the first physics pose
    RagdollPending,
    /// Physics owns the pose
    RagdollActive,
    /// Alpha is dropping toward removal
    FadingOut,
    /// Ready to be removed by the world
    Destroyed,
}

impl fmt::Display for RagdollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Animated => "animated",
            Self::RagdollPending => "pending",
            Self::RagdollActive => "active",
            Self::FadingOut => "fading",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// A per-hitbox burn that scales the hitbox over time
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HitboxFire {
    pub hitbox: Option<usize>,
    pub scale_start: f32,
    pub scale_end: f32,
    pub time_start: f32,
    pub time_end: f32,
}

impl HitboxFire {
    /// Scale at `curtime`, easing linearly from start to end
    pub fn scale(&self, curtime: f32) -> f32 {
        if self.hitbox.is_none() {
            return 0.0;
        }
        let span = self.time_end - self.time_start;
        if span <= 0.0 {
            return self.scale_end;
        }
        let t = ((curtime - self.time_start) / span).clamp(0.0, 1.0);
        self.scale_start + (self.scale_end - self.scale_start) * t
    }
}

/// Dissolve effect carried over from the entity that became this ragdoll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dissolve {
    pub start_time: f32,
    pub duration: f32,
}

/// Ragdoll-specific state of a client ragdoll entity
#[derive(Debug, Clone)]
pub struct ClientRagdoll {
    state: RagdollState,
    /// Entity whose pose seeded this ragdoll
    pub source: Option<EntityHandle>,
    physics_id: Option<PhysicsRagdollId>,
    snapshot: RagdollInfo,
    /// Bone-to-world the ragdoll was created with
    seed_bones: Vec<Matrix3x4>,
    physics_bones: Vec<Matrix3x4>,
    captures: u32,
    alpha: f32,
    fade_speed: f32,
    release_requested: bool,
    /// Player ragdolls are evicted last
    pub important: bool,
    fires: [HitboxFire; NUM_HITBOX_FIRES],
    dissolve: Option<Dissolve>,
    in_pvs: bool,
}

impl ClientRagdoll {
    /// Create a pending ragdoll from a snapshot of the source's animated pose
    pub fn new(
        source: Option<EntityHandle>,
        physics_id: Option<PhysicsRagdollId>,
        snapshot: RagdollInfo,
        seed_bones: Vec<Matrix3x4>,
        fade_speed: f32,
    ) -> Self {
        Self {
            state: RagdollState::RagdollPending,
            source,
            physics_id,
            snapshot,
            seed_bones,
            physics_bones: Vec::new(),
            captures: 1,
            alpha: 255.0,
            fade_speed,
            release_requested: false,
            important: false,
            fires: [HitboxFire::default(); NUM_HITBOX_FIRES],
            dissolve: None,
            in_pvs: false,
        }
    }

    #[inline]
    pub fn state(&self) -> RagdollState {
        self.state
    }

    #[inline]
    pub fn physics_id(&self) -> Option<PhysicsRagdollId> {
        self.physics_id
    }

    /// Times the source pose was captured for this ragdoll
    pub fn snapshot_captures(&self) -> u32 {
        self.captures
    }

    #[inline]
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn is_release_requested(&self) -> bool {
        self.release_requested
    }

    pub fn in_pvs(&self) -> bool {
        self.in_pvs
    }

    pub fn dissolve(&self) -> Option<Dissolve> {
        self.dissolve
    }

    fn set_state(&mut self, state: RagdollState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Ragdoll state change");
            self.state = state;
        }
    }

    /// Pull the latest simulated pose from physics
    ///
    /// The first successful read moves a pending ragdoll to active.
    ///
    /// # Returns
    /// `true` if physics produced a pose
    pub fn vphysics_update(&mut self, physics: &dyn RagdollPhysics) -> bool {
        let Some(id) = self.physics_id else {
            return false;
        };
        if self.state == RagdollState::Destroyed {
            return false;
        }

        if !physics.read_bone_transforms(id, &mut self.physics_bones) {
            return false;
        }

        if self.state == RagdollState::RagdollPending {
            self.set_state(RagdollState::RagdollActive);
        }
        true
    }

    /// The pose snapshot taken at creation
    ///
    /// # Errors
    /// `RagdollNotReady` until physics has produced a pose; callers keep
    /// using the animated pose meanwhile
    pub fn retrieve_ragdoll_info(&self) -> AnimResult<&RagdollInfo> {
        match self.state {
            RagdollState::RagdollActive | RagdollState::FadingOut => Ok(&self.snapshot),
            _ => Err(InvalidStateError::RagdollNotReady.into()),
        }
    }

    /// Bones to render: simulated once active, the seed pose before that
    pub fn current_bones(&self) -> &[Matrix3x4] {
        if self.physics_bones.is_empty() {
            &self.seed_bones
        } else {
            &self.physics_bones
        }
    }

    /// Remove the ragdoll on the next think
    pub fn release_ragdoll(&mut self) {
        if self.state == RagdollState::Destroyed {
            return;
        }
        self.release_requested = true;
        self.set_state(RagdollState::FadingOut);
    }

    /// Start fading the ragdoll out
    pub fn fade_out(&mut self) {
        match self.state {
            RagdollState::RagdollPending | RagdollState::RagdollActive => {
                self.set_state(RagdollState::FadingOut);
            }
            _ => {}
        }
    }

    /// Burn every hitbox, shrinking toward `scale_end` over `duration`
    ///
    /// Only the first [`NUM_HITBOX_FIRES`] hitboxes burn. The ragdoll fades
    /// out once the burn completes.
    pub fn ignite(&mut self, num_hitboxes: usize, curtime: f32, duration: f32, scale_end: f32) {
        for (index, fire) in self.fires.iter_mut().enumerate() {
            *fire = if index < num_hitboxes {
                HitboxFire {
                    hitbox: Some(index),
                    scale_start: 1.0,
                    scale_end,
                    time_start: curtime,
                    time_end: curtime + duration.max(0.0),
                }
            } else {
                HitboxFire::default()
            };
        }
        trace!(fires = num_hitboxes.min(NUM_HITBOX_FIRES), "Ragdoll ignited");
    }

    /// Scale of one fire slot at `curtime`, 0 for an unused slot
    pub fn fire_scale(&self, slot: usize, curtime: f32) -> f32 {
        self.fires.get(slot).map_or(0.0, |fire| fire.scale(curtime))
    }

    pub fn is_burning(&self) -> bool {
        self.fires.iter().any(|f| f.hitbox.is_some())
    }

    /// Continue a dissolve the source entity had started
    pub fn transfer_dissolve_from(&mut self, start_time: f32, duration: f32) {
        self.dissolve = Some(Dissolve {
            start_time,
            duration,
        });
    }

    /// Per-frame state update
    ///
    /// # Returns
    /// The state after the update
    pub fn think(&mut self, curtime: f32, frametime: f32) -> RagdollState {
        if self.release_requested {
            self.set_state(RagdollState::Destroyed);
            return self.state;
        }

        let burn_done = self.is_burning()
            && self
                .fires
                .iter()
                .filter(|f| f.hitbox.is_some())
                .all(|f| curtime >= f.time_end);
        let dissolve_done = self
            .dissolve
            .is_some_and(|d| curtime >= d.start_time + d.duration);

        if self.state == RagdollState::RagdollActive && (burn_done || dissolve_done) {
            self.set_state(RagdollState::FadingOut);
        }

        if self.state == RagdollState::FadingOut {
            self.alpha = (self.alpha - self.fade_speed * frametime).max(0.0);
            if self.alpha <= 0.0 {
                // removed on the next think
                self.release_requested = true;
            }
        }

        self.state
    }

    /// Physics object and shadow are released; the entity is gone
    pub fn destroy(
        &mut self,
        entity: RawEntityHandle,
        physics: &mut dyn RagdollPhysics,
        shadows: &mut dyn ShadowManager,
    ) {
        if let Some(id) = self.physics_id.take() {
            physics.destroy_ragdoll(id);
        }
        if self.in_pvs {
            shadows.destroy_shadow(entity);
            self.in_pvs = false;
        }
        self.set_state(RagdollState::Destroyed);
    }

    /// Shadows exist only while the ragdoll is potentially visible
    pub fn on_pvs_status_changed(
        &mut self,
        entity: RawEntityHandle,
        in_pvs: bool,
        shadows: &mut dyn ShadowManager,
    ) {
        if in_pvs == self.in_pvs {
            return;
        }
        self.in_pvs = in_pvs;
        if in_pvs {
            shadows.create_shadow(entity);
        } else {
            shadows.destroy_shadow(entity);
        }
    }
}
