//! Entity kinds and capabilities
//!
//! Entities are one plain aggregate, [`AnimatingEntity`](super::AnimatingEntity),
//! tagged with an [`EntityKind`]. Behaviour that differs per kind is
//! dispatched on the tag; behaviour other systems rely on is exposed through
//! the small capability traits below.

use bitflags::bitflags;

use studioanim_engine::{AnimResult, WorldGlobals};
use studioanim_sdk::{Matrix3x4, RawEntityHandle, ShadowManager, Vec3};

use crate::anim::AnimEvent;
use crate::ragdoll::{ClientRagdoll, RagdollState};

bitflags! {
    /// What the world's client-side animation pass advances for an entity
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientAnimFlags: u32 {
        /// Advance sequence and cycle locally
        const SEQUENCE_CYCLE = 1 << 0;
        /// Advance overlay layers locally
        const LAYERS = 1 << 1;
    }
}

/// Per-kind tag of an entity
#[derive(Debug, Clone, Default)]
pub enum EntityKind {
    /// Plain animated model
    #[default]
    Base,
    /// Dynamic prop
    Prop,
    /// First-person view model, gated by the view model bone access flag
    ViewModel,
    /// Physics-driven stand-in for a dead entity
    Ragdoll(Box<ClientRagdoll>),
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Prop => "prop",
            Self::ViewModel => "view_model",
            Self::Ragdoll(_) => "ragdoll",
        }
    }

    #[inline]
    pub fn is_view_model(&self) -> bool {
        matches!(self, Self::ViewModel)
    }

    pub fn ragdoll(&self) -> Option<&ClientRagdoll> {
        match self {
            Self::Ragdoll(r) => Some(&**r),
            _ => None,
        }
    }

    pub fn ragdoll_mut(&mut self) -> Option<&mut ClientRagdoll> {
        match self {
            Self::Ragdoll(r) => Some(&mut **r),
            _ => None,
        }
    }

    /// Lifecycle state, `Animated` for every non-ragdoll kind
    pub fn ragdoll_state(&self) -> RagdollState {
        self.ragdoll().map_or(RagdollState::Animated, |r| r.state())
    }

    /// What the client-side animation pass should advance for this kind
    pub fn compute_client_side_animation_flags(&self, client_side_animation: bool) -> ClientAnimFlags {
        if !client_side_animation {
            return ClientAnimFlags::empty();
        }
        match self {
            Self::Base | Self::ViewModel => ClientAnimFlags::SEQUENCE_CYCLE | ClientAnimFlags::LAYERS,
            // props play their sequence but carry no gestures
            Self::Prop => ClientAnimFlags::SEQUENCE_CYCLE,
            // physics drives the pose
            Self::Ragdoll(_) => ClientAnimFlags::empty(),
        }
    }
}

/// Something that can be drawn
pub trait Renderable {
    fn should_draw(&self) -> bool;

    /// 0 (invisible) to 255 (opaque)
    fn render_alpha(&self) -> f32;

    fn render_origin(&self) -> Vec3;
}

/// Something with bone-to-world matrices
pub trait BoneProvider {
    fn num_bones(&self) -> usize;

    fn lookup_bone(&self, name: &str) -> Option<usize>;

    /// Read a bone computed this frame
    fn bone_to_world(&self, globals: &WorldGlobals, bone: usize) -> AnimResult<&Matrix3x4>;
}

/// Something that updates once per frame
pub trait Simulatable {
    /// Run one frame of simulation, collecting any animation events reached
    ///
    /// # Returns
    /// `false` once the entity wants to be removed
    fn simulate(&mut self, curtime: f32, frametime: f32, events: &mut Vec<AnimEvent>) -> bool;
}

/// Something that reacts to entering or leaving the potentially visible set
pub trait PvsNotifiable {
    fn on_pvs_status_changed(
        &mut self,
        entity: RawEntityHandle,
        in_pvs: bool,
        shadows: &mut dyn ShadowManager,
    );
}

impl PvsNotifiable for ClientRagdoll {
    fn on_pvs_status_changed(
        &mut self,
        entity: RawEntityHandle,
        in_pvs: bool,
        shadows: &mut dyn ShadowManager,
    ) {
        ClientRagdoll::on_pvs_status_changed(self, entity, in_pvs, shadows);
    }
}
