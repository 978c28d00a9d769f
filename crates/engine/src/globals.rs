//! Per-world frame state
//!
//! Holds the bone computation epoch, the frame clock, the current frame phase
//! and the bone access permission stack. One instance lives on each world and
//! is passed by reference into every per-frame call.

/// Epoch value an entity carries before its bones were ever computed
pub const INVALID_EPOCH: u64 = u64::MAX;

/// Where in the frame the world currently is
///
/// Frame order is data update, then simulation, then bone setup, then
/// rendering. Bone reads are only meaningful once setup has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FramePhase {
    /// Between frames
    #[default]
    Idle,
    /// Network callbacks are mutating sequence, cycle and pose fields
    DataUpdate,
    /// Clocks advance and client-side animation runs
    Simulate,
    /// Bones are being computed
    SetupBones,
    /// Consumers read published bones
    Render,
}

impl FramePhase {
    /// Whether bone matrices may be read in this phase
    pub fn allows_bone_reads(self) -> bool {
        matches!(self, Self::Simulate | Self::SetupBones | Self::Render)
    }
}

/// One level of the bone access permission stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoneAccess {
    pub allow_normal: bool,
    pub allow_view: bool,
    pub tag: &'static str,
}

impl BoneAccess {
    const DEFAULT: Self = Self {
        allow_normal: true,
        allow_view: true,
        tag: "default",
    };

    pub fn allows(&self, view_model: bool) -> bool {
        if view_model {
            self.allow_view
        } else {
            self.allow_normal
        }
    }
}

/// Frame state owned by a single world
#[derive(Debug)]
pub struct WorldGlobals {
    /// Bone computation epoch, bumped once per rendered frame
    model_bone_counter: u64,

    /// Simulation time of the current frame
    pub curtime: f32,

    /// Duration of the current frame
    pub frametime: f32,

    /// Number of frames begun
    pub framecount: u64,

    phase: FramePhase,

    /// Bottom entry is the current permission, pushes shadow it
    bone_access: Vec<BoneAccess>,

    /// When false, the bone access stack is tracked but never denies
    pub enforce_bone_access: bool,
}

impl Default for WorldGlobals {
    fn default() -> Self {
        Self::new(true)
    }
}

impl WorldGlobals {
    /// Create new WorldGlobals
    ///
    /// # Arguments
    /// * `enforce_bone_access` - Deny bone reads when the permission stack disallows them
    pub fn new(enforce_bone_access: bool) -> Self {
        Self {
            model_bone_counter: 0,
            curtime: 0.0,
            frametime: 0.0,
            framecount: 0,
            phase: FramePhase::Idle,
            bone_access: vec![BoneAccess::DEFAULT],
            enforce_bone_access,
        }
    }

    /// Current bone computation epoch
    #[inline]
    pub fn model_bone_counter(&self) -> u64 {
        self.model_bone_counter
    }

    /// Bump the epoch, invalidating every entity's computed bones
    pub fn invalidate_bone_caches(&mut self) {
        self.model_bone_counter += 1;
        tracing::trace!(epoch = self.model_bone_counter, "Bone caches invalidated");
    }

    /// Start a new frame at `curtime`
    ///
    /// Advances the clock and the epoch and resets the frame phase.
    pub fn begin_frame(&mut self, curtime: f32, frametime: f32) {
        self.curtime = curtime;
        self.frametime = frametime.max(0.0);
        self.framecount += 1;
        self.phase = FramePhase::Idle;
        self.invalidate_bone_caches();

        if self.bone_access.len() > 1 {
            tracing::warn!(
                depth = self.bone_access.len() - 1,
                top = self.bone_access.last().map(|a| a.tag).unwrap_or_default(),
                "Bone access stack not balanced at frame start"
            );
            self.bone_access.truncate(1);
        }
    }

    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: FramePhase) {
        if phase < self.phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "Frame phase moved backwards");
        }
        self.phase = phase;
    }

    /// Set the base permission (bottom of the stack)
    pub fn allow_bone_access(&mut self, allow_normal: bool, allow_view: bool) {
        if let Some(base) = self.bone_access.first_mut() {
            base.allow_normal = allow_normal;
            base.allow_view = allow_view;
        }
    }

    /// Push a temporary permission
    pub fn push_allow_bone_access(&mut self, allow_normal: bool, allow_view: bool, tag: &'static str) {
        self.bone_access.push(BoneAccess {
            allow_normal,
            allow_view,
            tag,
        });
    }

    /// Pop the permission pushed with the matching tag
    ///
    /// # Returns
    /// `false` if the stack was empty or the tag did not match the top entry
    pub fn pop_bone_access(&mut self, tag: &'static str) -> bool {
        if self.bone_access.len() <= 1 {
            tracing::warn!(tag, "Bone access pop without matching push");
            return false;
        }

        match self.bone_access.pop() {
            Some(top) if top.tag == tag => true,
            Some(top) => {
                tracing::warn!(expected = tag, found = top.tag, "Bone access stack mismatch");
                false
            }
            None => false,
        }
    }

    /// Run `f` with a temporary bone access permission, restoring the prior one afterwards
    pub fn with_bone_access<R>(
        &mut self,
        allow_normal: bool,
        allow_view: bool,
        tag: &'static str,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let depth = self.bone_access.len();
        self.push_allow_bone_access(allow_normal, allow_view, tag);
        let result = f(self);
        self.bone_access.truncate(depth);
        result
    }

    /// Current permission (top of the stack)
    pub fn bone_access(&self) -> BoneAccess {
        self.bone_access
            .last()
            .copied()
            .unwrap_or(BoneAccess::DEFAULT)
    }

    /// Check whether bones of this class of model may be touched right now
    pub fn is_bone_access_allowed(&self, view_model: bool) -> bool {
        !self.enforce_bone_access || self.bone_access().allows(view_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_frame_bumps_epoch() {
        let mut globals = WorldGlobals::default();
        let before = globals.model_bone_counter();
        globals.begin_frame(1.0, 0.016);
        assert_eq!(globals.model_bone_counter(), before + 1);
        assert_eq!(globals.framecount, 1);
        assert_eq!(globals.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_push_pop_restores_permission() {
        let mut globals = WorldGlobals::default();
        assert!(globals.is_bone_access_allowed(false));

        globals.push_allow_bone_access(false, true, "render_view");
        assert!(!globals.is_bone_access_allowed(false));
        assert!(globals.is_bone_access_allowed(true));

        assert!(globals.pop_bone_access("render_view"));
        assert!(globals.is_bone_access_allowed(false));
        assert!(!globals.pop_bone_access("render_view"));
    }

    #[test]
    fn test_with_bone_access_is_scoped() {
        let mut globals = WorldGlobals::default();
        let inside = globals.with_bone_access(false, false, "scoped", |g| {
            g.is_bone_access_allowed(false) || g.is_bone_access_allowed(true)
        });
        assert!(!inside);
        assert!(globals.is_bone_access_allowed(false));
    }

    #[test]
    fn test_unenforced_always_allows() {
        let mut globals = WorldGlobals::new(false);
        globals.allow_bone_access(false, false);
        assert!(globals.is_bone_access_allowed(false));
        assert!(globals.is_bone_access_allowed(true));
    }

    #[test]
    fn test_unbalanced_stack_is_reset_at_frame_start() {
        let mut globals = WorldGlobals::default();
        globals.push_allow_bone_access(false, false, "leaked");
        globals.begin_frame(0.5, 0.016);
        assert_eq!(globals.bone_access().tag, "default");
    }

    #[test]
    fn test_phase_reads() {
        assert!(!FramePhase::DataUpdate.allows_bone_reads());
        assert!(FramePhase::Render.allows_bone_reads());
    }
}
