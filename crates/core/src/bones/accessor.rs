//! Per-entity bone matrix storage
//!
//! The accessor owns an entity's bone-to-world matrices and gates every
//! checked read or write on three conditions:
//!
//! - bone access is allowed for this class of model (normal vs view model)
//! - the matrices were computed in the current bone computation epoch
//! - the bone's flags intersect the mask that was computed
//!
//! Raw slices ([`BoneAccessor::bones`]) skip those checks and are used for
//! fallbacks that deliberately read the last known pose.

use studioanim_engine::{AnimError, AnimResult, InvalidStateError, WorldGlobals, INVALID_EPOCH};
use studioanim_sdk::{BoneFlags, BoneMask, Matrix3x4, StudioHdr};

#[derive(Debug, Clone)]
pub struct BoneAccessor {
    bones: Vec<Matrix3x4>,
    flags: Vec<BoneFlags>,
    readable: BoneMask,
    writable: BoneMask,
    epoch: u64,
    view_model: bool,
}

impl Default for BoneAccessor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BoneAccessor {
    pub fn new(view_model: bool) -> Self {
        Self {
            bones: Vec::new(),
            flags: Vec::new(),
            readable: BoneMask::empty(),
            writable: BoneMask::empty(),
            epoch: INVALID_EPOCH,
            view_model,
        }
    }

    /// Size storage for a model, resetting every bone to identity
    pub fn init(&mut self, hdr: &StudioHdr) {
        self.bones.clear();
        self.bones.resize(hdr.num_bones(), Matrix3x4::IDENTITY);
        self.flags = hdr.bones.iter().map(|b| b.flags).collect();
        self.reset(INVALID_EPOCH);
    }

    /// Forget what was computed, starting a new epoch
    pub fn reset(&mut self, epoch: u64) {
        self.readable = BoneMask::empty();
        self.writable = BoneMask::empty();
        self.epoch = epoch;
    }

    #[inline]
    pub fn num_bones(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_view_model(&self) -> bool {
        self.view_model
    }

    pub fn set_view_model(&mut self, view_model: bool) {
        self.view_model = view_model;
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn readable_bones(&self) -> BoneMask {
        self.readable
    }

    pub fn set_readable_bones(&mut self, mask: BoneMask) {
        self.readable = mask;
    }

    #[inline]
    pub fn writable_bones(&self) -> BoneMask {
        self.writable
    }

    pub fn set_writable_bones(&mut self, mask: BoneMask) {
        self.writable = mask;
    }

    /// Unchecked view of every bone
    pub fn bones(&self) -> &[Matrix3x4] {
        &self.bones
    }

    /// Unchecked mutable view, for the setup pass that fills the matrices
    pub fn bones_mut(&mut self) -> &mut [Matrix3x4] {
        &mut self.bones
    }

    /// Whether the bone was computed under `mask`
    pub fn is_bone_in_mask(&self, bone: usize, mask: BoneMask) -> bool {
        self.flags
            .get(bone)
            .is_some_and(|flags| flags.intersects(mask))
    }

    fn check(&self, globals: &WorldGlobals, bone: usize, mask: BoneMask) -> AnimResult<()> {
        if !globals.is_bone_access_allowed(self.view_model) {
            return Err(InvalidStateError::BoneAccessDenied {
                view_model: self.view_model,
            }
            .into());
        }

        if bone >= self.bones.len() {
            return Err(AnimError::BoneOutOfRange {
                index: bone,
                count: self.bones.len(),
            });
        }

        let current = globals.model_bone_counter();
        if self.epoch != current {
            return Err(InvalidStateError::BonesStale {
                computed: self.epoch,
                current,
            }
            .into());
        }

        if !self.is_bone_in_mask(bone, mask) {
            return Err(InvalidStateError::BonesNotComputed {
                bone,
                epoch: current,
            }
            .into());
        }

        Ok(())
    }

    /// Read a bone computed this epoch
    pub fn get_bone(&self, globals: &WorldGlobals, bone: usize) -> AnimResult<&Matrix3x4> {
        self.check(globals, bone, self.readable)?;
        Ok(&self.bones[bone])
    }

    /// Write a bone computed this epoch
    ///
    /// Used by correction passes (attachments, procedural bones) after setup.
    /// The reference must not outlive the current frame.
    pub fn get_bone_for_write(
        &mut self,
        globals: &WorldGlobals,
        bone: usize,
    ) -> AnimResult<&mut Matrix3x4> {
        self.check(globals, bone, self.writable)?;
        Ok(&mut self.bones[bone])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::arm_model;

    fn computed(globals: &WorldGlobals) -> BoneAccessor {
        let mut accessor = BoneAccessor::new(false);
        accessor.init(&arm_model());
        accessor.reset(globals.model_bone_counter());
        accessor.set_readable_bones(BoneMask::USED_BY_ANYTHING);
        accessor.set_writable_bones(BoneMask::USED_BY_ANYTHING);
        accessor
    }

    #[test]
    fn test_read_after_compute() {
        let globals = WorldGlobals::default();
        let accessor = computed(&globals);
        assert_eq!(*accessor.get_bone(&globals, 1).unwrap(), Matrix3x4::IDENTITY);
    }

    #[test]
    fn test_read_before_compute_fails() {
        let globals = WorldGlobals::default();
        let mut accessor = BoneAccessor::new(false);
        accessor.init(&arm_model());

        assert!(matches!(
            accessor.get_bone(&globals, 0),
            Err(AnimError::InvalidState(InvalidStateError::BonesStale { .. }))
        ));

        accessor.reset(globals.model_bone_counter());
        assert!(matches!(
            accessor.get_bone(&globals, 0),
            Err(AnimError::InvalidState(InvalidStateError::BonesNotComputed { bone: 0, .. }))
        ));
    }

    #[test]
    fn test_stale_after_epoch_bump() {
        let mut globals = WorldGlobals::default();
        let accessor = computed(&globals);
        globals.begin_frame(1.0, 0.1);
        assert!(accessor.get_bone(&globals, 0).is_err());
    }

    #[test]
    fn test_access_denied_by_permission_stack() {
        let mut globals = WorldGlobals::default();
        let mut accessor = computed(&globals);

        globals.push_allow_bone_access(false, true, "view_only");
        assert!(matches!(
            accessor.get_bone_for_write(&globals, 0),
            Err(AnimError::InvalidState(InvalidStateError::BoneAccessDenied { view_model: false }))
        ));

        accessor.set_view_model(true);
        assert!(accessor.get_bone(&globals, 0).is_ok());
        globals.pop_bone_access("view_only");
    }

    #[test]
    fn test_out_of_range() {
        let globals = WorldGlobals::default();
        let accessor = computed(&globals);
        assert!(matches!(
            accessor.get_bone(&globals, 99),
            Err(AnimError::BoneOutOfRange { index: 99, .. })
        ));
    }
}
