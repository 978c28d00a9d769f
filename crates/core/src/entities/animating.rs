//! Animated model entities
//!
//! [`AnimatingEntity`] is the per-entity aggregate behind every animated
//! model: playback clock, pose parameters, sequence transitions, overlays,
//! bone storage, attachments, the bone merge cache for followers and the
//! unragdoll blend. Bone setup runs in a fixed order:
//!
//! 1. sample the current sequence at the current cycle
//! 2. blend in sequences still fading out from earlier transitions
//! 3. accumulate overlay layers
//! 4. blend away from a ragdoll snapshot when coming out of a ragdoll
//! 5. concatenate parent-space transforms into bone-to-world matrices
//!
//! Results are kept per bone computation epoch. A second request in the same
//! epoch only recomputes when it asks for bones the first one did not.
//!
//! # Example
//!
//! ```ignore
//! use studioanim_core::entities::{AnimatingEntity, EntityKind};
//!
//! let mut entity = AnimatingEntity::new(EntityKind::Base, &config);
//! entity.set_model(handle, hdr);
//! entity.reset_sequence(entity.lookup_sequence("idle"));
//! entity.setup_bones(&globals, None, BoneFlags::USED_BY_ANYTHING, curtime)?;
//! let hand = entity.bone_to_world(&globals, entity.lookup_bone("weapon_hand").unwrap())?;
//! ```

use std::sync::Arc;

use tracing::{debug, trace};

use studioanim_engine::{
    AnimError, AnimResult, InvalidStateError, ModelHandle, WorldGlobals, INVALID_EPOCH,
};
use studioanim_sdk::glam::Mat3A;
use studioanim_sdk::{
    angle_matrix, matrix_angles, matrix_position, quaternion_matrix, BoneFlags, BoneMask,
    Matrix3x4, QAngle, RawEntityHandle, ShadowManager, StudioHdr, Vec3, MAX_STUDIO_POSE_PARAM,
};

use super::{
    BoneProvider, ClientAnimFlags, DataUpdateType, EntityHandle, EntityKind, NetworkUpdate,
    PvsNotifiable, Renderable, Simulatable,
};
use crate::anim::{
    calc_pose, default_pose_parameters, get_pose_parameter, pose_parameter_range,
    set_pose_parameter, AnimClock, AnimEvent, AnimationOverlays, BonePose, ClockAdvance,
    EventScanner, InterpolatedVar, PoseParameters, SequenceTransitioner,
};
use crate::bones::{BoneAccessor, BoneBitList, BoneCacheHandle, BoneMergeCache};
use crate::config::AnimConfig;
use crate::ragdoll::{RagdollInfo, RagdollState};

/// Bones of the entity being followed, already set up this epoch
#[derive(Debug, Clone, Copy)]
pub struct ParentBones<'a> {
    pub hdr: &'a Arc<StudioHdr>,
    pub bones: &'a [Matrix3x4],
}

/// An entity with a studio model
#[derive(Debug)]
pub struct AnimatingEntity {
    kind: EntityKind,
    model: Option<ModelHandle>,
    hdr: Option<Arc<StudioHdr>>,
    origin: Vec3,
    angles: QAngle,
    model_width_scale: f32,
    hidden: bool,

    clock: AnimClock,
    pose_params: PoseParameters,
    events: EventScanner,
    pending_wraps: u32,
    max_event_wraps: u32,
    transitioner: SequenceTransitioner,
    overlays: AnimationOverlays,

    accessor: BoneAccessor,
    bones_epoch: u64,
    accumulated_bone_mask: BoneMask,
    prev_bone_mask: BoneMask,
    computed: BoneBitList,
    last_setup_time: f32,
    setup_count: u64,
    bone_invalidations: u64,
    bone_cache: Option<BoneCacheHandle>,

    merge: BoneMergeCache,
    move_parent: Option<EntityHandle>,

    attachments: Vec<Matrix3x4>,
    attachments_epoch: u64,

    ragdoll_info: Option<RagdollInfo>,
    unragdoll_blend_time: f32,
    spawned_ragdoll: Option<EntityHandle>,

    client_side_animation: bool,
    no_interpolation: bool,
    interpolation_amount: f32,
    interp_cycle: InterpolatedVar<f32>,
    interp_pose: InterpolatedVar<PoseParameters>,
}

impl AnimatingEntity {
    pub fn new(kind: EntityKind, config: &AnimConfig) -> Self {
        let view_model = kind.is_view_model();
        Self {
            kind,
            model: None,
            hdr: None,
            origin: Vec3::ZERO,
            angles: QAngle::ZERO,
            model_width_scale: 1.0,
            hidden: false,

            clock: AnimClock::default(),
            pose_params: [0.0; MAX_STUDIO_POSE_PARAM],
            events: EventScanner::default(),
            pending_wraps: 0,
            max_event_wraps: config.max_event_wraps_per_advance,
            transitioner: SequenceTransitioner::new(),
            overlays: AnimationOverlays::new(),

            accessor: BoneAccessor::new(view_model),
            bones_epoch: INVALID_EPOCH,
            accumulated_bone_mask: BoneMask::empty(),
            prev_bone_mask: BoneMask::empty(),
            computed: BoneBitList::new(),
            last_setup_time: f32::MIN,
            setup_count: 0,
            bone_invalidations: 0,
            bone_cache: None,

            merge: BoneMergeCache::new(),
            move_parent: None,

            attachments: Vec::new(),
            attachments_epoch: INVALID_EPOCH,

            ragdoll_info: None,
            unragdoll_blend_time: config.unragdoll_blend_time,
            spawned_ragdoll: None,

            client_side_animation: false,
            no_interpolation: false,
            interpolation_amount: config.interpolation_amount,
            interp_cycle: InterpolatedVar::new(0.0),
            interp_pose: InterpolatedVar::default(),
        }
    }

    // ------------------------------------------------------------------
    // Kind and model
    // ------------------------------------------------------------------

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut EntityKind {
        &mut self.kind
    }

    pub fn ragdoll_state(&self) -> RagdollState {
        self.kind.ragdoll_state()
    }

    pub fn model(&self) -> Option<ModelHandle> {
        self.model
    }

    pub fn studio_hdr(&self) -> Option<&Arc<StudioHdr>> {
        self.hdr.as_ref()
    }

    /// Switch to a new model, resetting everything indexed by its tables
    pub fn set_model(&mut self, handle: ModelHandle, hdr: Arc<StudioHdr>) {
        debug!(model = %hdr.name, bones = hdr.num_bones(), "Entity model set");

        self.accessor.init(&hdr);
        self.pose_params = default_pose_parameters(&hdr);
        self.interp_pose.reset(self.pose_params);
        self.attachments = vec![Matrix3x4::IDENTITY; hdr.attachments.len()];
        self.transitioner.remove_all();
        self.overlays.clear();
        self.merge.invalidate();
        self.ragdoll_info = None;
        self.events = EventScanner::default();
        self.pending_wraps = 0;

        self.model = Some(handle);
        self.hdr = Some(hdr);
        self.reset_sequence_info();
        self.invalidate_bone_cache();
    }

    /// Pick up a reloaded asset registered under the same handle
    pub fn refresh_model(&mut self, hdr: Arc<StudioHdr>) {
        let same = self.hdr.as_ref().is_some_and(|old| Arc::ptr_eq(old, &hdr));
        if same {
            return;
        }

        match self.model {
            Some(handle) => self.set_model(handle, hdr),
            None => self.hdr = Some(hdr),
        }
    }

    pub fn clear_model(&mut self) {
        self.model = None;
        self.hdr = None;
        self.attachments.clear();
        self.merge.invalidate();
        self.invalidate_bone_cache();
    }

    fn hdr_or_err(&self) -> AnimResult<Arc<StudioHdr>> {
        self.hdr.clone().ok_or(AnimError::NoModel)
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn angles(&self) -> QAngle {
        self.angles
    }

    /// Move the entity; bones computed this frame are no longer valid
    pub fn set_abs_origin(&mut self, origin: Vec3) {
        if self.origin != origin {
            self.origin = origin;
            self.invalidate_bone_cache();
        }
    }

    pub fn set_abs_angles(&mut self, angles: QAngle) {
        if self.angles != angles {
            self.angles = angles;
            self.invalidate_bone_cache();
        }
    }

    pub fn model_width_scale(&self) -> f32 {
        self.model_width_scale
    }

    pub fn set_model_width_scale(&mut self, scale: f32) {
        if self.model_width_scale != scale {
            self.model_width_scale = scale;
            self.invalidate_bone_cache();
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Entity transform without the width scale
    pub fn entity_to_world(&self) -> Matrix3x4 {
        angle_matrix(self.angles, self.origin)
    }

    /// Entity transform with the model width scale applied to its x and y rows
    pub fn apply_bone_matrix_transform(&self, transform: &mut Matrix3x4) {
        if self.model_width_scale != 1.0 {
            let scale = Mat3A::from_diagonal(Vec3::new(self.model_width_scale, self.model_width_scale, 1.0));
            transform.matrix3 = scale * transform.matrix3;
        }
    }

    // ------------------------------------------------------------------
    // Sequences and playback
    // ------------------------------------------------------------------

    pub fn clock(&self) -> &AnimClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut AnimClock {
        &mut self.clock
    }

    #[inline]
    pub fn sequence(&self) -> i32 {
        self.clock.sequence
    }

    /// Change sequence, keeping cycle and event state
    pub fn set_sequence(&mut self, sequence: i32) {
        let Some(hdr) = self.hdr.clone() else {
            self.clock.sequence = sequence;
            return;
        };
        if self.clock.set_sequence(&hdr, sequence, &self.pose_params) {
            trace!(sequence, "Sequence changed");
            self.invalidate_bone_cache();
        }
    }

    /// Start `sequence` from the beginning
    pub fn reset_sequence(&mut self, sequence: i32) {
        match self.hdr.clone() {
            Some(hdr) => self.clock.reset_sequence(&hdr, sequence, &self.pose_params),
            None => self.clock.sequence = sequence,
        }
        self.invalidate_bone_cache();
    }

    /// Refresh cached info about the current sequence and flag it as new
    pub fn reset_sequence_info(&mut self) {
        if let Some(hdr) = self.hdr.clone() {
            self.clock.reset_sequence_info(&hdr, &self.pose_params);
        }
    }

    pub fn cycle(&self) -> f32 {
        self.clock.cycle
    }

    pub fn set_cycle(&mut self, cycle: f32) {
        if self.clock.cycle != cycle {
            self.clock.cycle = cycle;
            self.invalidate_bone_cache();
        }
    }

    pub fn playback_rate(&self) -> f32 {
        self.clock.playback_rate
    }

    pub fn set_playback_rate(&mut self, rate: f32) {
        self.clock.playback_rate = rate;
    }

    pub fn is_sequence_finished(&self) -> bool {
        self.clock.is_sequence_finished()
    }

    pub fn ground_speed(&self) -> f32 {
        self.clock.ground_speed()
    }

    /// Sequence index by label, -1 when the model has none by that name
    pub fn lookup_sequence(&self, label: &str) -> i32 {
        self.hdr
            .as_ref()
            .and_then(|hdr| hdr.find_sequence(label))
            .map_or(-1, |i| i as i32)
    }

    /// First sequence carrying `activity` with a positive weight, -1 if none
    pub fn select_weighted_sequence(&self, activity: &str) -> i32 {
        self.hdr
            .as_ref()
            .and_then(|hdr| hdr.find_activity(activity))
            .map_or(-1, |i| i as i32)
    }

    pub fn is_sequence_looping(&self, sequence: i32) -> bool {
        self.hdr
            .as_ref()
            .is_some_and(|hdr| hdr.is_sequence_looping(sequence))
    }

    /// Seconds one play-through of `sequence` takes, 0 for an unknown sequence
    pub fn sequence_duration(&self, sequence: i32) -> f32 {
        self.hdr
            .as_ref()
            .map_or(0.0, |hdr| hdr.sequence_duration(sequence, &self.pose_params))
    }

    pub fn sequence_cycle_rate(&self, sequence: i32) -> f32 {
        self.hdr
            .as_ref()
            .map_or(0.0, |hdr| hdr.sequence_cycle_rate(sequence, &self.pose_params))
    }

    pub fn sequence_ground_speed(&self, sequence: i32) -> f32 {
        self.hdr
            .as_ref()
            .map_or(0.0, |hdr| hdr.sequence_ground_speed(sequence, &self.pose_params))
    }

    /// Advance the clock to `curtime`
    ///
    /// Wraps are remembered so the next event scan can replay every loop.
    pub fn studio_frame_advance(&mut self, curtime: f32) -> ClockAdvance {
        let Some(hdr) = self.hdr.clone() else {
            return ClockAdvance::default();
        };

        let advance = self.clock.frame_advance(&hdr, &self.pose_params, curtime, 0.0);
        self.pending_wraps = self.pending_wraps.saturating_add(advance.wraps);
        if advance.finished_now {
            trace!(sequence = self.clock.sequence, "Sequence finished");
        }
        if advance.interval > 0.0 {
            self.invalidate_bone_cache();
        }
        advance
    }

    /// Collect events the clock passed since the last scan
    pub fn do_animation_events(&mut self, out: &mut Vec<AnimEvent>) {
        let Some(hdr) = self.hdr.clone() else {
            return;
        };
        let wraps = std::mem::take(&mut self.pending_wraps);
        self.events
            .scan(&hdr, &self.clock, wraps, self.max_event_wraps, out);
    }

    pub fn overlays(&self) -> &AnimationOverlays {
        &self.overlays
    }

    pub fn overlays_mut(&mut self) -> &mut AnimationOverlays {
        &mut self.overlays
    }

    pub fn transitioner(&self) -> &SequenceTransitioner {
        &self.transitioner
    }

    // ------------------------------------------------------------------
    // Pose parameters
    // ------------------------------------------------------------------

    /// Encoded (0..1) values
    pub fn pose_parameters(&self) -> &PoseParameters {
        &self.pose_params
    }

    /// Copy the encoded pose parameters into `out`, each clamped to 0..1
    pub fn get_pose_parameters(&self, out: &mut [f32]) {
        for (slot, value) in out.iter_mut().zip(self.pose_params.iter()) {
            *slot = value.clamp(0.0, 1.0);
        }
    }

    pub fn lookup_pose_parameter(&self, name: &str) -> Option<usize> {
        self.hdr.as_ref()?.find_pose_parameter(name)
    }

    /// Set a pose parameter from a ranged value
    ///
    /// # Returns
    /// The ranged value stored after clamping, 0 for an unknown parameter
    pub fn set_pose_parameter(&mut self, index: usize, value: f32) -> f32 {
        let Some(hdr) = self.hdr.clone() else {
            return 0.0;
        };
        let before = self.pose_params;
        let stored = set_pose_parameter(&hdr, &mut self.pose_params, index, value);
        if before != self.pose_params {
            self.invalidate_bone_cache();
        }
        stored
    }

    pub fn set_pose_parameter_by_name(&mut self, name: &str, value: f32) -> f32 {
        match self.lookup_pose_parameter(name) {
            Some(index) => self.set_pose_parameter(index, value),
            None => {
                trace!(name, "Unknown pose parameter");
                0.0
            }
        }
    }

    /// Ranged value of a pose parameter, 0 for an unknown parameter
    pub fn get_pose_parameter(&self, index: usize) -> f32 {
        self.hdr
            .as_ref()
            .map_or(0.0, |hdr| get_pose_parameter(hdr, &self.pose_params, index))
    }

    pub fn get_pose_parameter_range(&self, index: usize) -> Option<(f32, f32)> {
        pose_parameter_range(self.hdr.as_ref()?, index)
    }

    // ------------------------------------------------------------------
    // Bones
    // ------------------------------------------------------------------

    pub fn accessor(&self) -> &BoneAccessor {
        &self.accessor
    }

    /// Write access to a computed bone, for correction passes after setup
    pub fn get_bone_for_write(
        &mut self,
        globals: &WorldGlobals,
        bone: usize,
    ) -> AnimResult<&mut Matrix3x4> {
        self.accessor.get_bone_for_write(globals, bone)
    }

    /// Epoch the bones were last computed in
    pub fn bones_epoch(&self) -> u64 {
        self.bones_epoch
    }

    /// Every mask requested this epoch
    pub fn accumulated_bone_mask(&self) -> BoneMask {
        self.accumulated_bone_mask
    }

    /// Every mask requested in the previous epoch
    pub fn prev_bone_mask(&self) -> BoneMask {
        self.prev_bone_mask
    }

    /// Bones written by the last setup pass
    pub fn computed_bones(&self) -> &BoneBitList {
        &self.computed
    }

    /// Number of setup passes that actually computed bones
    pub fn setup_count(&self) -> u64 {
        self.setup_count
    }

    /// Times the bones were invalidated; bumps even within one epoch
    pub fn bone_invalidations(&self) -> u64 {
        self.bone_invalidations
    }

    pub fn last_setup_time(&self) -> f32 {
        self.last_setup_time
    }

    /// World position and angles of a computed bone
    pub fn get_bone_position(&self, globals: &WorldGlobals, bone: usize) -> AnimResult<(Vec3, QAngle)> {
        let m = self.accessor.get_bone(globals, bone)?;
        Ok((matrix_position(m), matrix_angles(m)))
    }

    pub fn get_bone_transform(&self, globals: &WorldGlobals, bone: usize) -> AnimResult<Matrix3x4> {
        self.accessor.get_bone(globals, bone).copied()
    }

    /// Forget this frame's bones; the next setup recomputes
    pub fn invalidate_bone_cache(&mut self) {
        self.bone_invalidations += 1;
        self.bones_epoch = INVALID_EPOCH;
        self.attachments_epoch = INVALID_EPOCH;
        self.accessor.reset(INVALID_EPOCH);
        self.last_setup_time = f32::MIN;
    }

    pub(crate) fn bone_cache_handle(&self) -> Option<BoneCacheHandle> {
        self.bone_cache
    }

    pub(crate) fn set_bone_cache_handle(&mut self, handle: Option<BoneCacheHandle>) {
        self.bone_cache = handle;
    }

    pub fn merge_cache(&self) -> &BoneMergeCache {
        &self.merge
    }

    /// Entity whose bones this one follows by name
    pub fn move_parent(&self) -> Option<EntityHandle> {
        self.move_parent
    }

    pub fn set_move_parent(&mut self, parent: Option<EntityHandle>) {
        if self.move_parent != parent {
            self.move_parent = parent;
            self.merge.invalidate();
            self.invalidate_bone_cache();
        }
    }

    /// Compute bone-to-world matrices for every bone in `mask`
    ///
    /// Bones already computed this epoch under an earlier mask are kept and
    /// recomputed together with the new ones. Ragdolls take their bones
    /// straight from physics, or from their seed pose until physics has
    /// produced one.
    ///
    /// # Errors
    /// `NoModel` when the entity has no model
    #[tracing::instrument(skip_all, fields(kind = self.kind.name(), mask = mask.bits()))]
    pub fn setup_bones(
        &mut self,
        globals: &WorldGlobals,
        parent: Option<ParentBones<'_>>,
        mask: BoneMask,
        curtime: f32,
    ) -> AnimResult<()> {
        let hdr = self.hdr_or_err()?;
        let epoch = globals.model_bone_counter();

        if self.bones_epoch != epoch {
            self.accessor.reset(epoch);
            self.prev_bone_mask = self.accumulated_bone_mask;
            self.accumulated_bone_mask = BoneMask::empty();
            self.attachments_epoch = INVALID_EPOCH;
            self.bones_epoch = epoch;
        }
        self.accumulated_bone_mask |= mask;

        let readable = self.accessor.readable_bones();
        if !readable.contains(mask) {
            let compute = mask | readable;
            self.accessor.set_writable_bones(compute);
            self.computed.clear();

            if self.kind.ragdoll().is_some() {
                self.copy_ragdoll_bones(&hdr, compute);
            } else {
                let mut pose = BonePose::reference(&hdr);
                self.standard_blending_rules(&hdr, &mut pose, curtime, compute);
                self.build_transformations(&hdr, &pose, parent, compute);
            }

            self.accessor.set_readable_bones(compute);
            self.last_setup_time = curtime;
            self.setup_count += 1;
            trace!(bones = self.computed.count(), epoch, "Bones computed");
        }

        if mask.intersects(BoneFlags::USED_BY_ATTACHMENT) && self.attachments_epoch != epoch {
            self.setup_attachments(&hdr);
            self.attachments_epoch = epoch;
        }

        Ok(())
    }

    /// Parent-space pose for the current frame
    ///
    /// Base sequence, then fading transitions, then overlays, then the
    /// unragdoll blend. Bones the sequences do not cover keep whatever
    /// `pose` held (normally the reference pose).
    pub fn standard_blending_rules(
        &mut self,
        hdr: &StudioHdr,
        pose: &mut BonePose,
        curtime: f32,
        mask: BoneMask,
    ) {
        let params = self.pose_params;
        calc_pose(hdr, pose, self.clock.sequence, self.clock.cycle, &params, mask);

        self.transitioner.maintain_sequence_transitions(
            hdr,
            &mut self.clock,
            pose,
            &params,
            curtime,
            !self.no_interpolation,
            mask,
        );

        self.overlays.accumulate_layers(hdr, pose, &params, mask);

        let expired = self
            .ragdoll_info
            .as_ref()
            .is_some_and(|info| !info.unragdoll_blend(pose, curtime, self.unragdoll_blend_time));
        if expired {
            debug!("Unragdoll blend complete");
            self.ragdoll_info = None;
        }
    }

    fn build_transformations(
        &mut self,
        hdr: &Arc<StudioHdr>,
        pose: &BonePose,
        parent: Option<ParentBones<'_>>,
        mask: BoneMask,
    ) {
        let mut entity = self.entity_to_world();
        self.apply_bone_matrix_transform(&mut entity);

        self.merge.update_cache(hdr, parent.map(|p| p.hdr));

        let bones = self.accessor.bones_mut();
        if hdr.is_static_prop() {
            if let Some(root) = bones.first_mut() {
                *root = entity;
                self.computed.mark(0);
            }
            return;
        }

        let count = hdr.num_bones().min(bones.len()).min(pose.len());
        for bone in 0..count {
            if !hdr.bone_flags(bone).intersects(mask) {
                continue;
            }

            let merged = parent.zip(self.merge.find_target_bone(bone)).and_then(|(p, target)| p.bones.get(target));
            if let Some(m) = merged {
                bones[bone] = *m;
                self.computed.mark(bone);
                continue;
            }

            let local = quaternion_matrix(pose.q[bone], pose.pos[bone]);
            bones[bone] = match hdr.bone_parent(bone) {
                Some(p) if p < bone => bones[p] * local,
                _ => entity * local,
            };
            self.computed.mark(bone);
        }
    }

    fn copy_ragdoll_bones(&mut self, hdr: &StudioHdr, mask: BoneMask) {
        let Some(ragdoll) = self.kind.ragdoll() else {
            return;
        };

        let source = ragdoll.current_bones();
        let bones = self.accessor.bones_mut();
        for (bone, (dst, src)) in bones.iter_mut().zip(source).enumerate() {
            if hdr.bone_flags(bone).intersects(mask) {
                *dst = *src;
                self.computed.mark(bone);
            }
        }
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    fn setup_attachments(&mut self, hdr: &StudioHdr) {
        self.attachments
            .resize(hdr.attachments.len(), Matrix3x4::IDENTITY);

        let bones = self.accessor.bones();
        for (slot, attachment) in self.attachments.iter_mut().zip(&hdr.attachments) {
            if let Some(bone) = bones.get(attachment.bone) {
                *slot = *bone * attachment.local;
            }
        }
        trace!(count = self.attachments.len(), "Attachments computed");
    }

    pub fn lookup_attachment(&self, name: &str) -> Option<usize> {
        self.hdr.as_ref()?.find_attachment(name)
    }

    /// Attachment-to-world computed this epoch
    ///
    /// # Errors
    /// `AttachmentOutOfRange` for a bad index, and the bone accessor's errors
    /// when bones were not set up with the attachment mask this epoch
    pub fn get_attachment(&self, globals: &WorldGlobals, index: usize) -> AnimResult<Matrix3x4> {
        let hdr = self.hdr.as_ref().ok_or(AnimError::NoModel)?;
        let attachment = hdr
            .attachments
            .get(index)
            .ok_or(AnimError::AttachmentOutOfRange {
                index,
                count: hdr.attachments.len(),
            })?;

        self.accessor.get_bone(globals, attachment.bone)?;
        let epoch = globals.model_bone_counter();
        if self.attachments_epoch != epoch {
            return Err(InvalidStateError::BonesNotComputed {
                bone: attachment.bone,
                epoch,
            }
            .into());
        }

        self.attachments
            .get(index)
            .copied()
            .ok_or(AnimError::AttachmentOutOfRange {
                index,
                count: self.attachments.len(),
            })
    }

    pub fn get_attachment_origin_angles(
        &self,
        globals: &WorldGlobals,
        index: usize,
    ) -> AnimResult<(Vec3, QAngle)> {
        let m = self.get_attachment(globals, index)?;
        Ok((matrix_position(&m), matrix_angles(&m)))
    }

    /// Attachment transform relative to its bone
    pub fn get_attachment_local(&self, index: usize) -> Option<Matrix3x4> {
        self.hdr.as_ref()?.attachments.get(index).map(|a| a.local)
    }

    // ------------------------------------------------------------------
    // Ragdoll hand-off
    // ------------------------------------------------------------------

    /// Snapshot the last computed bones as a parent-local pose
    pub fn save_ragdoll_info(&self, curtime: f32) -> AnimResult<RagdollInfo> {
        let hdr = self.hdr.as_ref().ok_or(AnimError::NoModel)?;
        Ok(RagdollInfo::capture(
            hdr,
            &self.entity_to_world(),
            self.accessor.bones(),
            curtime,
        ))
    }

    /// Start blending out of a ragdoll pose
    pub fn create_unragdoll_info(&mut self, info: RagdollInfo) {
        debug!(save_time = info.save_time, "Unragdoll blend started");
        self.ragdoll_info = Some(info);
        self.invalidate_bone_cache();
    }

    pub fn is_unragdoll_blending(&self) -> bool {
        self.ragdoll_info.is_some()
    }

    /// Ragdoll created from this entity, if any
    pub fn spawned_ragdoll(&self) -> Option<EntityHandle> {
        self.spawned_ragdoll
    }

    pub(crate) fn set_spawned_ragdoll(&mut self, ragdoll: Option<EntityHandle>) {
        self.spawned_ragdoll = ragdoll;
    }

    // ------------------------------------------------------------------
    // Client-side animation and networking
    // ------------------------------------------------------------------

    pub fn client_side_animation(&self) -> bool {
        self.client_side_animation
    }

    pub fn set_client_side_animation(&mut self, enabled: bool) {
        self.client_side_animation = enabled;
    }

    pub fn client_side_animation_flags(&self) -> ClientAnimFlags {
        self.kind
            .compute_client_side_animation_flags(self.client_side_animation)
    }

    pub fn no_interpolation(&self) -> bool {
        self.no_interpolation
    }

    pub fn set_no_interpolation(&mut self, no_interpolation: bool) {
        self.no_interpolation = no_interpolation;
    }

    /// Apply networked fields
    ///
    /// Client-animated entities take cycle and pose parameters as is;
    /// others record them for interpolation. A created entity starts at the
    /// received values with no history behind them.
    ///
    /// # Returns
    /// `true` if anything that moves bones changed
    pub fn apply_network_update(&mut self, update: &NetworkUpdate, update_type: DataUpdateType) -> bool {
        let mut changed = false;

        if let Some(enabled) = update.client_side_animation {
            self.client_side_animation = enabled;
        }
        if let Some(no_interpolation) = update.no_interpolation {
            self.no_interpolation = no_interpolation;
        }
        if let Some(origin) = update.origin {
            changed |= origin != self.origin;
            self.origin = origin;
        }
        if let Some(angles) = update.angles {
            changed |= angles != self.angles;
            self.angles = angles;
        }
        if let Some(scale) = update.model_width_scale {
            changed |= scale != self.model_width_scale;
            self.model_width_scale = scale;
        }
        if let Some(rate) = update.playback_rate {
            self.clock.playback_rate = rate;
        }

        if let Some(sequence) = update.sequence {
            match self.hdr.clone() {
                Some(hdr) => changed |= self.clock.set_sequence(&hdr, sequence, &self.pose_params),
                None => self.clock.sequence = sequence,
            }
        }

        // parities are edge triggers; the transitioner and event scanner watch them
        if let Some(parity) = update.new_sequence_parity {
            changed |= parity != self.clock.new_sequence_parity;
            self.clock.new_sequence_parity = parity;
        }
        if let Some(parity) = update.reset_events_parity {
            self.clock.reset_events_parity = parity;
        }

        let snap = update_type == DataUpdateType::Created
            || self.client_side_animation
            || self.no_interpolation;

        if let Some(cycle) = update.cycle {
            changed |= cycle != self.clock.cycle;
            if snap {
                self.interp_cycle.reset(cycle);
                self.clock.cycle = cycle;
            }
            self.interp_cycle.note_changed(update.time, cycle);
        }

        if let Some(values) = &update.pose_parameters {
            let mut params = self.pose_params;
            for (slot, value) in params.iter_mut().zip(values) {
                *slot = value.clamp(0.0, 1.0);
            }
            changed |= params != self.pose_params;
            if snap {
                self.interp_pose.reset(params);
                self.pose_params = params;
            }
            self.interp_pose.note_changed(update.time, params);
        }

        if changed {
            self.invalidate_bone_cache();
        }
        changed
    }

    /// Move interpolated fields to their values at `curtime` minus the interpolation delay
    ///
    /// # Returns
    /// `true` if cycle or pose parameters moved
    pub fn interpolate(&mut self, curtime: f32) -> bool {
        if self.client_side_animation {
            return false;
        }

        let time = curtime - self.interpolation_amount;
        let mut moved = false;

        // fields never networked keep whatever was set locally
        if self.interp_cycle.history_len() > 0 {
            let cycle = if self.no_interpolation {
                self.interp_cycle.restore_to_last_networked();
                self.interp_cycle.value()
            } else {
                self.interp_cycle
                    .interpolate(time, self.clock.sequence_loops())
            };
            moved |= cycle != self.clock.cycle;
            self.clock.cycle = cycle;
        }

        if self.interp_pose.history_len() > 0 {
            let params = if self.no_interpolation {
                self.interp_pose.restore_to_last_networked();
                self.interp_pose.value()
            } else {
                self.interp_pose.interpolate(time, false)
            };
            moved |= params != self.pose_params;
            self.pose_params = params;
        }

        if moved {
            self.invalidate_bone_cache();
        }
        moved
    }

    /// Drop interpolation history, keeping the last networked values
    pub fn reset_latched(&mut self) {
        self.interp_cycle.reset_latched();
        self.interp_pose.reset_latched();
        self.clock.cycle = self.interp_cycle.value();
        self.pose_params = self.interp_pose.value();
    }

    /// Use the last networked values, discarding any interpolated state
    pub fn restore_to_last_networked(&mut self) {
        self.interp_cycle.restore_to_last_networked();
        self.interp_pose.restore_to_last_networked();
        self.clock.cycle = self.interp_cycle.value();
        self.pose_params = self.interp_pose.value();
    }
}

impl Renderable for AnimatingEntity {
    fn should_draw(&self) -> bool {
        self.hdr.is_some()
            && !self.hidden
            && self.ragdoll_state() != RagdollState::Destroyed
            && self.render_alpha() > 0.0
    }

    fn render_alpha(&self) -> f32 {
        self.kind.ragdoll().map_or(255.0, |r| r.alpha())
    }

    fn render_origin(&self) -> Vec3 {
        self.origin
    }
}

impl BoneProvider for AnimatingEntity {
    fn num_bones(&self) -> usize {
        self.accessor.num_bones()
    }

    fn lookup_bone(&self, name: &str) -> Option<usize> {
        self.hdr.as_ref()?.find_bone(name)
    }

    fn bone_to_world(&self, globals: &WorldGlobals, bone: usize) -> AnimResult<&Matrix3x4> {
        self.accessor.get_bone(globals, bone)
    }
}

impl Simulatable for AnimatingEntity {
    fn simulate(&mut self, curtime: f32, frametime: f32, events: &mut Vec<AnimEvent>) -> bool {
        if let Some(ragdoll) = self.kind.ragdoll_mut() {
            return ragdoll.think(curtime, frametime) != RagdollState::Destroyed;
        }

        self.interpolate(curtime);
        self.do_animation_events(events);
        true
    }
}

impl PvsNotifiable for AnimatingEntity {
    fn on_pvs_status_changed(
        &mut self,
        entity: RawEntityHandle,
        in_pvs: bool,
        shadows: &mut dyn ShadowManager,
    ) {
        if let Some(ragdoll) = self.kind.ragdoll_mut() {
            PvsNotifiable::on_pvs_status_changed(ragdoll, entity, in_pvs, shadows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::f32::consts::FRAC_PI_2;

    use studioanim_sdk::Quat;

    const ALL: BoneMask = BoneFlags::USED_BY_ANYTHING;

    fn model_handle() -> ModelHandle {
        use slotmap::KeyData;
        ModelHandle::from(KeyData::from_ffi(1))
    }

    fn arm_entity() -> AnimatingEntity {
        let mut entity = AnimatingEntity::new(EntityKind::Base, &AnimConfig::default());
        entity.set_model(model_handle(), Arc::new(arm_model()));
        entity
    }

    fn hand_position(entity: &AnimatingEntity, globals: &WorldGlobals) -> Vec3 {
        entity.get_bone_position(globals, 2).unwrap().0
    }

    #[test]
    fn test_reference_pose_world_positions() {
        let globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_POSE_A);
        entity.set_abs_origin(Vec3::new(0.0, 0.0, 100.0));

        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        assert!(hand_position(&entity, &globals).abs_diff_eq(Vec3::new(20.0, 0.0, 100.0), 1e-3));
        assert_eq!(entity.computed_bones().count(), 3);
    }

    #[test]
    fn test_no_sequence_leaves_reference_pose() {
        let globals = WorldGlobals::default();
        let mut entity = AnimatingEntity::new(EntityKind::Base, &AnimConfig::default());
        entity.set_model(model_handle(), Arc::new(weapon_model()));
        assert_eq!(entity.sequence(), -1);

        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        assert_eq!(entity.get_bone_transform(&globals, 0).unwrap(), Matrix3x4::IDENTITY);
    }

    #[test]
    fn test_same_epoch_reuses_bones() {
        let globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_IDLE);

        entity.setup_bones(&globals, None, BoneFlags::USED_BY_HITBOX, 1.0).unwrap();
        entity.setup_bones(&globals, None, BoneFlags::USED_BY_HITBOX, 1.0).unwrap();
        assert_eq!(entity.setup_count(), 1);

        // a wider mask recomputes, keeping the old bits readable
        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        assert_eq!(entity.setup_count(), 2);
        assert!(entity.accessor().readable_bones().contains(BoneFlags::USED_BY_HITBOX));
        assert_eq!(entity.accumulated_bone_mask(), ALL);
    }

    #[test]
    fn test_recompute_is_bit_identical() {
        let mut globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_IDLE);
        entity.set_cycle(0.37);

        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        let first = entity.accessor().bones().to_vec();

        globals.invalidate_bone_caches();
        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        assert_eq!(entity.accessor().bones(), first.as_slice());
        assert_eq!(entity.setup_count(), 2);
        assert_eq!(entity.prev_bone_mask(), ALL);
    }

    #[test]
    fn test_moving_invalidates_bones() {
        let globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_POSE_A);
        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();

        entity.set_abs_origin(Vec3::new(5.0, 0.0, 0.0));
        assert!(entity.get_bone_transform(&globals, 0).is_err());

        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        assert!(hand_position(&entity, &globals).abs_diff_eq(Vec3::new(25.0, 0.0, 0.0), 1e-3));
    }

    #[test]
    fn test_width_scale_applies_to_root_rows() {
        let globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_POSE_A);
        entity.set_model_width_scale(2.0);
        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();

        assert!(hand_position(&entity, &globals).abs_diff_eq(Vec3::new(40.0, 0.0, 0.0), 1e-3));
    }

    #[test]
    fn test_pose_parameter_blend() {
        let globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_AIM);

        let index = entity.lookup_pose_parameter("AIM_YAW").unwrap();
        assert_eq!(entity.set_pose_parameter(index, 90.0), 45.0);
        assert_eq!(entity.get_pose_parameter(index), 45.0);
        assert_eq!(entity.get_pose_parameter_range(index), Some((-45.0, 45.0)));
        assert_eq!(entity.set_pose_parameter_by_name("missing", 3.0), 0.0);

        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        let (_, angles) = entity.get_bone_position(&globals, 1).unwrap();
        assert!((angles.yaw - 45.0).abs() < 1e-2);

        let mut out = [0.0; MAX_STUDIO_POSE_PARAM];
        entity.get_pose_parameters(&mut out);
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn test_follower_copies_merged_bone() {
        let globals = WorldGlobals::default();
        let mut arm = arm_entity();
        arm.reset_sequence(SEQ_POSE_A);
        arm.set_abs_origin(Vec3::new(0.0, 10.0, 0.0));
        arm.setup_bones(&globals, None, ALL, 1.0).unwrap();
        let arm_hdr = Arc::clone(arm.studio_hdr().unwrap());

        let mut weapon = AnimatingEntity::new(EntityKind::Prop, &AnimConfig::default());
        weapon.set_model(model_handle(), Arc::new(weapon_model()));
        let parent = ParentBones {
            hdr: &arm_hdr,
            bones: arm.accessor().bones(),
        };
        weapon.setup_bones(&globals, Some(parent), ALL, 1.0).unwrap();

        assert_eq!(weapon.merge_cache().find_target_bone(0), Some(2));
        assert_eq!(
            weapon.get_bone_transform(&globals, 0).unwrap(),
            arm.get_bone_transform(&globals, 2).unwrap()
        );
    }

    #[test]
    fn test_follower_without_match_uses_own_origin() {
        let globals = WorldGlobals::default();
        let stump = Arc::new(arm_model_without_hand());
        let bones = vec![Matrix3x4::from_translation(Vec3::splat(50.0)); 3];

        let mut weapon = AnimatingEntity::new(EntityKind::Prop, &AnimConfig::default());
        weapon.set_model(model_handle(), Arc::new(weapon_model()));
        weapon.set_abs_origin(Vec3::new(1.0, 2.0, 3.0));
        let parent = ParentBones {
            hdr: &stump,
            bones: &bones,
        };
        weapon.setup_bones(&globals, Some(parent), ALL, 1.0).unwrap();

        assert!(!weapon.merge_cache().has_merged_bones());
        let (origin, _) = weapon.get_bone_position(&globals, 0).unwrap();
        assert!(origin.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-4));
    }

    #[test]
    fn test_attachment_needs_setup() {
        let globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_POSE_A);
        let muzzle = entity.lookup_attachment("muzzle").unwrap();

        assert!(entity.get_attachment(&globals, muzzle).is_err());
        // bones computed without the attachment bit do not set attachments up
        entity.setup_bones(&globals, None, BoneFlags::USED_BY_HITBOX, 1.0).unwrap();
        assert!(entity.get_attachment(&globals, muzzle).is_err());

        entity.setup_bones(&globals, None, BoneFlags::USED_BY_ATTACHMENT, 1.0).unwrap();
        let (origin, _) = entity.get_attachment_origin_angles(&globals, muzzle).unwrap();
        assert!(origin.abs_diff_eq(Vec3::new(25.0, 0.0, 0.0), 1e-3));

        assert!(matches!(
            entity.get_attachment(&globals, 4),
            Err(AnimError::AttachmentOutOfRange { index: 4, count: 1 })
        ));
        assert_eq!(
            entity.get_attachment_local(muzzle),
            Some(Matrix3x4::from_translation(Vec3::new(5.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn test_unragdoll_blend_starts_from_snapshot() {
        let globals = WorldGlobals::default();
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_POSE_A);

        let hdr = entity.studio_hdr().cloned().unwrap();
        let mut snapshot = BonePose::reference(&hdr);
        snapshot.q[1] = Quat::from_rotation_z(FRAC_PI_2);
        entity.create_unragdoll_info(RagdollInfo {
            save_time: 1.0,
            pos: snapshot.pos.clone(),
            q: snapshot.q.clone(),
        });

        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();
        assert!(hand_position(&entity, &globals).abs_diff_eq(Vec3::new(10.0, 10.0, 0.0), 1e-3));

        entity.invalidate_bone_cache();
        entity.setup_bones(&globals, None, ALL, 1.1).unwrap();
        // halfway through the 0.2s blend
        let (_, angles) = entity.get_bone_position(&globals, 1).unwrap();
        assert!((angles.yaw - 45.0).abs() < 0.1);

        entity.invalidate_bone_cache();
        entity.setup_bones(&globals, None, ALL, 1.5).unwrap();
        assert!(!entity.is_unragdoll_blending());
        assert!(hand_position(&entity, &globals).abs_diff_eq(Vec3::new(20.0, 0.0, 0.0), 1e-3));
    }

    #[test]
    fn test_events_follow_frame_advance() {
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_IDLE);
        entity.set_client_side_animation(true);

        let mut events = Vec::new();
        entity.studio_frame_advance(1.0);
        entity.set_cycle(0.1);
        entity.simulate(1.0, 0.0, &mut events);
        assert!(events.is_empty());

        // one second is one loop: 0.1 -> 1.1 wraps once
        entity.studio_frame_advance(2.0);
        entity.simulate(2.0, 1.0, &mut events);
        let ids: Vec<i32> = events.iter().map(|e| e.event).collect();
        assert_eq!(ids, vec![EVENT_QUARTER, EVENT_THREE_QUARTER]);
    }

    #[test]
    fn test_networked_cycle_interpolates() {
        let mut entity = arm_entity();
        entity.reset_sequence(SEQ_POSE_A);

        let created = NetworkUpdate {
            time: 1.0,
            cycle: Some(0.2),
            ..Default::default()
        };
        entity.apply_network_update(&created, DataUpdateType::Created);
        assert_eq!(entity.cycle(), 0.2);

        let changed = NetworkUpdate {
            time: 1.1,
            cycle: Some(0.4),
            ..Default::default()
        };
        assert!(entity.apply_network_update(&changed, DataUpdateType::DataTableChanged));
        // not applied until interpolation catches up
        assert_eq!(entity.cycle(), 0.2);

        // render time 1.05 is halfway between the samples
        entity.interpolate(1.15);
        assert!((entity.cycle() - 0.3).abs() < 1e-3);

        entity.set_no_interpolation(true);
        entity.interpolate(1.15);
        assert_eq!(entity.cycle(), 0.4);
    }

    #[test]
    fn test_sequence_lookups() {
        let entity = arm_entity();
        assert_eq!(entity.lookup_sequence("FIRE"), SEQ_FIRE);
        assert_eq!(entity.lookup_sequence("nope"), -1);
        assert_eq!(entity.select_weighted_sequence("ACT_RANGE_ATTACK1"), SEQ_FIRE);
        assert_eq!(entity.select_weighted_sequence("ACT_RUN"), -1);
        assert!((entity.sequence_duration(SEQ_FIRE) - 0.5).abs() < 1e-5);
        assert!(entity.is_sequence_looping(SEQ_IDLE));
        assert!((entity.sequence_ground_speed(SEQ_IDLE) - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_view_model_gated_by_access_stack() {
        let mut globals = WorldGlobals::default();
        let mut entity = AnimatingEntity::new(EntityKind::ViewModel, &AnimConfig::default());
        entity.set_model(model_handle(), Arc::new(arm_model()));
        entity.reset_sequence(SEQ_POSE_A);
        entity.setup_bones(&globals, None, ALL, 1.0).unwrap();

        globals.push_allow_bone_access(true, false, "world_only");
        assert!(matches!(
            entity.bone_to_world(&globals, 0),
            Err(AnimError::InvalidState(InvalidStateError::BoneAccessDenied { view_model: true }))
        ));
        assert!(globals.pop_bone_access("world_only"));
        assert!(entity.bone_to_world(&globals, 0).is_ok());
    }
}
