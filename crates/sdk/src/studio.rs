//! Studio model asset types
//!
//! A [`StudioHdr`] is the immutable per-model data the animation core reads:
//! the bone table, raw animations, sequences (with cycle rate, events and
//! blend layout), pose parameter declarations, attachments and hitbox sets.
//!
//! All name lookups are case-insensitive, matching how model compilers emit
//! names.

use bitflags::bitflags;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::math::{quaternion_slerp, Matrix3x4};

bitflags! {
    /// Per-bone usage flags. A bone mask is a set of these; a bone takes part
    /// in a setup pass when its flags intersect the requested mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BoneFlags: u32 {
        const PHYSICALLY_SIMULATED = 0x0000_0001;
        const PHYSICS_PROCEDURAL = 0x0000_0002;
        const ALWAYS_PROCEDURAL = 0x0000_0004;
        const USED_BY_HITBOX = 0x0000_0100;
        const USED_BY_ATTACHMENT = 0x0000_0200;
        const USED_BY_VERTEX_LOD0 = 0x0000_0400;
        const USED_BY_VERTEX_LOD1 = 0x0000_0800;
        const USED_BY_VERTEX_LOD2 = 0x0000_1000;
        const USED_BY_VERTEX_LOD3 = 0x0000_2000;
        const USED_BY_VERTEX_LOD4 = 0x0000_4000;
        const USED_BY_VERTEX_LOD5 = 0x0000_8000;
        const USED_BY_VERTEX_LOD6 = 0x0001_0000;
        const USED_BY_VERTEX_LOD7 = 0x0002_0000;
        const USED_BY_BONE_MERGE = 0x0004_0000;
        const USED_BY_VERTEX_MASK = 0x0003_FC00;
        const USED_BY_ANYTHING = 0x0007_FF00;
        /// Blend with slerp that skips hemisphere alignment
        const FIXED_ALIGNMENT = 0x0010_0000;
    }
}

/// A set of [`BoneFlags`] used to select bones for a setup pass
pub type BoneMask = BoneFlags;

bitflags! {
    /// Sequence behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SequenceFlags: u32 {
        const LOOPING = 0x0001;
        /// Cut instead of blending when transitioning into this sequence
        const SNAP = 0x0002;
        /// Additive sequence, accumulated onto the pose underneath
        const DELTA = 0x0004;
        const AUTOPLAY = 0x0008;
        /// Delta applied after (not before) the underlying rotation
        const POST = 0x0010;
    }
}

bitflags! {
    /// Whole-model flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StudioHdrFlags: u32 {
        /// Single-bone static prop, bone 0 is the entity transform
        const STATIC_PROP = 0x0010;
    }
}

/// One bone in the model's skeleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioBone {
    pub name: String,
    /// Parent bone index; parents always precede their children
    #[serde(default)]
    pub parent: Option<usize>,
    #[serde(default = "default_bone_flags")]
    pub flags: BoneFlags,
    /// Reference pose, parent space
    #[serde(default)]
    pub pos: Vec3,
    #[serde(default)]
    pub quat: Quat,
}

fn default_bone_flags() -> BoneFlags {
    BoneFlags::USED_BY_ANYTHING
}

impl StudioBone {
    pub fn new(name: impl Into<String>, parent: Option<usize>, pos: Vec3, quat: Quat) -> Self {
        Self {
            name: name.into(),
            parent,
            flags: default_bone_flags(),
            pos,
            quat,
        }
    }
}

/// A bone sample within one animation frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneKey {
    pub pos: Vec3,
    pub quat: Quat,
}

impl BoneKey {
    pub const fn new(pos: Vec3, quat: Quat) -> Self {
        Self { pos, quat }
    }
}

/// Raw keyframed animation data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimDesc {
    pub name: String,
    pub fps: f32,
    /// `frames[frame][bone]`; bones past the end of a frame use the reference pose
    pub frames: Vec<Vec<BoneKey>>,
    /// Root displacement over one full play-through
    #[serde(default)]
    pub movement: Vec3,
}

impl AnimDesc {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Cycles per second
    pub fn cycle_rate(&self) -> f32 {
        if self.frames.len() > 1 {
            self.fps / (self.frames.len() - 1) as f32
        } else {
            0.0
        }
    }

    /// Sample one bone at a cycle, returning `None` when the animation has no data for it
    pub fn sample_bone(&self, bone: usize, cycle: f32) -> Option<BoneKey> {
        let frame_count = self.frames.len();
        if frame_count == 0 {
            return None;
        }

        let f = cycle.clamp(0.0, 1.0) * (frame_count - 1) as f32;
        let frame = (f.floor() as usize).min(frame_count - 1);
        let next = (frame + 1).min(frame_count - 1);
        let s = f - frame as f32;

        let a = self.frames[frame].get(bone)?;
        let b = self.frames[next].get(bone).unwrap_or(a);

        if s <= 0.0 || frame == next {
            return Some(*a);
        }

        Some(BoneKey {
            pos: a.pos.lerp(b.pos, s),
            quat: quaternion_slerp(a.quat, b.quat, s),
        })
    }
}

/// An event embedded in a sequence at a normalized cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimEventDesc {
    pub cycle: f32,
    pub event: i32,
    #[serde(default)]
    pub options: String,
}

/// A playable sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeqDesc {
    pub label: String,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub activity_weight: i32,
    #[serde(default)]
    pub flags: SequenceFlags,
    /// Animations laid out along `param_index` (a single entry when not blended)
    pub anims: Vec<usize>,
    #[serde(default)]
    pub param_index: Option<usize>,
    /// Events sorted by cycle
    #[serde(default)]
    pub events: Vec<AnimEventDesc>,
    /// Per-bone blend weights; empty means every bone has weight 1
    #[serde(default)]
    pub bone_weights: Vec<f32>,
    #[serde(default = "default_fade_time")]
    pub fade_in_time: f32,
    #[serde(default = "default_fade_time")]
    pub fade_out_time: f32,
}

fn default_fade_time() -> f32 {
    0.2
}

impl SeqDesc {
    pub fn new(label: impl Into<String>, anim: usize, flags: SequenceFlags) -> Self {
        Self {
            label: label.into(),
            activity: None,
            activity_weight: 0,
            flags,
            anims: vec![anim],
            param_index: None,
            events: Vec::new(),
            bone_weights: Vec::new(),
            fade_in_time: default_fade_time(),
            fade_out_time: default_fade_time(),
        }
    }

    pub fn is_looping(&self) -> bool {
        self.flags.contains(SequenceFlags::LOOPING)
    }

    /// Blend weight of a bone within this sequence
    pub fn weight(&self, bone: usize) -> f32 {
        self.bone_weights.get(bone).copied().unwrap_or(1.0)
    }
}

/// A ranged float input to pose computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseParamDesc {
    pub name: String,
    pub start: f32,
    pub end: f32,
    /// Wrap range for angular parameters; 0 when the parameter does not wrap
    #[serde(default)]
    pub loop_range: f32,
}

impl PoseParamDesc {
    pub fn new(name: impl Into<String>, start: f32, end: f32) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            loop_range: 0.0,
        }
    }

    /// Encode a ranged value into 0..1, returning `(encoded, clamped ranged value)`
    pub fn encode(&self, value: f32) -> (f32, f32) {
        let mut value = value;
        if self.loop_range != 0.0 {
            let wrap = (self.start + self.end) / 2.0 + self.loop_range / 2.0;
            let shift = self.loop_range - wrap;
            value -= self.loop_range * ((value + shift) / self.loop_range).floor();
        }

        let span = self.end - self.start;
        let encoded = if span != 0.0 {
            ((value - self.start) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        (encoded, self.decode(encoded))
    }

    /// Decode a 0..1 value back into the declared range
    pub fn decode(&self, encoded: f32) -> f32 {
        encoded * (self.end - self.start) + self.start
    }
}

/// A named point rigidly attached to a bone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioAttachment {
    pub name: String,
    pub bone: usize,
    #[serde(default = "identity_matrix")]
    pub local: Matrix3x4,
}

fn identity_matrix() -> Matrix3x4 {
    Matrix3x4::IDENTITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioHitbox {
    pub bone: usize,
    #[serde(default)]
    pub group: i32,
    pub mins: Vec3,
    pub maxs: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitboxSet {
    pub name: String,
    pub hitboxes: Vec<StudioHitbox>,
}

/// Immutable model asset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StudioHdr {
    pub name: String,
    #[serde(default)]
    pub flags: StudioHdrFlags,
    pub bones: Vec<StudioBone>,
    #[serde(default)]
    pub animations: Vec<AnimDesc>,
    #[serde(default)]
    pub sequences: Vec<SeqDesc>,
    #[serde(default)]
    pub pose_parameters: Vec<PoseParamDesc>,
    #[serde(default)]
    pub attachments: Vec<StudioAttachment>,
    #[serde(default)]
    pub hitbox_sets: Vec<HitboxSet>,
}

fn find_by_name<'a, T>(items: &'a [T], name: &str, key: impl Fn(&'a T) -> &'a str) -> Option<usize> {
    items.iter().position(|item| key(item).eq_ignore_ascii_case(name))
}

impl StudioHdr {
    pub fn num_bones(&self) -> usize {
        self.bones.len()
    }

    pub fn bone(&self, index: usize) -> Option<&StudioBone> {
        self.bones.get(index)
    }

    pub fn bone_parent(&self, index: usize) -> Option<usize> {
        self.bones.get(index).and_then(|b| b.parent)
    }

    pub fn bone_flags(&self, index: usize) -> BoneFlags {
        self.bones
            .get(index)
            .map(|b| b.flags)
            .unwrap_or_else(BoneFlags::empty)
    }

    pub fn is_static_prop(&self) -> bool {
        self.flags.contains(StudioHdrFlags::STATIC_PROP)
    }

    pub fn sequences_available(&self) -> bool {
        !self.sequences.is_empty()
    }

    pub fn num_sequences(&self) -> usize {
        self.sequences.len()
    }

    pub fn seq_desc(&self, sequence: i32) -> Option<&SeqDesc> {
        usize::try_from(sequence)
            .ok()
            .and_then(|index| self.sequences.get(index))
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        find_by_name(&self.bones, name, |b| b.name.as_str())
    }

    pub fn find_attachment(&self, name: &str) -> Option<usize> {
        find_by_name(&self.attachments, name, |a| a.name.as_str())
    }

    pub fn find_pose_parameter(&self, name: &str) -> Option<usize> {
        find_by_name(&self.pose_parameters, name, |p| p.name.as_str())
    }

    pub fn find_sequence(&self, label: &str) -> Option<usize> {
        find_by_name(&self.sequences, label, |s| s.label.as_str())
    }

    pub fn find_hitbox_set(&self, name: &str) -> Option<usize> {
        find_by_name(&self.hitbox_sets, name, |s| s.name.as_str())
    }

    /// First sequence tagged with `activity` that has a positive weight
    pub fn find_activity(&self, activity: &str) -> Option<usize> {
        self.sequences.iter().position(|s| {
            s.activity_weight > 0
                && s.activity
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(activity))
        })
    }

    pub fn is_sequence_looping(&self, sequence: i32) -> bool {
        self.seq_desc(sequence).is_some_and(SeqDesc::is_looping)
    }

    /// Pick the (at most two) animations contributing to a sequence and their weights
    ///
    /// `pose_parameters` are the entity's encoded 0..1 values.
    pub fn seq_anims(&self, sequence: i32, pose_parameters: &[f32]) -> Vec<(usize, f32)> {
        let Some(seq) = self.seq_desc(sequence) else {
            return Vec::new();
        };

        match seq.anims.len() {
            0 => Vec::new(),
            1 => vec![(seq.anims[0], 1.0)],
            n => {
                let param = seq
                    .param_index
                    .and_then(|i| pose_parameters.get(i))
                    .copied()
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0);

                let f = param * (n - 1) as f32;
                let i0 = (f.floor() as usize).min(n - 2);
                let s = (f - i0 as f32).clamp(0.0, 1.0);

                if s <= 0.0 {
                    vec![(seq.anims[i0], 1.0)]
                } else if s >= 1.0 {
                    vec![(seq.anims[i0 + 1], 1.0)]
                } else {
                    vec![(seq.anims[i0], 1.0 - s), (seq.anims[i0 + 1], s)]
                }
            }
        }
    }

    /// Cycles per second for a sequence at the given pose
    pub fn sequence_cycle_rate(&self, sequence: i32, pose_parameters: &[f32]) -> f32 {
        self.seq_anims(sequence, pose_parameters)
            .into_iter()
            .filter_map(|(anim, weight)| {
                self.animations
                    .get(anim)
                    .map(|a| a.cycle_rate() * weight)
            })
            .sum()
    }

    /// Seconds per cycle; zero for single-frame sequences
    pub fn sequence_duration(&self, sequence: i32, pose_parameters: &[f32]) -> f32 {
        let cps = self.sequence_cycle_rate(sequence, pose_parameters);
        if cps == 0.0 {
            0.0
        } else {
            1.0 / cps
        }
    }

    /// Root displacement over one cycle
    pub fn sequence_movement(&self, sequence: i32, pose_parameters: &[f32]) -> Vec3 {
        self.seq_anims(sequence, pose_parameters)
            .into_iter()
            .filter_map(|(anim, weight)| self.animations.get(anim).map(|a| a.movement * weight))
            .fold(Vec3::ZERO, |acc, v| acc + v)
    }

    /// Units per second the sequence moves its root
    pub fn sequence_ground_speed(&self, sequence: i32, pose_parameters: &[f32]) -> f32 {
        let duration = self.sequence_duration(sequence, pose_parameters);
        if duration > 0.0 {
            self.sequence_movement(sequence, pose_parameters).length() / duration
        } else {
            0.0
        }
    }
}
