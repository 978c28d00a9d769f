//! Pose sampling and blending
//!
//! A [`BonePose`] is the parent-space position and rotation of every bone.
//! Sequences are sampled into a pose with [`calc_pose`], and further
//! sequences are layered on with [`accumulate_pose`], which blends by the
//! layer weight scaled by each bone's sequence weight. Rotations always blend
//! with slerp (or the scaled-delta forms for additive sequences), never a raw
//! component lerp.

use studioanim_sdk::{
    quaternion_ma, quaternion_slerp, quaternion_sm, BoneMask, Quat, SeqDesc,
    SequenceFlags, StudioHdr, Vec3, MAX_STUDIO_POSE_PARAM,
};

/// Encoded (0..1) pose parameter values for one entity
pub type PoseParameters = [f32; MAX_STUDIO_POSE_PARAM];

/// Parent-space bone positions and rotations
#[derive(Debug, Clone, PartialEq)]
pub struct BonePose {
    pub pos: Vec<Vec3>,
    pub q: Vec<Quat>,
}

impl BonePose {
    /// The model's bind pose
    pub fn reference(hdr: &StudioHdr) -> Self {
        Self {
            pos: hdr.bones.iter().map(|b| b.pos).collect(),
            q: hdr.bones.iter().map(|b| b.quat).collect(),
        }
    }

    /// Zero translation, identity rotation (the base of an additive pose)
    pub fn identity(num_bones: usize) -> Self {
        Self {
            pos: vec![Vec3::ZERO; num_bones],
            q: vec![Quat::IDENTITY; num_bones],
        }
    }

    pub fn len(&self) -> usize {
        self.pos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }
}

#[inline]
fn bone_in_mask(hdr: &StudioHdr, bone: usize, mask: BoneMask) -> bool {
    hdr.bone_flags(bone).intersects(mask)
}

/// Sample a sequence at `cycle` into `pose`
///
/// Only bones selected by `mask` are written. Bones the sequence has no data
/// for take the reference pose (or the identity for additive sequences).
///
/// # Returns
/// `false`, leaving `pose` untouched, when the sequence does not exist
pub fn calc_pose(
    hdr: &StudioHdr,
    pose: &mut BonePose,
    sequence: i32,
    cycle: f32,
    pose_params: &[f32],
    mask: BoneMask,
) -> bool {
    let Some(seq) = hdr.seq_desc(sequence) else {
        return false;
    };

    let anims = hdr.seq_anims(sequence, pose_params);
    if anims.is_empty() {
        return false;
    }

    let delta = seq.flags.contains(SequenceFlags::DELTA);
    let count = hdr.num_bones().min(pose.len());

    for bone in 0..count {
        if !bone_in_mask(hdr, bone, mask) {
            continue;
        }

        let (base_pos, base_q) = if delta {
            (Vec3::ZERO, Quat::IDENTITY)
        } else {
            (hdr.bones[bone].pos, hdr.bones[bone].quat)
        };

        let sample = |anim: usize| {
            hdr.animations
                .get(anim)
                .and_then(|a| a.sample_bone(bone, cycle))
                .map(|key| (key.pos, key.quat))
                .unwrap_or((base_pos, base_q))
        };

        let (mut pos, mut q) = sample(anims[0].0);
        if let Some(&(anim, weight)) = anims.get(1) {
            let (pos1, q1) = sample(anim);
            pos = pos.lerp(pos1, weight);
            q = quaternion_slerp(q, q1, weight);
        }

        pose.pos[bone] = pos;
        pose.q[bone] = q;
    }

    true
}

/// Blend `pose2` onto `pose1` by `s`, scaled per bone by the sequence's weights
///
/// Additive sequences add a scaled fraction of `pose2` instead of blending
/// toward it.
pub fn slerp_bones(
    hdr: &StudioHdr,
    pose1: &mut BonePose,
    seq: &SeqDesc,
    pose2: &BonePose,
    s: f32,
    mask: BoneMask,
) {
    if s <= 0.0 {
        return;
    }
    let s = s.min(1.0);
    let count = hdr.num_bones().min(pose1.len()).min(pose2.len());

    if seq.flags.contains(SequenceFlags::DELTA) {
        let post = seq.flags.contains(SequenceFlags::POST);
        for bone in 0..count {
            if !bone_in_mask(hdr, bone, mask) {
                continue;
            }
            let s2 = s * seq.weight(bone);
            if s2 <= 0.0 {
                continue;
            }

            pose1.q[bone] = if post {
                quaternion_ma(pose1.q[bone], s2, pose2.q[bone])
            } else {
                quaternion_sm(s2, pose2.q[bone], pose1.q[bone])
            };
            pose1.pos[bone] += pose2.pos[bone] * s2;
        }
        return;
    }

    for bone in 0..count {
        if !bone_in_mask(hdr, bone, mask) {
            continue;
        }
        let s2 = s * seq.weight(bone);
        if s2 <= 0.0 {
            continue;
        }
        let s1 = 1.0 - s2;

        pose1.q[bone] = quaternion_slerp(pose1.q[bone], pose2.q[bone], s2);
        pose1.pos[bone] = pose1.pos[bone] * s1 + pose2.pos[bone] * s2;
    }
}

/// Sample a sequence and blend it onto `pose` by `weight`
///
/// # Returns
/// `false` when the sequence does not exist or the weight is zero
pub fn accumulate_pose(
    hdr: &StudioHdr,
    pose: &mut BonePose,
    sequence: i32,
    cycle: f32,
    pose_params: &[f32],
    weight: f32,
    mask: BoneMask,
) -> bool {
    let Some(seq) = hdr.seq_desc(sequence) else {
        return false;
    };
    if weight <= 0.0 {
        return false;
    }

    let mut layer = if seq.flags.contains(SequenceFlags::DELTA) {
        BonePose::identity(hdr.num_bones())
    } else {
        BonePose::reference(hdr)
    };

    if !calc_pose(hdr, &mut layer, sequence, cycle, pose_params, mask) {
        return false;
    }

    slerp_bones(hdr, pose, seq, &layer, weight, mask);
    true
}

/// Default encoded values: every parameter at ranged value 0, clamped into range
pub fn default_pose_parameters(hdr: &StudioHdr) -> PoseParameters {
    let mut params = [0.0; MAX_STUDIO_POSE_PARAM];
    for (slot, desc) in params.iter_mut().zip(&hdr.pose_parameters) {
        *slot = desc.encode(0.0).0;
    }
    params
}

/// Set a pose parameter from a ranged value
///
/// # Returns
/// The ranged value actually stored after wrapping and clamping, or 0 for an
/// unknown parameter (which is left untouched)
pub fn set_pose_parameter(hdr: &StudioHdr, params: &mut [f32], index: usize, value: f32) -> f32 {
    let (Some(desc), Some(slot)) = (hdr.pose_parameters.get(index), params.get_mut(index)) else {
        return 0.0;
    };

    let (encoded, ranged) = desc.encode(value);
    *slot = encoded;
    ranged
}

/// Ranged value of a pose parameter, 0 for an unknown parameter
pub fn get_pose_parameter(hdr: &StudioHdr, params: &[f32], index: usize) -> f32 {
    match (hdr.pose_parameters.get(index), params.get(index)) {
        (Some(desc), Some(&encoded)) => desc.decode(encoded),
        _ => 0.0,
    }
}

/// Declared `[start, end]` of a pose parameter
pub fn pose_parameter_range(hdr: &StudioHdr, index: usize) -> Option<(f32, f32)> {
    hdr.pose_parameters.get(index).map(|d| (d.start, d.end))
}
