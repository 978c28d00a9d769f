//! Ragdoll pose snapshots
//!
//! A [`RagdollInfo`] stores every bone's parent-space position and rotation
//! at a moment in time. It is captured from the animated pose when an entity
//! becomes a ragdoll, and from the simulated pose when a ragdoll hands back
//! to animation, which then blends away from the snapshot over a short time.

use studioanim_sdk::{matrix_quaternion, quaternion_slerp, Matrix3x4, Quat, StudioHdr, Vec3};
use tracing::trace;

use crate::anim::BonePose;

/// Per-bone local pose captured at `save_time`
#[derive(Debug, Clone, PartialEq)]
pub struct RagdollInfo {
    pub save_time: f32,
    pub pos: Vec<Vec3>,
    pub q: Vec<Quat>,
}

impl RagdollInfo {
    /// Capture world-space bones as a parent-local pose
    ///
    /// Root bones are stored relative to `entity_to_world`, every other bone
    /// relative to its parent. Bones missing from `bone_to_world` keep the
    /// reference pose.
    pub fn capture(
        hdr: &StudioHdr,
        entity_to_world: &Matrix3x4,
        bone_to_world: &[Matrix3x4],
        time: f32,
    ) -> Self {
        let reference = BonePose::reference(hdr);
        let mut pos = reference.pos;
        let mut q = reference.q;

        let entity_inverse = entity_to_world.inverse();
        for (bone, world) in bone_to_world.iter().enumerate().take(hdr.num_bones()) {
            let parent_inverse = match hdr.bone_parent(bone).and_then(|p| bone_to_world.get(p)) {
                Some(parent) => parent.inverse(),
                None => entity_inverse,
            };

            let local = parent_inverse * *world;
            let (bq, bpos) = matrix_quaternion(&local);
            pos[bone] = bpos;
            q[bone] = bq;
        }

        Self {
            save_time: time,
            pos,
            q,
        }
    }

    pub fn num_bones(&self) -> usize {
        self.pos.len()
    }

    /// Blend `pose` from this snapshot toward the animated pose
    ///
    /// At `save_time` the result is the snapshot, after `blend_time` seconds
    /// it is the animated pose untouched.
    ///
    /// # Returns
    /// `false` once the blend has expired and the snapshot can be dropped
    pub fn unragdoll_blend(&self, pose: &mut BonePose, curtime: f32, blend_time: f32) -> bool {
        let dt = curtime - self.save_time;
        if dt > blend_time || blend_time <= 0.0 {
            trace!(dt, "Unragdoll blend finished");
            return false;
        }

        let frac = (dt / blend_time).clamp(0.0, 1.0);
        let count = pose.len().min(self.num_bones());
        for bone in 0..count {
            pose.pos[bone] = self.pos[bone].lerp(pose.pos[bone], frac);
            pose.q[bone] = quaternion_slerp(self.q[bone], pose.q[bone], frac);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::arm_model;
    use std::f32::consts::FRAC_PI_2;

    use studioanim_sdk::quaternion_matrix;

    fn world_bones(hdr: &StudioHdr, entity: &Matrix3x4, pose: &BonePose) -> Vec<Matrix3x4> {
        let mut out: Vec<Matrix3x4> = Vec::with_capacity(hdr.num_bones());
        for bone in 0..hdr.num_bones() {
            let local = quaternion_matrix(pose.q[bone], pose.pos[bone]);
            let parent = hdr.bone_parent(bone).map_or(*entity, |p| out[p]);
            out.push(parent * local);
        }
        out
    }

    #[test]
    fn test_capture_recovers_local_pose() {
        let hdr = arm_model();
        let mut pose = BonePose::reference(&hdr);
        pose.q[1] = Quat::from_rotation_z(FRAC_PI_2);
        pose.pos[2] = Vec3::new(7.0, 0.0, 0.0);

        let entity = Matrix3x4::from_translation(Vec3::new(100.0, 50.0, 0.0));
        let bones = world_bones(&hdr, &entity, &pose);
        let info = RagdollInfo::capture(&hdr, &entity, &bones, 3.0);

        assert_eq!(info.save_time, 3.0);
        for bone in 0..hdr.num_bones() {
            assert!(info.pos[bone].abs_diff_eq(pose.pos[bone], 1e-3), "bone {bone}");
            assert!(info.q[bone].abs_diff_eq(pose.q[bone], 1e-4) || info.q[bone].abs_diff_eq(-pose.q[bone], 1e-4));
        }
    }

    #[test]
    fn test_unragdoll_blend_progress() {
        let hdr = arm_model();
        let mut snapshot_pose = BonePose::reference(&hdr);
        snapshot_pose.pos[1] = Vec3::new(0.0, 10.0, 0.0);
        let info = RagdollInfo {
            save_time: 1.0,
            pos: snapshot_pose.pos.clone(),
            q: snapshot_pose.q.clone(),
        };

        let mut pose = BonePose::reference(&hdr);
        assert!(info.unragdoll_blend(&mut pose, 1.0, 0.2));
        assert!(pose.pos[1].abs_diff_eq(Vec3::new(0.0, 10.0, 0.0), 1e-4));

        let mut pose = BonePose::reference(&hdr);
        assert!(info.unragdoll_blend(&mut pose, 1.1, 0.2));
        assert!(pose.pos[1].abs_diff_eq(Vec3::new(5.0, 5.0, 0.0), 1e-3));

        let mut pose = BonePose::reference(&hdr);
        assert!(!info.unragdoll_blend(&mut pose, 1.25, 0.2));
        assert_eq!(pose, BonePose::reference(&hdr));
    }
}
