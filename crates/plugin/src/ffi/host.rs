//! Host collaborators backed by C callbacks
//!
//! The host hands a [`HostCallbacks`] table to `studioanim_world_create`.
//! Shadow requests and ragdoll creation are forwarded to it; simulated ragdoll
//! poses come back the other way through `studioanim_ragdoll_push_bones` and
//! are parked in a [`PoseStore`] until the world's next physics update reads
//! them.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::sync::Arc;

use parking_lot::Mutex;

use studioanim_sdk::glam::Vec3A;
use studioanim_sdk::{Matrix3x4, PhysicsRagdollId, RagdollPhysics, RawEntityHandle, ShadowManager};

/// Floats per matrix on the wire: three rows of four
pub const MATRIX_FLOATS: usize = 12;

/// Shadow notification for one entity
pub type ShadowCallback = extern "C" fn(user_data: *mut c_void, entity: u64);

/// Create a physics ragdoll posed with `num_bones` row-major 3x4 matrices
///
/// Returns the physics id, or 0 when the model has no collision data.
pub type CreateRagdollCallback = extern "C" fn(
    user_data: *mut c_void,
    entity: u64,
    model: *const c_char,
    bones: *const f32,
    num_bones: usize,
) -> u64;

pub type DestroyRagdollCallback = extern "C" fn(user_data: *mut c_void, id: u64);

/// Callback table supplied by the host
///
/// Any entry may be null; a missing `create_ragdoll` means ragdolls are never
/// created.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostCallbacks {
    pub user_data: *mut c_void,
    pub create_shadow: Option<ShadowCallback>,
    pub destroy_shadow: Option<ShadowCallback>,
    pub mark_shadow_dirty: Option<ShadowCallback>,
    pub create_ragdoll: Option<CreateRagdollCallback>,
    pub destroy_ragdoll: Option<DestroyRagdollCallback>,
}

impl Default for HostCallbacks {
    fn default() -> Self {
        Self {
            user_data: std::ptr::null_mut(),
            create_shadow: None,
            destroy_shadow: None,
            mark_shadow_dirty: None,
            create_ragdoll: None,
            destroy_ragdoll: None,
        }
    }
}

/// Callback table that may cross to the thread driving the world
#[derive(Debug, Clone, Copy)]
struct SendCallbacks(HostCallbacks);

// SAFETY: the host guarantees `user_data` stays valid and the callbacks are
// callable from whichever thread drives the world, for the world's lifetime.
unsafe impl Send for SendCallbacks {}

/// Write `m` as three row-major rows of four floats
pub fn write_matrix(m: &Matrix3x4, out: &mut [f32]) {
    let (x, y, z, t) = (m.matrix3.x_axis, m.matrix3.y_axis, m.matrix3.z_axis, m.translation);
    for row in 0..3 {
        out[row * 4] = x[row];
        out[row * 4 + 1] = y[row];
        out[row * 4 + 2] = z[row];
        out[row * 4 + 3] = t[row];
    }
}

/// Read a matrix written by [`write_matrix`]
pub fn read_matrix(rows: &[f32]) -> Matrix3x4 {
    let col = |c: usize| Vec3A::new(rows[c], rows[4 + c], rows[8 + c]);
    Matrix3x4::from_cols(col(0), col(1), col(2), col(3))
}

/// Simulated ragdoll poses pushed by the host, keyed by physics id
#[derive(Debug, Clone, Default)]
pub struct PoseStore(Arc<Mutex<HashMap<PhysicsRagdollId, Vec<Matrix3x4>>>>);

impl PoseStore {
    /// Replace the pose of `id` with `num_bones` matrices read from `rows`
    pub fn push(&self, id: PhysicsRagdollId, rows: &[f32]) {
        let bones = rows.chunks_exact(MATRIX_FLOATS).map(read_matrix).collect();
        self.0.lock().insert(id, bones);
    }

    pub fn remove(&self, id: PhysicsRagdollId) -> bool {
        self.0.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Shadow manager forwarding to the host
pub struct HostShadowManager {
    callbacks: SendCallbacks,
}

impl HostShadowManager {
    pub fn new(callbacks: HostCallbacks) -> Self {
        Self { callbacks: SendCallbacks(callbacks) }
    }

    fn call(&self, callback: Option<ShadowCallback>, entity: RawEntityHandle) {
        if let Some(callback) = callback {
            callback(self.callbacks.0.user_data, entity);
        }
    }
}

impl ShadowManager for HostShadowManager {
    fn create_shadow(&mut self, entity: RawEntityHandle) {
        self.call(self.callbacks.0.create_shadow, entity);
    }

    fn destroy_shadow(&mut self, entity: RawEntityHandle) {
        self.call(self.callbacks.0.destroy_shadow, entity);
    }

    fn mark_render_to_texture_shadow_dirty(&mut self, entity: RawEntityHandle) {
        self.call(self.callbacks.0.mark_shadow_dirty, entity);
    }
}

/// Ragdoll physics living in the host
///
/// Creation and destruction go through the callbacks; poses are read from the
/// shared [`PoseStore`].
pub struct HostRagdollPhysics {
    callbacks: SendCallbacks,
    poses: PoseStore,
}

impl HostRagdollPhysics {
    pub fn new(callbacks: HostCallbacks, poses: PoseStore) -> Self {
        Self {
            callbacks: SendCallbacks(callbacks),
            poses,
        }
    }
}

impl RagdollPhysics for HostRagdollPhysics {
    fn create_ragdoll(
        &mut self,
        entity: RawEntityHandle,
        model: &str,
        bones: &[Matrix3x4],
    ) -> Option<PhysicsRagdollId> {
        let create = self.callbacks.0.create_ragdoll?;
        let Ok(model_c) = CString::new(model) else {
            tracing::warn!(model, "Model name contains a nul byte, no ragdoll");
            return None;
        };

        let mut rows = vec![0.0; bones.len() * MATRIX_FLOATS];
        for (bone, out) in bones.iter().zip(rows.chunks_exact_mut(MATRIX_FLOATS)) {
            write_matrix(bone, out);
        }

        let id = create(
            self.callbacks.0.user_data,
            entity,
            model_c.as_ptr(),
            rows.as_ptr(),
            bones.len(),
        );
        (id != 0).then_some(id)
    }

    fn read_bone_transforms(&self, id: PhysicsRagdollId, out: &mut Vec<Matrix3x4>) -> bool {
        let poses = self.poses.0.lock();
        match poses.get(&id) {
            Some(bones) if !bones.is_empty() => {
                out.clear();
                out.extend_from_slice(bones);
                true
            }
            _ => false,
        }
    }

    fn destroy_ragdoll(&mut self, id: PhysicsRagdollId) {
        self.poses.remove(id);
        if let Some(destroy) = self.callbacks.0.destroy_ragdoll {
            destroy(self.callbacks.0.user_data, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studioanim_sdk::{angle_matrix, QAngle, Vec3};

    #[test]
    fn test_matrix_rows_match_source_layout() {
        let m = Matrix3x4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let mut rows = [0.0; MATRIX_FLOATS];
        write_matrix(&m, &mut rows);
        assert_eq!(rows, [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0]);

        let rotated = angle_matrix(QAngle::new(10.0, 45.0, 0.0), Vec3::new(4.0, 5.0, 6.0));
        write_matrix(&rotated, &mut rows);
        assert!(read_matrix(&rows).abs_diff_eq(rotated, 1e-6));
    }

    #[test]
    fn test_physics_reads_pushed_pose() {
        let poses = PoseStore::default();
        let mut physics = HostRagdollPhysics::new(HostCallbacks::default(), poses.clone());
        let mut out = Vec::new();
        assert!(!physics.read_bone_transforms(7, &mut out));

        let mut rows = [0.0; MATRIX_FLOATS * 2];
        write_matrix(&Matrix3x4::IDENTITY, &mut rows[..MATRIX_FLOATS]);
        write_matrix(&Matrix3x4::from_translation(Vec3::X), &mut rows[MATRIX_FLOATS..]);
        poses.push(7, &rows);

        assert!(physics.read_bone_transforms(7, &mut out));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].translation, Vec3A::X);

        physics.destroy_ragdoll(7);
        assert_eq!(poses.len(), 0);
    }

    #[test]
    fn test_no_create_callback_means_no_ragdoll() {
        let mut physics = HostRagdollPhysics::new(HostCallbacks::default(), PoseStore::default());
        assert!(physics.create_ragdoll(1, "models/arm.mdl", &[Matrix3x4::IDENTITY]).is_none());
    }

    extern "C" fn count_shadow(user_data: *mut c_void, _entity: u64) {
        // SAFETY: the test passes a pointer to a live u32
        unsafe { *(user_data as *mut u32) += 1 };
    }

    #[test]
    fn test_shadow_callbacks_forwarded() {
        let mut calls = 0u32;
        let callbacks = HostCallbacks {
            user_data: &mut calls as *mut u32 as *mut c_void,
            create_shadow: Some(count_shadow),
            mark_shadow_dirty: Some(count_shadow),
            ..Default::default()
        };
        let mut shadows = HostShadowManager::new(callbacks);
        shadows.create_shadow(3);
        shadows.destroy_shadow(3);
        shadows.mark_render_to_texture_shadow_dirty(3);
        assert_eq!(calls, 2);
    }
}
