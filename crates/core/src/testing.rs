//! Shared test fixtures and mock collaborators

use std::collections::HashMap;
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, FRAC_PI_6};
use std::sync::Arc;

use parking_lot::Mutex;

use studioanim_sdk::{
    AnimDesc, AnimEventDesc, BoneKey, HitboxSet, Matrix3x4, PhysicsRagdollId, PoseParamDesc, Quat,
    RagdollPhysics, RawEntityHandle, SeqDesc, SequenceFlags, ShadowManager, StudioAttachment,
    StudioBone, StudioHdr, StudioHitbox, Vec3,
};

pub const SEQ_IDLE: i32 = 0;
pub const SEQ_FIRE: i32 = 1;
pub const SEQ_POSE_A: i32 = 2;
pub const SEQ_POSE_B: i32 = 3;
pub const SEQ_AIM: i32 = 4;
pub const SEQ_FLINCH: i32 = 5;
pub const SEQ_SNAP_B: i32 = 6;

pub const EVENT_QUARTER: i32 = 100;
pub const EVENT_THREE_QUARTER: i32 = 200;
pub const EVENT_FIRE: i32 = 300;

/// Animation whose every frame holds the same keys
fn static_anim(name: &str, keys: Vec<BoneKey>) -> AnimDesc {
    AnimDesc {
        name: name.to_string(),
        fps: 10.0,
        frames: vec![keys.clone(), keys],
        movement: Vec3::ZERO,
    }
}

fn arm_keys(upper_pos: Vec3, upper_rot: Quat) -> Vec<BoneKey> {
    vec![
        BoneKey::new(Vec3::ZERO, Quat::IDENTITY),
        BoneKey::new(upper_pos, upper_rot),
        BoneKey::new(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY),
    ]
}

/// Three-bone arm: root -> upper_arm -> weapon_hand
///
/// - `idle` loops at one cycle per second, rotating the upper arm a quarter
///   turn, with events at 0.25 and 0.75
/// - `fire` is non-looping at two cycles per second with an event at 0.5
/// - `pose_a` / `pose_b` are static poses for transition checks
/// - `aim` blends two animations along the `aim_yaw` pose parameter
/// - `flinch` is a delta sequence adding 30 degrees to the upper arm
pub fn arm_model() -> StudioHdr {
    let idle = AnimDesc {
        name: "idle_anim".to_string(),
        fps: 10.0,
        frames: (0..11)
            .map(|f| {
                arm_keys(
                    Vec3::new(10.0, 0.0, 0.0),
                    Quat::from_rotation_z(f as f32 / 10.0 * FRAC_PI_2),
                )
            })
            .collect(),
        movement: Vec3::new(20.0, 0.0, 0.0),
    };

    let fire = AnimDesc {
        name: "fire_anim".to_string(),
        fps: 10.0,
        frames: (0..6)
            .map(|_| arm_keys(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY))
            .collect(),
        movement: Vec3::ZERO,
    };

    let animations = vec![
        idle,
        fire,
        static_anim("pose_a", arm_keys(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY)),
        static_anim(
            "pose_b",
            arm_keys(Vec3::new(20.0, 0.0, 0.0), Quat::from_rotation_z(FRAC_PI_2)),
        ),
        static_anim(
            "aim_left",
            arm_keys(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_z(-FRAC_PI_4)),
        ),
        static_anim(
            "aim_right",
            arm_keys(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_z(FRAC_PI_4)),
        ),
        static_anim(
            "flinch_delta",
            vec![
                BoneKey::new(Vec3::ZERO, Quat::IDENTITY),
                BoneKey::new(Vec3::ZERO, Quat::from_rotation_z(FRAC_PI_6)),
                BoneKey::new(Vec3::ZERO, Quat::IDENTITY),
            ],
        ),
    ];

    let mut idle_seq = SeqDesc::new("idle", 0, SequenceFlags::LOOPING);
    idle_seq.activity = Some("ACT_IDLE".to_string());
    idle_seq.activity_weight = 1;
    idle_seq.events = vec![
        AnimEventDesc {
            cycle: 0.25,
            event: EVENT_QUARTER,
            options: "left_foot".to_string(),
        },
        AnimEventDesc {
            cycle: 0.75,
            event: EVENT_THREE_QUARTER,
            options: "right_foot".to_string(),
        },
    ];

    let mut fire_seq = SeqDesc::new("fire", 1, SequenceFlags::empty());
    fire_seq.activity = Some("ACT_RANGE_ATTACK1".to_string());
    fire_seq.activity_weight = 1;
    fire_seq.events = vec![AnimEventDesc {
        cycle: 0.5,
        event: EVENT_FIRE,
        options: String::new(),
    }];

    let mut aim_seq = SeqDesc::new("aim", 4, SequenceFlags::LOOPING);
    aim_seq.anims = vec![4, 5];
    aim_seq.param_index = Some(0);

    let sequences = vec![
        idle_seq,
        fire_seq,
        SeqDesc::new("pose_a", 2, SequenceFlags::LOOPING),
        SeqDesc::new("pose_b", 3, SequenceFlags::LOOPING),
        aim_seq,
        SeqDesc::new("flinch", 6, SequenceFlags::LOOPING | SequenceFlags::DELTA),
        SeqDesc::new("snap_b", 3, SequenceFlags::LOOPING | SequenceFlags::SNAP),
    ];

    StudioHdr {
        name: "models/arm.mdl".to_string(),
        bones: vec![
            StudioBone::new("root", None, Vec3::ZERO, Quat::IDENTITY),
            StudioBone::new("upper_arm", Some(0), Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY),
            StudioBone::new("weapon_hand", Some(1), Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY),
        ],
        animations,
        sequences,
        pose_parameters: vec![PoseParamDesc::new("aim_yaw", -45.0, 45.0)],
        attachments: vec![StudioAttachment {
            name: "muzzle".to_string(),
            bone: 2,
            local: Matrix3x4::from_translation(Vec3::new(5.0, 0.0, 0.0)),
        }],
        hitbox_sets: vec![HitboxSet {
            name: "default".to_string(),
            hitboxes: vec![
                StudioHitbox {
                    bone: 1,
                    group: 0,
                    mins: Vec3::splat(-2.0),
                    maxs: Vec3::splat(2.0),
                },
                StudioHitbox {
                    bone: 2,
                    group: 1,
                    mins: Vec3::splat(-1.0),
                    maxs: Vec3::splat(1.0),
                },
            ],
        }],
        ..Default::default()
    }
}

/// Arm whose hand bone has a different name, so nothing merges onto it
pub fn arm_model_without_hand() -> StudioHdr {
    let mut hdr = arm_model();
    hdr.name = "models/arm_stump.mdl".to_string();
    hdr.bones[2].name = "stump".to_string();
    hdr
}

/// Single-bone prop meant to follow the arm's hand
pub fn weapon_model() -> StudioHdr {
    StudioHdr {
        name: "models/weapon.mdl".to_string(),
        bones: vec![StudioBone::new("weapon_hand", None, Vec3::ZERO, Quat::IDENTITY)],
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowCall {
    Create(RawEntityHandle),
    Destroy(RawEntityHandle),
    Dirty(RawEntityHandle),
}

/// Shadow manager that records every call
#[derive(Debug, Clone, Default)]
pub struct RecordingShadowManager {
    pub calls: Arc<Mutex<Vec<ShadowCall>>>,
}

impl ShadowManager for RecordingShadowManager {
    fn create_shadow(&mut self, entity: RawEntityHandle) {
        self.calls.lock().push(ShadowCall::Create(entity));
    }

    fn destroy_shadow(&mut self, entity: RawEntityHandle) {
        self.calls.lock().push(ShadowCall::Destroy(entity));
    }

    fn mark_render_to_texture_shadow_dirty(&mut self, entity: RawEntityHandle) {
        self.calls.lock().push(ShadowCall::Dirty(entity));
    }
}

#[derive(Debug, Default)]
pub struct ScriptedPhysicsState {
    next_id: PhysicsRagdollId,
    pub created: u32,
    pub destroyed: Vec<PhysicsRagdollId>,
    /// `None` until the test steps the ragdoll
    pub bones: HashMap<PhysicsRagdollId, Option<Vec<Matrix3x4>>>,
}

/// Physics backend whose ragdolls only move when the test says so
#[derive(Debug, Clone, Default)]
pub struct ScriptedRagdollPhysics {
    pub state: Arc<Mutex<ScriptedPhysicsState>>,
}

impl ScriptedRagdollPhysics {
    /// Produce a simulated pose for a ragdoll
    pub fn step(&self, id: PhysicsRagdollId, bones: Vec<Matrix3x4>) {
        self.state.lock().bones.insert(id, Some(bones));
    }

    pub fn last_id(&self) -> Option<PhysicsRagdollId> {
        self.state.lock().bones.keys().max().copied()
    }
}

impl RagdollPhysics for ScriptedRagdollPhysics {
    fn create_ragdoll(
        &mut self,
        _entity: RawEntityHandle,
        _model: &str,
        _bones: &[Matrix3x4],
    ) -> Option<PhysicsRagdollId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        state.created += 1;
        let id = state.next_id;
        state.bones.insert(id, None);
        Some(id)
    }

    fn read_bone_transforms(&self, id: PhysicsRagdollId, out: &mut Vec<Matrix3x4>) -> bool {
        let state = self.state.lock();
        match state.bones.get(&id) {
            Some(Some(bones)) => {
                out.clear();
                out.extend_from_slice(bones);
                true
            }
            _ => false,
        }
    }

    fn destroy_ragdoll(&mut self, id: PhysicsRagdollId) {
        let mut state = self.state.lock();
        state.bones.remove(&id);
        state.destroyed.push(id);
    }
}
