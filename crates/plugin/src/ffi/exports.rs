//! C-compatible exports called by the host engine
//!
//! Worlds and entities cross the boundary as `u64` ids; 0 is never a valid
//! id. Matrices cross as twelve floats, three rows of four with the
//! translation in the last column. Functions that can fail take an optional
//! `error` buffer of `maxlen` bytes that receives a nul-terminated message.
//!
//! Host callbacks run while the world is locked and must not call back into
//! these exports.

use std::ffi::{c_char, c_int, CStr};
use std::panic::AssertUnwindSafe;

use tracing::instrument;
use tracing_subscriber::EnvFilter;

use studioanim_core::entities::INVALID_RAW_HANDLE;
use studioanim_core::{
    AnimConfig, AnimError, DataUpdateType, EntityHandle, EntityKind, FrameStats, NetworkUpdate, World,
};
use studioanim_sdk::{BoneMask, Matrix3x4};

use super::host::{write_matrix, HostCallbacks, HostRagdollPhysics, HostShadowManager, PoseStore, MATRIX_FLOATS};
use super::registry::{self, WorldEntry};

// Plugin metadata - static strings with null terminators for C compatibility
static NAME: &[u8] = b"studioanim\0";
static DESCRIPTION: &[u8] = b"Studio model animation, bone and ragdoll core\0";
static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
static LOG_TAG: &[u8] = b"STUDIOANIM\0";

/// Entity kind codes accepted by [`studioanim_entity_create`]
pub const ENTITY_KIND_BASE: c_int = 0;
pub const ENTITY_KIND_PROP: c_int = 1;
pub const ENTITY_KIND_VIEW_MODEL: c_int = 2;

/// Per-frame counters returned by [`studioanim_end_frame`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FfiFrameStats {
    pub frame: u64,
    pub elapsed_us: u64,
    pub bone_setups: u64,
    pub events_fired: u64,
    pub ragdolls_destroyed: u64,
    pub over_budget: bool,
}

impl From<FrameStats> for FfiFrameStats {
    fn from(stats: FrameStats) -> Self {
        Self {
            frame: stats.frame,
            elapsed_us: u64::try_from(stats.elapsed.as_micros()).unwrap_or(u64::MAX),
            bone_setups: stats.bone_setups,
            events_fired: stats.events_fired,
            ragdolls_destroyed: stats.ragdolls_destroyed,
            over_budget: stats.over_budget,
        }
    }
}

/// Install the log subscriber; later calls are no-ops
fn init_logging(config: &AnimConfig) {
    let fallback = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Run `f`, turning a panic into `fallback`
fn guarded<R>(name: &str, fallback: R, f: impl FnOnce() -> R) -> R {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(export = name, "Panic crossed the C boundary, swallowed");
            fallback
        }
    }
}

/// Run `f` against a world, reporting failures into the error buffer
///
/// # Safety
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
unsafe fn with_world_or_report<R>(
    name: &str,
    world: u64,
    error: *mut c_char,
    maxlen: usize,
    fallback: R,
    f: impl FnOnce(&mut WorldEntry) -> Result<R, AnimError>,
) -> R {
    let result = guarded(name, None, || registry::with_world(world, f));
    match result {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            tracing::error!(export = name, %e, "Call failed");
            write_error(error, maxlen, &e.to_string());
            fallback
        }
        None => {
            write_error(error, maxlen, "Unknown world");
            fallback
        }
    }
}

/// Borrow a C string as UTF-8
///
/// # Safety
/// - `s` must be a valid null-terminated C string or null
unsafe fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

/// Create a world
///
/// # Arguments
/// * `config_path` - TOML config file, created with defaults if missing; null for built-in defaults
/// * `callbacks` - Host callback table, or null to run without shadows and ragdoll physics
///
/// # Returns
/// The world id, or 0 on failure
///
/// # Safety
/// - `config_path` must be a valid null-terminated C string or null
/// - `callbacks` must point to a valid [`HostCallbacks`] or be null
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_world_create(
    config_path: *const c_char,
    callbacks: *const HostCallbacks,
    error: *mut c_char,
    maxlen: usize,
) -> u64 {
    let config = if config_path.is_null() {
        AnimConfig::default()
    } else {
        let Some(path) = str_arg(config_path) else {
            write_error(error, maxlen, "Config path is not valid UTF-8");
            return 0;
        };
        match AnimConfig::load_from(std::path::Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                write_error(error, maxlen, &format!("Config error: {}", e));
                return 0;
            }
        }
    };

    init_logging(&config);

    let callbacks = callbacks.as_ref().copied().unwrap_or_default();
    guarded("studioanim_world_create", 0, move || {
        let poses = PoseStore::default();
        let world = World::new(
            config,
            Box::new(HostShadowManager::new(callbacks)),
            Box::new(HostRagdollPhysics::new(callbacks, poses.clone())),
        );
        let id = registry::insert(WorldEntry { world, poses });
        tracing::info!(world = id, live = registry::len(), "World registered");
        id
    })
}

/// Shut down and free a world
#[no_mangle]
#[instrument]
pub extern "C" fn studioanim_world_destroy(world: u64) -> bool {
    guarded("studioanim_world_destroy", false, || match registry::remove(world) {
        Some(mut entry) => {
            entry.world.level_shutdown();
            true
        }
        None => false,
    })
}

/// Drop every entity and cache of a world, keeping its models
#[no_mangle]
pub extern "C" fn studioanim_level_shutdown(world: u64) -> bool {
    guarded("studioanim_level_shutdown", false, || {
        registry::with_world(world, |entry| entry.world.level_shutdown()).is_some()
    })
}

/// Register (or replace) a studio model described as JSON
///
/// # Safety
/// - `json` must be a valid null-terminated C string
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_register_model_json(
    world: u64,
    json: *const c_char,
    error: *mut c_char,
    maxlen: usize,
) -> bool {
    let Some(json) = str_arg(json) else {
        write_error(error, maxlen, "Model JSON is null or not UTF-8");
        return false;
    };
    with_world_or_report("studioanim_register_model_json", world, error, maxlen, false, |entry| {
        entry.world.register_model_json(json).map(|_| true)
    })
}

/// Create an entity of kind `kind` (see the `ENTITY_KIND_*` codes)
///
/// # Returns
/// The entity id, or 0 on failure
///
/// # Safety
/// - `model` must be a valid null-terminated C string or null
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_entity_create(
    world: u64,
    kind: c_int,
    model: *const c_char,
    error: *mut c_char,
    maxlen: usize,
) -> u64 {
    let kind = match kind {
        ENTITY_KIND_BASE => EntityKind::Base,
        ENTITY_KIND_PROP => EntityKind::Prop,
        ENTITY_KIND_VIEW_MODEL => EntityKind::ViewModel,
        other => {
            write_error(error, maxlen, &format!("Unknown entity kind {}", other));
            return INVALID_RAW_HANDLE;
        }
    };
    let model = str_arg(model);
    with_world_or_report("studioanim_entity_create", world, error, maxlen, INVALID_RAW_HANDLE, |entry| {
        entry.world.create_entity(kind, model).map(EntityHandle::to_raw)
    })
}

#[no_mangle]
pub extern "C" fn studioanim_entity_destroy(world: u64, entity: u64) -> bool {
    guarded("studioanim_entity_destroy", false, || {
        registry::with_world(world, |entry| {
            entry.world.destroy_entity(EntityHandle::from_raw(entity))
        })
        .unwrap_or(false)
    })
}

/// Start a frame
#[no_mangle]
pub extern "C" fn studioanim_begin_frame(world: u64, curtime: f32, frametime: f32) -> bool {
    guarded("studioanim_begin_frame", false, || {
        registry::with_world(world, |entry| entry.world.begin_frame(curtime, frametime)).is_some()
    })
}

/// Apply a networked update encoded as JSON
///
/// `update_type` is 0 for the update that created the entity, anything else
/// for a later change.
///
/// # Returns
/// `true` if the update was applied
///
/// # Safety
/// - `json` must be a valid null-terminated C string
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_network_update_json(
    world: u64,
    entity: u64,
    update_type: u32,
    json: *const c_char,
    error: *mut c_char,
    maxlen: usize,
) -> bool {
    let Some(json) = str_arg(json) else {
        write_error(error, maxlen, "Update JSON is null or not UTF-8");
        return false;
    };
    let update: NetworkUpdate = match serde_json::from_str(json) {
        Ok(update) => update,
        Err(e) => {
            write_error(error, maxlen, &format!("Update parse error: {}", e));
            return false;
        }
    };
    with_world_or_report("studioanim_network_update_json", world, error, maxlen, false, |entry| {
        entry
            .world
            .apply_network_update(
                EntityHandle::from_raw(entity),
                &update,
                DataUpdateType::from_raw(update_type),
            )
            .map(|_| true)
    })
}

/// Advance client-side animated entities
///
/// # Returns
/// The number of entities advanced, or -1 for an unknown world
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn studioanim_update_client_side_animations(world: u64) -> c_int {
    guarded("studioanim_update_client_side_animations", -1, || {
        registry::with_world(world, |entry| {
            c_int::try_from(entry.world.update_client_side_animations()).unwrap_or(c_int::MAX)
        })
        .unwrap_or(-1)
    })
}

/// Simulate entities, dispatch animation events and age ragdolls
///
/// # Returns
/// The number of entities simulated, or -1 for an unknown world
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn studioanim_simulate(world: u64) -> c_int {
    guarded("studioanim_simulate", -1, || {
        registry::with_world(world, |entry| {
            c_int::try_from(entry.world.simulate()).unwrap_or(c_int::MAX)
        })
        .unwrap_or(-1)
    })
}

/// Set up bones for every drawable entity
///
/// # Returns
/// The number of entities set up, or -1 for an unknown world
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn studioanim_render(world: u64) -> c_int {
    guarded("studioanim_render", -1, || {
        registry::with_world(world, |entry| {
            c_int::try_from(entry.world.render()).unwrap_or(c_int::MAX)
        })
        .unwrap_or(-1)
    })
}

/// Finish a frame, optionally copying its counters to `out_stats`
///
/// # Safety
/// - `out_stats` must point to a writable [`FfiFrameStats`] or be null
#[no_mangle]
pub unsafe extern "C" fn studioanim_end_frame(world: u64, out_stats: *mut FfiFrameStats) -> bool {
    let stats = guarded("studioanim_end_frame", None, || {
        registry::with_world(world, |entry| entry.world.end_frame())
    });
    match stats {
        Some(stats) => {
            if !out_stats.is_null() {
                *out_stats = stats.into();
            }
            true
        }
        None => false,
    }
}

/// Compute an entity's bones for the `BoneMask` bits in `mask`
///
/// # Safety
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_setup_bones(
    world: u64,
    entity: u64,
    mask: u32,
    error: *mut c_char,
    maxlen: usize,
) -> bool {
    let mask = BoneMask::from_bits_truncate(mask);
    with_world_or_report("studioanim_setup_bones", world, error, maxlen, false, |entry| {
        entry
            .world
            .setup_bones(EntityHandle::from_raw(entity), mask)
            .map(|()| true)
    })
}

/// Read a bone-to-world matrix computed this frame
///
/// # Safety
/// - `out` must point to 12 writable floats
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_bone_to_world(
    world: u64,
    entity: u64,
    bone: usize,
    out: *mut f32,
    error: *mut c_char,
    maxlen: usize,
) -> bool {
    if out.is_null() {
        write_error(error, maxlen, "Output matrix is null");
        return false;
    }
    let matrix = with_world_or_report("studioanim_bone_to_world", world, error, maxlen, None, |entry| {
        entry
            .world
            .bone_to_world(EntityHandle::from_raw(entity), bone)
            .map(Some)
    });
    write_matrix_out(matrix, out)
}

/// Look up a bone index by name, -1 if absent
///
/// # Safety
/// - `name` must be a valid null-terminated C string
#[no_mangle]
pub unsafe extern "C" fn studioanim_lookup_bone(world: u64, entity: u64, name: *const c_char) -> c_int {
    let Some(name) = str_arg(name) else {
        return -1;
    };
    guarded("studioanim_lookup_bone", -1, || {
        registry::with_world(world, |entry| entry.world.lookup_bone(EntityHandle::from_raw(entity), name))
            .flatten()
            .and_then(|bone| c_int::try_from(bone).ok())
            .unwrap_or(-1)
    })
}

/// Read an attachment-to-world matrix, setting up bones if needed
///
/// # Safety
/// - `out` must point to 12 writable floats
#[no_mangle]
pub unsafe extern "C" fn studioanim_get_attachment(
    world: u64,
    entity: u64,
    attachment: usize,
    out: *mut f32,
) -> bool {
    if out.is_null() {
        return false;
    }
    let matrix = guarded("studioanim_get_attachment", None, || {
        registry::with_world(world, |entry| {
            entry
                .world
                .get_attachment_matrix(EntityHandle::from_raw(entity), attachment)
        })
        .flatten()
    });
    write_matrix_out(matrix, out)
}

/// Turn an entity into a client-side ragdoll
///
/// # Returns
/// The ragdoll entity id, or 0 on failure
///
/// # Safety
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_become_ragdoll(
    world: u64,
    entity: u64,
    error: *mut c_char,
    maxlen: usize,
) -> u64 {
    with_world_or_report("studioanim_become_ragdoll", world, error, maxlen, INVALID_RAW_HANDLE, |entry| {
        entry
            .world
            .become_ragdoll_on_client(EntityHandle::from_raw(entity))
            .map(EntityHandle::to_raw)
    })
}

/// Hand a simulated pose to a physics ragdoll
///
/// `bones` holds `num_bones` matrices of 12 floats each. The pose is picked
/// up by the next [`studioanim_simulate`].
///
/// # Safety
/// - `bones` must point to `num_bones * 12` readable floats
#[no_mangle]
pub unsafe extern "C" fn studioanim_ragdoll_push_bones(
    world: u64,
    physics_id: u64,
    bones: *const f32,
    num_bones: usize,
) -> bool {
    if bones.is_null() || num_bones == 0 {
        return false;
    }
    let Some(len) = num_bones
        .checked_mul(MATRIX_FLOATS)
        .filter(|&len| len <= isize::MAX as usize / std::mem::size_of::<f32>())
    else {
        tracing::warn!(num_bones, "Ragdoll pose too large, ignored");
        return false;
    };
    let rows = std::slice::from_raw_parts(bones, len);
    guarded("studioanim_ragdoll_push_bones", false, || {
        registry::with_world(world, |entry| entry.poses.push(physics_id, rows)).is_some()
    })
}

/// Blend `source` back out of the pose of `ragdoll` and show it again
///
/// # Safety
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
pub unsafe extern "C" fn studioanim_unragdoll(
    world: u64,
    source: u64,
    ragdoll: u64,
    error: *mut c_char,
    maxlen: usize,
) -> bool {
    with_world_or_report("studioanim_unragdoll", world, error, maxlen, false, |entry| {
        entry
            .world
            .create_unragdoll_info(EntityHandle::from_raw(source), EntityHandle::from_raw(ragdoll))
            .map(|()| true)
    })
}

/// Ask a ragdoll to remove itself on its next think
#[no_mangle]
pub extern "C" fn studioanim_release_ragdoll(world: u64, ragdoll: u64) -> bool {
    guarded("studioanim_release_ragdoll", false, || {
        registry::with_world(world, |entry| {
            entry.world.release_ragdoll(EntityHandle::from_raw(ragdoll)).is_ok()
        })
        .unwrap_or(false)
    })
}

/// Server ragdoll cap; -1 restores the configured default
#[no_mangle]
pub extern "C" fn studioanim_set_max_ragdoll_count(world: u64, max: c_int) -> bool {
    guarded("studioanim_set_max_ragdoll_count", false, || {
        registry::with_world(world, |entry| entry.world.set_max_ragdoll_count(max)).is_some()
    })
}

/// Entity entered or left the potentially visible set
#[no_mangle]
pub extern "C" fn studioanim_set_pvs_state(world: u64, entity: u64, in_pvs: bool) -> bool {
    guarded("studioanim_set_pvs_state", false, || {
        registry::with_world(world, |entry| {
            entry.world.set_pvs_state(EntityHandle::from_raw(entity), in_pvs).is_ok()
        })
        .unwrap_or(false)
    })
}

// Metadata exports - these return static strings for the host to display

#[no_mangle]
pub extern "C" fn studioanim_get_name() -> *const c_char {
    NAME.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn studioanim_get_description() -> *const c_char {
    DESCRIPTION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn studioanim_get_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn studioanim_get_log_tag() -> *const c_char {
    LOG_TAG.as_ptr() as *const c_char
}

/// Copy a matrix into a 12-float out pointer
///
/// # Safety
/// - `out` must point to 12 writable floats
unsafe fn write_matrix_out(matrix: Option<Matrix3x4>, out: *mut f32) -> bool {
    match matrix {
        Some(matrix) => {
            write_matrix(&matrix, std::slice::from_raw_parts_mut(out, MATRIX_FLOATS));
            true
        }
        None => false,
    }
}

/// Helper to write an error message to a C buffer
///
/// # Safety
/// - `error` must be a valid pointer or null
/// - `maxlen` must accurately reflect the buffer size
unsafe fn write_error(error: *mut c_char, maxlen: usize, msg: &str) {
    if !error.is_null() && maxlen > 0 {
        let bytes = msg.as_bytes();
        let len = bytes.len().min(maxlen - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), error as *mut u8, len);
        *error.add(len) = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    const ARM_JSON: &str = r#"{
        "name": "models/ffi_arm.mdl",
        "bones": [
            { "name": "root", "pos": [0.0, 0.0, 0.0], "quat": [0.0, 0.0, 0.0, 1.0] },
            { "name": "hand", "parent": 0, "pos": [0.0, 0.0, 10.0], "quat": [0.0, 0.0, 0.0, 1.0] }
        ]
    }"#;

    fn error_text(buf: &[c_char]) -> String {
        // SAFETY: write_error always nul-terminates inside the buffer
        unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
    }

    unsafe fn arm_world() -> (u64, u64) {
        let world = studioanim_world_create(ptr::null(), ptr::null(), ptr::null_mut(), 0);
        assert_ne!(world, 0);
        let json = CString::new(ARM_JSON).unwrap();
        assert!(studioanim_register_model_json(world, json.as_ptr(), ptr::null_mut(), 0));
        let model = CString::new("models/ffi_arm.mdl").unwrap();
        let entity = studioanim_entity_create(world, ENTITY_KIND_BASE, model.as_ptr(), ptr::null_mut(), 0);
        assert_ne!(entity, INVALID_RAW_HANDLE);
        (world, entity)
    }

    #[test]
    fn test_frame_round_trip_reads_bones() {
        unsafe {
            let (world, entity) = arm_world();
            assert!(studioanim_begin_frame(world, 1.0, 0.016));
            assert!(studioanim_setup_bones(
                world,
                entity,
                BoneMask::USED_BY_ANYTHING.bits(),
                ptr::null_mut(),
                0
            ));

            let mut m = [0.0f32; MATRIX_FLOATS];
            assert!(studioanim_bone_to_world(world, entity, 1, m.as_mut_ptr(), ptr::null_mut(), 0));
            assert_eq!([m[3], m[7], m[11]], [0.0, 0.0, 10.0]);

            let hand = CString::new("HAND").unwrap();
            assert_eq!(studioanim_lookup_bone(world, entity, hand.as_ptr()), 1);

            let mut stats = FfiFrameStats::default();
            assert!(studioanim_end_frame(world, &mut stats));
            assert!(stats.bone_setups >= 1);

            assert!(studioanim_world_destroy(world));
            assert!(!studioanim_begin_frame(world, 2.0, 0.016));
        }
    }

    #[test]
    fn test_errors_reach_the_buffer() {
        unsafe {
            let (world, entity) = arm_world();
            let mut err = [0 as c_char; 128];

            let missing = CString::new("models/missing.mdl").unwrap();
            let none = studioanim_entity_create(world, ENTITY_KIND_PROP, missing.as_ptr(), err.as_mut_ptr(), err.len());
            assert_eq!(none, INVALID_RAW_HANDLE);
            assert!(error_text(&err).contains("missing.mdl"));

            // no setup this frame
            studioanim_begin_frame(world, 1.0, 0.016);
            studioanim_end_frame(world, ptr::null_mut());
            let mut m = [0.0f32; MATRIX_FLOATS];
            assert!(!studioanim_bone_to_world(world, entity, 1, m.as_mut_ptr(), err.as_mut_ptr(), err.len()));
            assert!(!error_text(&err).is_empty());

            assert!(!studioanim_begin_frame(0, 1.0, 0.016));
            assert_eq!(studioanim_simulate(0), -1);
            studioanim_world_destroy(world);
        }
    }

    #[test]
    fn test_network_update_json() {
        unsafe {
            let (world, entity) = arm_world();
            let mut err = [0 as c_char; 128];
            let update = CString::new(r#"{"time": 1.0, "origin": [5.0, 0.0, 0.0]}"#).unwrap();
            assert!(studioanim_network_update_json(world, entity, 0, update.as_ptr(), err.as_mut_ptr(), err.len()));

            let broken = CString::new("{ nope").unwrap();
            assert!(!studioanim_network_update_json(world, entity, 1, broken.as_ptr(), err.as_mut_ptr(), err.len()));
            assert!(error_text(&err).starts_with("Update parse error"));
            studioanim_world_destroy(world);
        }
    }

    #[test]
    fn test_ragdoll_without_physics_fails_cleanly() {
        unsafe {
            let (world, entity) = arm_world();
            let mut err = [0 as c_char; 128];
            studioanim_begin_frame(world, 1.0, 0.016);
            let ragdoll = studioanim_become_ragdoll(world, entity, err.as_mut_ptr(), err.len());
            assert_eq!(ragdoll, INVALID_RAW_HANDLE);
            assert!(!error_text(&err).is_empty());
            studioanim_world_destroy(world);
        }
    }

    #[test]
    fn test_push_bones_rejects_oversized_count() {
        unsafe {
            let (world, _) = arm_world();
            let mut rows = [0.0f32; MATRIX_FLOATS];
            write_matrix(&Matrix3x4::IDENTITY, &mut rows);

            assert!(!studioanim_ragdoll_push_bones(world, 9, rows.as_ptr(), usize::MAX));
            assert!(!studioanim_ragdoll_push_bones(world, 9, rows.as_ptr(), usize::MAX / 16));
            assert!(studioanim_ragdoll_push_bones(world, 9, rows.as_ptr(), 1));
            assert!(studioanim_world_destroy(world));
        }
    }

    #[test]
    fn test_metadata_strings() {
        let name = unsafe { CStr::from_ptr(studioanim_get_name()) };
        assert_eq!(name.to_str().unwrap(), "studioanim");
        let version = unsafe { CStr::from_ptr(studioanim_get_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_write_error_truncates() {
        let mut buf = [0 as c_char; 4];
        unsafe { write_error(buf.as_mut_ptr(), buf.len(), "toolong") };
        assert_eq!(error_text(&buf), "too");
    }
}
