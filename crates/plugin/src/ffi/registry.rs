//! Process-wide table of live worlds

use std::sync::LazyLock;

use parking_lot::Mutex;
use slotmap::{new_key_type, Key, KeyData, SlotMap};

use studioanim_core::World;

use super::host::PoseStore;

new_key_type! {
    /// Opaque world id handed to the host
    pub struct WorldKey;
}

/// A world plus the pose inbox its physics backend reads from
pub struct WorldEntry {
    pub world: World,
    pub poses: PoseStore,
}

static WORLDS: LazyLock<Mutex<SlotMap<WorldKey, WorldEntry>>> =
    LazyLock::new(|| Mutex::new(SlotMap::with_key()));

/// Register a world, returning its raw id (never 0)
pub fn insert(entry: WorldEntry) -> u64 {
    WORLDS.lock().insert(entry).data().as_ffi()
}

pub fn remove(raw: u64) -> Option<WorldEntry> {
    WORLDS.lock().remove(key_from_raw(raw)?)
}

/// Run `f` against the world with id `raw`
///
/// # Returns
/// `None` if no such world exists
pub fn with_world<R>(raw: u64, f: impl FnOnce(&mut WorldEntry) -> R) -> Option<R> {
    let key = key_from_raw(raw)?;
    let mut worlds = WORLDS.lock();
    worlds.get_mut(key).map(f)
}

pub fn len() -> usize {
    WORLDS.lock().len()
}

fn key_from_raw(raw: u64) -> Option<WorldKey> {
    (raw != 0).then(|| WorldKey::from(KeyData::from_ffi(raw)))
}
