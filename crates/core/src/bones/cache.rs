//! Shared bone cache pool
//!
//! Every entity that serves hitbox queries keeps one entry here. An entry
//! copies only the bones its mask selects (plus root bones) and remembers the
//! epoch, owner generation and time it was filled. The pool is bounded by a byte budget; when an
//! insert would exceed it the least recently used entries are dropped. Handles
//! to dropped entries are generation-checked and simply miss.

use slotmap::{new_key_type, SlotMap};
use tracing::{debug, trace};

use studioanim_engine::INVALID_EPOCH;
use studioanim_sdk::{BoneMask, Matrix3x4, StudioHdr};

new_key_type! {
    /// Key for a bone cache entry
    pub struct BoneCacheHandle;
}

/// Cached bone-to-world matrices for the bones selected by one mask
#[derive(Debug, Clone)]
pub struct BoneCache {
    matrices: Vec<Matrix3x4>,
    studio_to_cached: Vec<Option<u16>>,
    cached_to_studio: Vec<u16>,
    bone_mask: BoneMask,
    time_valid: f32,
    epoch: u64,
    /// Owner's invalidation count when filled
    generation: u64,
    last_used: u64,
}

impl BoneCache {
    fn new(hdr: &StudioHdr, mask: BoneMask) -> Self {
        let mut studio_to_cached = vec![None; hdr.num_bones()];
        let mut cached_to_studio = Vec::new();

        for (index, bone) in hdr.bones.iter().enumerate() {
            if bone.parent.is_none() || bone.flags.intersects(mask) {
                studio_to_cached[index] = Some(cached_to_studio.len() as u16);
                cached_to_studio.push(index as u16);
            }
        }

        Self {
            matrices: vec![Matrix3x4::IDENTITY; cached_to_studio.len()],
            studio_to_cached,
            cached_to_studio,
            bone_mask: mask,
            time_valid: -1.0,
            epoch: INVALID_EPOCH,
            generation: 0,
            last_used: 0,
        }
    }

    /// Approximate memory held by the entry
    pub fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.matrices.len() * std::mem::size_of::<Matrix3x4>()
            + self.studio_to_cached.len() * std::mem::size_of::<Option<u16>>()
            + self.cached_to_studio.len() * std::mem::size_of::<u16>()
    }

    /// Copy the cached subset out of a full bone-to-world array
    pub fn update_bones(&mut self, bone_to_world: &[Matrix3x4], time: f32, epoch: u64, generation: u64) {
        for (cached, &studio) in self.cached_to_studio.iter().enumerate() {
            if let Some(m) = bone_to_world.get(studio as usize) {
                self.matrices[cached] = *m;
            }
        }
        self.time_valid = time;
        self.epoch = epoch;
        self.generation = generation;
    }

    /// Cached matrix for a studio bone index, if that bone is cached
    pub fn get_cached_bone(&self, studio_bone: usize) -> Option<&Matrix3x4> {
        let cached = (*self.studio_to_cached.get(studio_bone)?)?;
        self.matrices.get(cached as usize)
    }

    /// Write every cached bone back into a full bone-to-world array
    pub fn read_cached_bones(&self, out: &mut [Matrix3x4]) {
        for (cached, &studio) in self.cached_to_studio.iter().enumerate() {
            if let Some(slot) = out.get_mut(studio as usize) {
                *slot = self.matrices[cached];
            }
        }
    }

    pub fn num_cached_bones(&self) -> usize {
        self.cached_to_studio.len()
    }

    #[inline]
    pub fn bone_mask(&self) -> BoneMask {
        self.bone_mask
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the entry was filled within `dt` seconds before `time`
    pub fn is_valid(&self, time: f32, dt: f32) -> bool {
        time >= self.time_valid && time - self.time_valid <= dt
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the entry was filled in `epoch`, after the owner's last
    /// invalidation, and covers `mask`
    pub fn is_valid_for(&self, epoch: u64, generation: u64, mask: BoneMask) -> bool {
        self.epoch == epoch && self.generation == generation && self.bone_mask.contains(mask)
    }

    pub fn invalidate(&mut self) {
        self.time_valid = -1.0;
        self.epoch = INVALID_EPOCH;
    }
}

/// Budgeted pool of [`BoneCache`] entries
#[derive(Debug)]
pub struct BoneCachePool {
    entries: SlotMap<BoneCacheHandle, BoneCache>,
    budget_bytes: usize,
    used_bytes: usize,
    clock: u64,
}

impl BoneCachePool {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: SlotMap::with_key(),
            budget_bytes,
            used_bytes: 0,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Create an entry for `mask` and fill it
    ///
    /// # Returns
    /// The new handle. Older entries may have been evicted to make room.
    pub fn create(
        &mut self,
        hdr: &StudioHdr,
        mask: BoneMask,
        bone_to_world: &[Matrix3x4],
        time: f32,
        epoch: u64,
        generation: u64,
    ) -> BoneCacheHandle {
        let mut cache = BoneCache::new(hdr, mask);
        cache.update_bones(bone_to_world, time, epoch, generation);
        cache.last_used = self.tick();

        let size = cache.size_bytes();
        self.evict_until_fits(size);

        self.used_bytes += size;
        let handle = self.entries.insert(cache);
        trace!(?handle, size, used = self.used_bytes, "Bone cache created");
        handle
    }

    fn evict_until_fits(&mut self, incoming: usize) {
        while self.used_bytes + incoming > self.budget_bytes {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, cache)| cache.last_used)
                .map(|(handle, _)| handle);

            let Some(handle) = oldest else {
                break;
            };

            debug!(?handle, "Evicting bone cache entry");
            self.destroy(handle);
        }
    }

    /// Look up an entry, marking it recently used
    pub fn get(&mut self, handle: BoneCacheHandle) -> Option<&BoneCache> {
        let stamp = self.tick();
        let cache = self.entries.get_mut(handle)?;
        cache.last_used = stamp;
        Some(cache)
    }

    pub fn get_mut(&mut self, handle: BoneCacheHandle) -> Option<&mut BoneCache> {
        let stamp = self.tick();
        let cache = self.entries.get_mut(handle)?;
        cache.last_used = stamp;
        Some(cache)
    }

    /// Look up an entry without touching its LRU position
    pub fn peek(&self, handle: BoneCacheHandle) -> Option<&BoneCache> {
        self.entries.get(handle)
    }

    pub fn destroy(&mut self, handle: BoneCacheHandle) -> bool {
        match self.entries.remove(handle) {
            Some(cache) => {
                self.used_bytes = self.used_bytes.saturating_sub(cache.size_bytes());
                true
            }
            None => false,
        }
    }

    /// Mark every entry stale (level change, model reload)
    pub fn invalidate_all(&mut self) {
        for cache in self.entries.values_mut() {
            cache.invalidate();
        }
        debug!(entries = self.entries.len(), "Invalidated all bone caches");
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.used_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }
}
