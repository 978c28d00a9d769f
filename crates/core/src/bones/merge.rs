//! Bone merge cache
//!
//! Maps a follower model's bones onto the bones of the model it follows by
//! name, so carried props can snap to a character's hand without string
//! compares every frame. The mapping is rebuilt whenever either model changes
//! identity (a different `Arc`), never reused across a swap.

use std::sync::Arc;

use tracing::debug;

use studioanim_sdk::StudioHdr;

#[derive(Debug, Default)]
pub struct BoneMergeCache {
    follower: Option<Arc<StudioHdr>>,
    target: Option<Arc<StudioHdr>>,
    /// Target bone per follower bone, indexed by follower bone
    targets: Vec<Option<usize>>,
    merged: usize,
    rebuilds: u32,
}

fn same_model(a: Option<&Arc<StudioHdr>>, b: Option<&Arc<StudioHdr>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl BoneMergeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the mapping if either model changed since the last call
    pub fn update_cache(&mut self, follower: &Arc<StudioHdr>, target: Option<&Arc<StudioHdr>>) {
        if same_model(self.follower.as_ref(), Some(follower))
            && same_model(self.target.as_ref(), target)
        {
            return;
        }

        self.follower = Some(Arc::clone(follower));
        self.target = target.cloned();
        self.targets.clear();
        self.merged = 0;
        self.rebuilds += 1;

        let Some(target) = target else {
            debug!(follower = %follower.name, "Bone merge target cleared");
            return;
        };

        self.targets = follower
            .bones
            .iter()
            .map(|bone| target.find_bone(&bone.name))
            .collect();
        self.merged = self.targets.iter().flatten().count();

        debug!(
            follower = %follower.name,
            target = %target.name,
            merged = self.merged,
            "Rebuilt bone merge cache"
        );
    }

    /// Drop the mapping so the next update rebuilds it
    pub fn invalidate(&mut self) {
        self.follower = None;
        self.target = None;
        self.targets.clear();
        self.merged = 0;
    }

    pub fn is_bone_merged(&self, bone: usize) -> bool {
        self.find_target_bone(bone).is_some()
    }

    /// Target bone for a follower bone, `None` when the target has no bone of that name
    #[inline]
    pub fn find_target_bone(&self, my_bone: usize) -> Option<usize> {
        self.targets.get(my_bone).copied().flatten()
    }

    pub fn has_merged_bones(&self) -> bool {
        self.merged > 0
    }

    /// Number of times the mapping was rebuilt
    pub fn rebuild_count(&self) -> u32 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{arm_model, arm_model_without_hand, weapon_model};
    
    #[test]
    fn test_resolves_weapon_hand() {
        let arm = Arc::new(arm_model());
        let weapon = Arc::new(weapon_model());

        let mut cache = BoneMergeCache::new();
        cache.update_cache(&weapon, Some(&arm));

        assert!(cache.is_bone_merged(0));
        assert_eq!(cache.find_target_bone(0), Some(2));
        assert!(cache.has_merged_bones());
    }

    #[test]
    fn test_reuses_mapping_for_same_models() {
        let arm = Arc::new(arm_model());
        let weapon = Arc::new(weapon_model());

        let mut cache = BoneMergeCache::new();
        cache.update_cache(&weapon, Some(&arm));
        cache.update_cache(&weapon, Some(&arm));
        assert_eq!(cache.rebuild_count(), 1);
    }

    #[test]
    fn test_model_swap_invalidates() {
        let arm = Arc::new(arm_model());
        let weapon = Arc::new(weapon_model());
        let stump = Arc::new(arm_model_without_hand());

        let mut cache = BoneMergeCache::new();
        cache.update_cache(&weapon, Some(&arm));
        cache.update_cache(&weapon, Some(&stump));

        assert_eq!(cache.rebuild_count(), 2);
        assert!(!cache.is_bone_merged(0));
        assert_eq!(cache.find_target_bone(0), None);
    }

    #[test]
    fn test_unmatched_and_out_of_range_bones_miss() {
        let arm = Arc::new(arm_model());
        let weapon = Arc::new(weapon_model());

        let mut cache = BoneMergeCache::new();
        cache.update_cache(&arm, Some(&weapon));

        // only the arm's hand exists on the weapon
        assert_eq!(cache.find_target_bone(0), None);
        assert_eq!(cache.find_target_bone(1), None);
        assert_eq!(cache.find_target_bone(2), Some(0));
        assert_eq!(cache.find_target_bone(99), None);

        cache.invalidate();
        assert!(!cache.has_merged_bones());
    }
}
