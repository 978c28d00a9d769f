//! Model registry
//!
//! Stores immutable [`StudioHdr`] assets behind generation-checked handles and
//! resolves model names through an FNV-1a keyed index. Models are validated on
//! registration so the animation core can index bones, sequences and
//! attachments without re-checking the asset every frame.
//!
//! # Example
//!
//! ```ignore
//! use studioanim_engine::ModelRegistry;
//!
//! let mut models = ModelRegistry::new();
//! let handle = models.register_json(include_str!("soldier.json"))?;
//! let hdr = models.get(handle).expect("just registered");
//! println!("{} bones", hdr.num_bones());
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use slotmap::{new_key_type, SlotMap};

use studioanim_sdk::{BoneFlags, StudioHdr, MAX_STUDIO_BONES, MAX_STUDIO_POSE_PARAM};

use crate::error::{AnimError, AnimResult};

new_key_type! {
    /// Key for registered models
    pub struct ModelHandle;
}

/// FNV-1a 32-bit hash (compile-time capable)
pub const fn fnv1a_32(data: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;

    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i].to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Registry of loaded studio models
#[derive(Default)]
pub struct ModelRegistry {
    models: SlotMap<ModelHandle, Arc<StudioHdr>>,
    by_name: DashMap<u32, ModelHandle>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any model already registered under the same name
    ///
    /// A replaced model keeps its handle but gets a new `Arc`, so anything that
    /// compares model identity (bone merge caches) sees the swap.
    ///
    /// # Returns
    /// The model's handle, or `InvalidModel` if the asset is inconsistent
    #[tracing::instrument(skip_all, fields(model = %hdr.name))]
    pub fn register(&mut self, mut hdr: StudioHdr) -> AnimResult<ModelHandle> {
        validate(&hdr)?;
        propagate_bone_flags(&mut hdr);

        let key = fnv1a_32(hdr.name.as_bytes());
        let existing = self.by_name.get(&key).map(|entry| *entry.value());

        if let Some(handle) = existing {
            if let Some(slot) = self.models.get_mut(handle) {
                *slot = Arc::new(hdr);
                tracing::debug!("Replaced model");
                return Ok(handle);
            }
        }

        tracing::debug!(
            bones = hdr.num_bones(),
            sequences = hdr.num_sequences(),
            "Registered model"
        );
        let handle = self.models.insert(Arc::new(hdr));
        self.by_name.insert(key, handle);
        Ok(handle)
    }

    /// Parse a JSON model description and register it
    pub fn register_json(&mut self, json: &str) -> AnimResult<ModelHandle> {
        let hdr: StudioHdr = serde_json::from_str(json)?;
        self.register(hdr)
    }

    /// Remove a model
    ///
    /// # Returns
    /// `true` if the model was found and removed
    pub fn unregister(&mut self, handle: ModelHandle) -> bool {
        match self.models.remove(handle) {
            Some(hdr) => {
                self.by_name.remove(&fnv1a_32(hdr.name.as_bytes()));
                tracing::debug!(model = %hdr.name, "Unregistered model");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, handle: ModelHandle) -> Option<Arc<StudioHdr>> {
        self.models.get(handle).cloned()
    }

    /// Look up a model by name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<ModelHandle> {
        let handle = *self.by_name.get(&fnv1a_32(name.as_bytes()))?.value();
        let hdr = self.models.get(handle)?;
        hdr.name.eq_ignore_ascii_case(name).then_some(handle)
    }

    pub fn find_or_err(&self, name: &str) -> AnimResult<ModelHandle> {
        self.find(name)
            .ok_or_else(|| AnimError::ModelNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Drop every model (level shutdown)
    pub fn clear(&mut self) {
        self.models.clear();
        self.by_name.clear();
    }
}

fn invalid(hdr: &StudioHdr, reason: impl Into<String>) -> AnimError {
    AnimError::InvalidModel {
        model: hdr.name.clone(),
        reason: reason.into(),
    }
}

/// OR every bone's usage flags into all of its ancestors
///
/// A bone can only be built once its parent is, so a mask that selects a bone
/// must select the whole chain above it. Parents precede children, so one
/// reverse pass reaches the root.
fn propagate_bone_flags(hdr: &mut StudioHdr) {
    for index in (0..hdr.bones.len()).rev() {
        let Some(parent) = hdr.bones[index].parent else {
            continue;
        };
        let used = hdr.bones[index].flags & BoneFlags::USED_BY_ANYTHING;
        hdr.bones[parent].flags |= used;
    }
}

/// Check the structural invariants the animation core relies on
fn validate(hdr: &StudioHdr) -> AnimResult<()> {
    let num_bones = hdr.num_bones();

    if hdr.name.is_empty() {
        return Err(invalid(hdr, "model has no name"));
    }
    if num_bones == 0 {
        return Err(invalid(hdr, "model has no bones"));
    }
    if num_bones > MAX_STUDIO_BONES {
        return Err(invalid(
            hdr,
            format!("{} bones exceeds limit of {}", num_bones, MAX_STUDIO_BONES),
        ));
    }
    if hdr.pose_parameters.len() > MAX_STUDIO_POSE_PARAM {
        return Err(invalid(hdr, "too many pose parameters"));
    }

    for (index, bone) in hdr.bones.iter().enumerate() {
        if let Some(parent) = bone.parent {
            if parent >= index {
                return Err(invalid(
                    hdr,
                    format!("bone {} parent {} does not precede it", bone.name, parent),
                ));
            }
        }
    }

    for anim in &hdr.animations {
        if anim.frames.iter().any(|frame| frame.len() > num_bones) {
            return Err(invalid(hdr, format!("animation {} has too many bones", anim.name)));
        }
    }

    for seq in &hdr.sequences {
        if seq.anims.iter().any(|&anim| anim >= hdr.animations.len()) {
            return Err(invalid(hdr, format!("sequence {} references a missing animation", seq.label)));
        }
        if seq
            .param_index
            .is_some_and(|param| param >= hdr.pose_parameters.len())
        {
            return Err(invalid(hdr, format!("sequence {} blends on a missing pose parameter", seq.label)));
        }
        if seq.bone_weights.len() > num_bones {
            return Err(invalid(hdr, format!("sequence {} has too many bone weights", seq.label)));
        }
    }

    if hdr.attachments.iter().any(|a| a.bone >= num_bones) {
        return Err(invalid(hdr, "attachment on a missing bone"));
    }

    let hitbox_ok = hdr
        .hitbox_sets
        .iter()
        .flat_map(|set| set.hitboxes.iter())
        .all(|hitbox| hitbox.bone < num_bones);
    if !hitbox_ok {
        return Err(invalid(hdr, "hitbox on a missing bone"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use studioanim_sdk::{Quat, StudioBone, Vec3};

    fn model(name: &str) -> StudioHdr {
        StudioHdr {
            name: name.to_string(),
            bones: vec![StudioBone::new("root", None, Vec3::ZERO, Quat::IDENTITY)],
            ..Default::default()
        }
    }

    #[test]
    fn test_fnv1a_ignores_case() {
        assert_eq!(fnv1a_32(b"Models/Soldier.mdl"), fnv1a_32(b"models/soldier.mdl"));
        assert_eq!(fnv1a_32(b""), 0x811c9dc5);
    }

    #[test]
    fn test_register_and_find() {
        let mut registry = ModelRegistry::new();
        let handle = registry.register(model("models/a.mdl")).unwrap();

        assert_eq!(registry.find("MODELS/A.MDL"), Some(handle));
        assert_eq!(registry.get(handle).unwrap().name, "models/a.mdl");
        assert!(matches!(
            registry.find_or_err("models/b.mdl"),
            Err(AnimError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_reregister_swaps_arc() {
        let mut registry = ModelRegistry::new();
        let handle = registry.register(model("models/a.mdl")).unwrap();
        let first = registry.get(handle).unwrap();

        let again = registry.register(model("models/a.mdl")).unwrap();
        assert_eq!(handle, again);
        assert!(!Arc::ptr_eq(&first, &registry.get(handle).unwrap()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_invalidates_handle() {
        let mut registry = ModelRegistry::new();
        let handle = registry.register(model("models/a.mdl")).unwrap();
        assert!(registry.unregister(handle));
        assert!(registry.get(handle).is_none());
        assert!(registry.find("models/a.mdl").is_none());
        assert!(!registry.unregister(handle));
    }

    #[test]
    fn test_rejects_bad_parent_order() {
        let mut hdr = model("models/bad.mdl");
        hdr.bones[0].parent = Some(0);
        assert!(matches!(
            ModelRegistry::new().register(hdr),
            Err(AnimError::InvalidModel { .. })
        ));
    }

    #[test]
    fn test_usage_flags_reach_ancestors() {
        let mut hdr = model("models/chain.mdl");
        hdr.bones.push(StudioBone::new("upper", Some(0), Vec3::X, Quat::IDENTITY));
        hdr.bones.push(StudioBone::new("hand", Some(1), Vec3::X, Quat::IDENTITY));
        hdr.bones[0].flags = BoneFlags::empty();
        hdr.bones[1].flags = BoneFlags::USED_BY_ATTACHMENT | BoneFlags::ALWAYS_PROCEDURAL;
        hdr.bones[2].flags = BoneFlags::USED_BY_HITBOX;

        let mut registry = ModelRegistry::new();
        let handle = registry.register(hdr).unwrap();
        let hdr = registry.get(handle).unwrap();

        let chain = BoneFlags::USED_BY_HITBOX | BoneFlags::USED_BY_ATTACHMENT;
        assert_eq!(hdr.bones[0].flags, chain);
        assert_eq!(hdr.bones[1].flags, chain | BoneFlags::ALWAYS_PROCEDURAL);
        assert_eq!(hdr.bones[2].flags, BoneFlags::USED_BY_HITBOX);
    }

    #[test]
    fn test_register_json() {
        let json = r#"{
            "name": "models/json.mdl",
            "bones": [
                { "name": "root", "pos": [0.0, 0.0, 0.0], "quat": [0.0, 0.0, 0.0, 1.0] },
                { "name": "hand", "parent": 0, "pos": [0.0, 0.0, 10.0], "quat": [0.0, 0.0, 0.0, 1.0] }
            ]
        }"#;

        let mut registry = ModelRegistry::new();
        let handle = registry.register_json(json).unwrap();
        let hdr = registry.get(handle).unwrap();
        assert_eq!(hdr.num_bones(), 2);
        assert_eq!(hdr.bone_parent(1), Some(0));

        assert!(matches!(
            registry.register_json("{ not json"),
            Err(AnimError::Registry(_))
        ));
    }
}
