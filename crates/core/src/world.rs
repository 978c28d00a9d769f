//! Per-world animation state and the frame driver
//!
//! A [`World`] owns everything one simulation context needs: globals (epoch,
//! clock, bone access stack), the model registry, the entity arena, the
//! shared bone cache pool, the ragdoll LRU and the event dispatcher. Nothing
//! is process-global, so several worlds can coexist.
//!
//! # Frame Order
//!
//! ```ignore
//! world.begin_frame(curtime, frametime);      // new epoch, data update phase
//! world.apply_network_update(h, &update, t)?; // server fields
//! world.update_client_side_animations();      // advance client-animated clocks
//! world.simulate();                           // interpolation, events, ragdoll think
//! world.render();                             // set up bones for drawable entities
//! let hand = world.bone_to_world(h, bone)?;   // consumers read
//! let stats = world.end_frame();
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use slotmap::SlotMap;
use tracing::{debug, info, trace, warn};

use studioanim_engine::{
    AnimError, AnimResult, FramePhase, InvalidStateError, ModelHandle, ModelRegistry, WorldGlobals,
};
use studioanim_sdk::{
    matrix_angles, matrix_position, BoneFlags, BoneMask, Matrix3x4, QAngle, RagdollPhysics,
    ShadowManager, StudioHdr, Vec3,
};

use crate::anim::{AnimEvent, EventDispatcher, EventListenerKey, HookResult};
use crate::bones::{BoneCacheHandle, BoneCachePool};
use crate::config::AnimConfig;
use crate::entities::{
    AnimatingEntity, BoneProvider, ClientAnimFlags, DataUpdateType, EntityHandle, EntityKind,
    NetworkUpdate, ParentBones, PvsNotifiable, Renderable, Simulatable,
};
use crate::ragdoll::{ClientRagdoll, RagdollInfo, RagdollLru, RagdollState};

/// Deepest follow chain set up through move parents
const MAX_PARENT_DEPTH: u32 = 8;

/// Work done during one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    pub elapsed: Duration,
    /// Setup passes that actually computed bones
    pub bone_setups: u64,
    pub events_fired: u64,
    pub ragdolls_destroyed: u64,
    pub over_budget: bool,
}

/// One animation simulation context
pub struct World {
    config: AnimConfig,
    globals: WorldGlobals,
    models: ModelRegistry,
    entities: SlotMap<EntityHandle, AnimatingEntity>,
    bone_caches: BoneCachePool,
    client_side: Vec<EntityHandle>,
    ragdolls: RagdollLru,
    events: EventDispatcher,
    event_buf: Vec<AnimEvent>,
    shadows: Box<dyn ShadowManager>,
    physics: Box<dyn RagdollPhysics>,
    frame_start: Option<Instant>,
    stats: FrameStats,
}

impl World {
    /// Create a world
    ///
    /// # Arguments
    /// * `config` - Animation settings
    /// * `shadows` - Host shadow manager
    /// * `physics` - Host physics backend for ragdolls
    pub fn new(
        config: AnimConfig,
        shadows: Box<dyn ShadowManager>,
        physics: Box<dyn RagdollPhysics>,
    ) -> Self {
        info!(
            bone_cache_budget = config.bone_cache_budget_bytes,
            max_ragdolls = config.max_ragdoll_count,
            "World created"
        );

        Self {
            globals: WorldGlobals::new(config.enforce_bone_access),
            models: ModelRegistry::new(),
            entities: SlotMap::with_key(),
            bone_caches: BoneCachePool::new(config.bone_cache_budget_bytes),
            client_side: Vec::new(),
            ragdolls: RagdollLru::new(config.max_ragdoll_count, config.max_important_ragdolls),
            events: EventDispatcher::new(),
            event_buf: Vec::new(),
            shadows,
            physics,
            frame_start: None,
            stats: FrameStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &AnimConfig {
        &self.config
    }

    /// Apply a reloaded config
    ///
    /// The bone cache budget only takes effect for a new world.
    pub fn set_config(&mut self, config: AnimConfig) {
        self.ragdolls
            .set_defaults(config.max_ragdoll_count, config.max_important_ragdolls);
        self.globals.enforce_bone_access = config.enforce_bone_access;
        self.config = config;
        debug!("World config updated");
    }

    pub fn globals(&self) -> &WorldGlobals {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut WorldGlobals {
        &mut self.globals
    }

    pub fn bone_cache_pool(&self) -> &BoneCachePool {
        &self.bone_caches
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Register a model, or replace the one registered under its name
    ///
    /// Entities using a replaced model pick up the new asset and every bone
    /// cache is invalidated.
    pub fn register_model(&mut self, hdr: StudioHdr) -> AnimResult<ModelHandle> {
        let handle = self.models.register(hdr)?;
        self.refresh_entities_using(handle);
        Ok(handle)
    }

    /// Parse a JSON model description and register it
    pub fn register_model_json(&mut self, json: &str) -> AnimResult<ModelHandle> {
        let handle = self.models.register_json(json)?;
        self.refresh_entities_using(handle);
        Ok(handle)
    }

    fn refresh_entities_using(&mut self, handle: ModelHandle) {
        let Some(hdr) = self.models.get(handle) else {
            return;
        };

        let mut refreshed = 0;
        for entity in self.entities.values_mut() {
            if entity.model() == Some(handle) {
                entity.refresh_model(Arc::clone(&hdr));
                refreshed += 1;
            }
        }

        if refreshed > 0 {
            debug!(model = %hdr.name, refreshed, "Entities picked up reloaded model");
            self.invalidate_bone_caches();
        }
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Create an entity, optionally with a registered model
    ///
    /// # Errors
    /// `ModelNotFound` if `model` is not registered
    pub fn create_entity(&mut self, kind: EntityKind, model: Option<&str>) -> AnimResult<EntityHandle> {
        let mut entity = AnimatingEntity::new(kind, &self.config);
        if let Some(name) = model {
            let handle = self.models.find_or_err(name)?;
            let hdr = self
                .models
                .get(handle)
                .ok_or_else(|| AnimError::ModelNotFound(name.to_string()))?;
            entity.set_model(handle, hdr);
        }

        let kind = entity.kind().name();
        let handle = self.entities.insert(entity);
        debug!(?handle, kind, model, "Entity created");
        Ok(handle)
    }

    /// Destroy an entity, releasing its physics, shadow and cache entry
    ///
    /// # Returns
    /// `false` if the handle was already stale
    pub fn destroy_entity(&mut self, handle: EntityHandle) -> bool {
        let Some(mut entity) = self.entities.remove(handle) else {
            return false;
        };

        let raw = handle.to_raw();
        if let Some(ragdoll) = entity.kind_mut().ragdoll_mut() {
            ragdoll.destroy(raw, self.physics.as_mut(), self.shadows.as_mut());
            if let Some(source) = ragdoll.source.and_then(|s| self.entities.get_mut(s)) {
                if source.spawned_ragdoll() == Some(handle) {
                    source.set_spawned_ragdoll(None);
                }
            }
            self.ragdolls.remove(handle);
        }

        if let Some(cache) = entity.bone_cache_handle() {
            self.bone_caches.destroy(cache);
        }
        self.client_side.retain(|h| *h != handle);

        debug!(?handle, kind = entity.kind().name(), "Entity destroyed");
        true
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&AnimatingEntity> {
        self.entities.get(handle)
    }

    pub fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut AnimatingEntity> {
        self.entities.get_mut(handle)
    }

    fn entity_or_err(&self, handle: EntityHandle) -> AnimResult<&AnimatingEntity> {
        self.entities.get(handle).ok_or(AnimError::StaleHandle)
    }

    fn entity_mut_or_err(&mut self, handle: EntityHandle) -> AnimResult<&mut AnimatingEntity> {
        self.entities.get_mut(handle).ok_or(AnimError::StaleHandle)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityHandle, &AnimatingEntity)> {
        self.entities.iter()
    }

    /// Swap an entity's model by name
    pub fn set_entity_model(&mut self, handle: EntityHandle, model: &str) -> AnimResult<()> {
        let model_handle = self.models.find_or_err(model)?;
        let hdr = self
            .models
            .get(model_handle)
            .ok_or_else(|| AnimError::ModelNotFound(model.to_string()))?;
        self.entity_mut_or_err(handle)?.set_model(model_handle, hdr);
        Ok(())
    }

    /// Make `child` follow `parent`'s bones by name
    ///
    /// # Errors
    /// `StaleHandle` if either entity is gone or the entity would follow itself
    pub fn set_move_parent(&mut self, child: EntityHandle, parent: Option<EntityHandle>) -> AnimResult<()> {
        if let Some(p) = parent {
            if p == child || !self.entities.contains_key(p) {
                return Err(AnimError::StaleHandle);
            }
        }
        self.entity_mut_or_err(child)?.set_move_parent(parent);
        Ok(())
    }

    /// Add or remove an entity from the client-side animation list
    pub fn set_client_side_animation(&mut self, handle: EntityHandle, enabled: bool) -> AnimResult<()> {
        self.entity_mut_or_err(handle)?
            .set_client_side_animation(enabled);
        self.sync_client_side(handle);
        Ok(())
    }

    fn sync_client_side(&mut self, handle: EntityHandle) {
        let enabled = self
            .entities
            .get(handle)
            .is_some_and(AnimatingEntity::client_side_animation);
        let listed = self.client_side.contains(&handle);

        if enabled && !listed {
            self.client_side.push(handle);
        } else if !enabled && listed {
            self.client_side.retain(|h| *h != handle);
        }
    }

    /// Entities advanced by [`update_client_side_animations`](Self::update_client_side_animations)
    pub fn client_side_entities(&self) -> &[EntityHandle] {
        &self.client_side
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Listen for animation events, all of them when `event` is `None`
    pub fn register_event_listener<F>(&mut self, event: Option<i32>, callback: F) -> EventListenerKey
    where
        F: FnMut(EntityHandle, &AnimEvent) -> HookResult + Send + 'static,
    {
        self.events.register(event, callback)
    }

    pub fn unregister_event_listener(&mut self, key: EventListenerKey) -> bool {
        self.events.unregister(key)
    }

    // ------------------------------------------------------------------
    // Frame driver
    // ------------------------------------------------------------------

    /// Start a frame: bump the epoch and enter the data update phase
    pub fn begin_frame(&mut self, curtime: f32, frametime: f32) {
        self.globals.begin_frame(curtime, frametime);
        self.globals.set_phase(FramePhase::DataUpdate);
        self.frame_start = Some(Instant::now());
        self.stats = FrameStats {
            frame: self.globals.framecount,
            ..Default::default()
        };
        trace!(curtime, frametime, epoch = self.globals.model_bone_counter(), "Frame begun");
    }

    /// Apply networked fields to an entity
    ///
    /// # Returns
    /// `true` if anything that moves bones changed
    #[tracing::instrument(skip(self, update))]
    pub fn apply_network_update(
        &mut self,
        handle: EntityHandle,
        update: &NetworkUpdate,
        update_type: DataUpdateType,
    ) -> AnimResult<bool> {
        if let Some(model) = &update.model {
            let current = self
                .entity_or_err(handle)?
                .studio_hdr()
                .is_some_and(|hdr| hdr.name.eq_ignore_ascii_case(model));
            if !current {
                self.set_entity_model(handle, model)?;
            }
        }

        let changed = self
            .entity_mut_or_err(handle)?
            .apply_network_update(update, update_type);
        self.sync_client_side(handle);

        if changed {
            self.shadows
                .mark_render_to_texture_shadow_dirty(handle.to_raw());
        }
        Ok(changed)
    }

    /// Advance clocks and layers of client-animated entities
    ///
    /// # Returns
    /// The number of entities advanced
    pub fn update_client_side_animations(&mut self) -> usize {
        self.globals.set_phase(FramePhase::Simulate);
        let curtime = self.globals.curtime;
        let frametime = self.globals.frametime;

        let entities = &mut self.entities;
        self.client_side.retain(|h| entities.contains_key(*h));

        let mut advanced = 0;
        for &handle in &self.client_side {
            let Some(entity) = entities.get_mut(handle) else {
                continue;
            };

            let flags = entity.client_side_animation_flags();
            if flags.contains(ClientAnimFlags::SEQUENCE_CYCLE) {
                entity.studio_frame_advance(curtime);
            }
            if flags.contains(ClientAnimFlags::LAYERS) {
                if let Some(hdr) = entity.studio_hdr().cloned() {
                    let params = *entity.pose_parameters();
                    entity.overlays_mut().advance(&hdr, &params, frametime, curtime);
                    if entity.overlays().active_count() > 0 {
                        entity.invalidate_bone_cache();
                    }
                }
            }
            if !flags.is_empty() {
                advanced += 1;
            }
        }

        advanced
    }

    /// Run one simulation step for every entity
    ///
    /// Pulls ragdoll poses from physics, interpolates networked fields,
    /// dispatches animation events, retires ragdolls over the cap and
    /// removes destroyed ragdolls.
    ///
    /// # Returns
    /// The number of animation events dispatched
    #[tracing::instrument(skip_all)]
    pub fn simulate(&mut self) -> usize {
        self.globals.set_phase(FramePhase::Simulate);
        let curtime = self.globals.curtime;
        let frametime = self.globals.frametime;

        let handles: Vec<EntityHandle> = self.entities.keys().collect();
        let mut dead = Vec::new();
        let mut fired = 0;

        for handle in handles {
            let Some(entity) = self.entities.get_mut(handle) else {
                continue;
            };

            let moved = entity
                .kind_mut()
                .ragdoll_mut()
                .is_some_and(|r| r.vphysics_update(self.physics.as_ref()));
            if moved {
                entity.invalidate_bone_cache();
                self.ragdolls.moved(handle);
                self.shadows
                    .mark_render_to_texture_shadow_dirty(handle.to_raw());
            }

            self.event_buf.clear();
            if !entity.simulate(curtime, frametime, &mut self.event_buf) {
                dead.push(handle);
            }

            for event in self.event_buf.drain(..) {
                trace!(?handle, event = event.event, cycle = event.cycle, "Animation event");
                self.events.dispatch(handle, &event);
                fired += 1;
            }
        }

        let entities = &self.entities;
        let evicted = self.ragdolls.update(|h| {
            entities
                .get(h)
                .and_then(|e| e.kind().ragdoll())
                .filter(|r| r.state() != RagdollState::Destroyed)
                .map(|r| r.important)
        });
        for handle in evicted {
            if let Some(ragdoll) = self
                .entities
                .get_mut(handle)
                .and_then(|e| e.kind_mut().ragdoll_mut())
            {
                ragdoll.fade_out();
            }
        }

        for handle in dead {
            if self.destroy_entity(handle) {
                self.stats.ragdolls_destroyed += 1;
            }
        }

        self.stats.events_fired += fired as u64;
        fired
    }

    /// Set up bones for every drawable entity
    ///
    /// # Returns
    /// The number of entities set up
    #[tracing::instrument(skip_all)]
    pub fn render(&mut self) -> usize {
        self.globals.set_phase(FramePhase::Render);

        let handles: Vec<EntityHandle> = self
            .entities
            .iter()
            .filter(|(_, e)| e.should_draw())
            .map(|(h, _)| h)
            .collect();

        let mut drawn = 0;
        for handle in handles {
            match self.setup_bones(handle, BoneFlags::USED_BY_ANYTHING) {
                Ok(()) => drawn += 1,
                Err(err) => warn!(?handle, %err, "Skipping entity with no bones"),
            }
        }
        drawn
    }

    /// Finish the frame and report what it did
    pub fn end_frame(&mut self) -> FrameStats {
        self.globals.set_phase(FramePhase::Idle);

        if let Some(start) = self.frame_start.take() {
            self.stats.elapsed = start.elapsed();
        }

        let budget = Duration::from_secs_f32(self.config.frame_budget_ms.max(0.0) / 1000.0);
        self.stats.over_budget = self.stats.elapsed > budget;
        if self.stats.over_budget {
            warn!(
                frame = self.stats.frame,
                elapsed_ms = self.stats.elapsed.as_secs_f32() * 1000.0,
                budget_ms = self.config.frame_budget_ms,
                "Animation frame over budget"
            );
        }

        self.stats
    }

    /// Stats of the frame in progress (or the last one ended)
    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// Destroy every entity and drop every cache (level shutdown)
    pub fn level_shutdown(&mut self) {
        let handles: Vec<EntityHandle> = self.entities.keys().collect();
        for handle in &handles {
            self.destroy_entity(*handle);
        }
        self.ragdolls.clear();
        self.bone_caches.clear();
        self.client_side.clear();
        self.globals.invalidate_bone_caches();
        info!(entities = handles.len(), "Level shut down");
    }

    // ------------------------------------------------------------------
    // Bones
    // ------------------------------------------------------------------

    /// Compute an entity's bones for `mask`, following its move parent first
    pub fn setup_bones(&mut self, handle: EntityHandle, mask: BoneMask) -> AnimResult<()> {
        if self.globals.phase() < FramePhase::SetupBones && self.globals.phase() != FramePhase::Idle {
            self.globals.set_phase(FramePhase::SetupBones);
        }
        self.setup_bones_depth(handle, mask, 0)
    }

    fn setup_bones_depth(&mut self, handle: EntityHandle, mask: BoneMask, depth: u32) -> AnimResult<()> {
        let curtime = self.globals.curtime;
        let parent = self
            .entity_or_err(handle)?
            .move_parent()
            .filter(|p| *p != handle && self.entities.contains_key(*p));

        let parent = match parent {
            Some(_) if depth >= MAX_PARENT_DEPTH => {
                warn!(?handle, depth, "Move parent chain too deep, ignoring parent");
                None
            }
            Some(p) => match self.setup_bones_depth(p, BoneFlags::USED_BY_ANYTHING, depth + 1) {
                Ok(()) => Some(p),
                Err(err) => {
                    warn!(?handle, parent = ?p, %err, "Move parent has no bones");
                    None
                }
            },
            None => None,
        };

        let (before, after) = match parent {
            Some(p) => {
                let [child, parent] = self
                    .entities
                    .get_disjoint_mut([handle, p])
                    .ok_or(AnimError::StaleHandle)?;
                let parent: &AnimatingEntity = parent;
                let bones = parent.studio_hdr().map(|hdr| ParentBones {
                    hdr,
                    bones: parent.accessor().bones(),
                });

                let before = child.setup_count();
                child.setup_bones(&self.globals, bones, mask, curtime)?;
                (before, child.setup_count())
            }
            None => {
                let entity = self
                    .entities
                    .get_mut(handle)
                    .ok_or(AnimError::StaleHandle)?;
                let before = entity.setup_count();
                entity.setup_bones(&self.globals, None, mask, curtime)?;
                (before, entity.setup_count())
            }
        };

        self.stats.bone_setups += after - before;
        Ok(())
    }

    /// Read a bone computed this frame
    ///
    /// # Errors
    /// `BoneAccessDenied` during the data update phase when access is enforced,
    /// and the accessor's errors when the bone was not computed this frame
    pub fn bone_to_world(&self, handle: EntityHandle, bone: usize) -> AnimResult<Matrix3x4> {
        let entity = self.entity_or_err(handle)?;
        if self.globals.enforce_bone_access && self.globals.phase() == FramePhase::DataUpdate {
            return Err(InvalidStateError::BoneAccessDenied {
                view_model: entity.kind().is_view_model(),
            }
            .into());
        }
        entity.bone_to_world(&self.globals, bone).copied()
    }

    pub fn lookup_bone(&self, handle: EntityHandle, name: &str) -> Option<usize> {
        self.entities.get(handle)?.lookup_bone(name)
    }

    /// Forget an entity's bones for this frame (it moved after setup)
    pub fn invalidate_bone_cache(&mut self, handle: EntityHandle) -> AnimResult<()> {
        self.entity_mut_or_err(handle)?.invalidate_bone_cache();
        self.shadows
            .mark_render_to_texture_shadow_dirty(handle.to_raw());
        Ok(())
    }

    /// Invalidate every entity's bones and every bone cache entry
    pub fn invalidate_bone_caches(&mut self) {
        self.globals.invalidate_bone_caches();
        self.bone_caches.invalidate_all();
    }

    /// Hitbox bone cache for an entity
    ///
    /// A valid entry is returned as is; a stale one is refreshed in place
    /// after setting up bones; a missing (or evicted) one is created.
    pub fn get_bone_cache(&mut self, handle: EntityHandle) -> AnimResult<BoneCacheHandle> {
        let mask = BoneFlags::USED_BY_HITBOX;
        let epoch = self.globals.model_bone_counter();
        let curtime = self.globals.curtime;

        let entity = self.entity_or_err(handle)?;
        let existing = entity.bone_cache_handle();
        let generation = entity.bone_invalidations();
        if let Some(cache_handle) = existing {
            let valid = self
                .bone_caches
                .get(cache_handle)
                .is_some_and(|cache| cache.is_valid_for(epoch, generation, mask));
            if valid {
                return Ok(cache_handle);
            }
        }

        self.setup_bones(handle, mask)?;
        let entity = self.entities.get(handle).ok_or(AnimError::StaleHandle)?;
        let hdr = entity.studio_hdr().cloned().ok_or(AnimError::NoModel)?;
        let bones = entity.accessor().bones();

        if let Some(cache_handle) = existing {
            if let Some(cache) = self.bone_caches.get_mut(cache_handle) {
                cache.update_bones(bones, curtime, epoch, generation);
                trace!(?handle, "Bone cache refreshed");
                return Ok(cache_handle);
            }
        }

        let cache_handle = self.bone_caches.create(&hdr, mask, bones, curtime, epoch, generation);
        debug!(?handle, ?cache_handle, "Bone cache created for entity");
        self.entity_mut_or_err(handle)?
            .set_bone_cache_handle(Some(cache_handle));
        Ok(cache_handle)
    }

    /// A bone matrix read through the hitbox bone cache
    ///
    /// # Errors
    /// `BonesNotComputed` if the bone is not used by hitboxes
    pub fn get_cached_bone_matrix(&mut self, handle: EntityHandle, bone: usize) -> AnimResult<Matrix3x4> {
        let cache_handle = self.get_bone_cache(handle)?;
        let epoch = self.globals.model_bone_counter();
        self.bone_caches
            .peek(cache_handle)
            .and_then(|cache| cache.get_cached_bone(bone))
            .copied()
            .ok_or_else(|| InvalidStateError::BonesNotComputed { bone, epoch }.into())
    }

    /// Attachment-to-world, setting up bones on demand
    ///
    /// # Returns
    /// `None` for an invalid index or an entity whose bones cannot be set up
    pub fn get_attachment_matrix(&mut self, handle: EntityHandle, index: usize) -> Option<Matrix3x4> {
        if let Err(err) = self.setup_bones(handle, BoneFlags::USED_BY_ATTACHMENT) {
            warn!(?handle, %err, "Attachment query without bones");
            return None;
        }

        match self.entities.get(handle)?.get_attachment(&self.globals, index) {
            Ok(m) => Some(m),
            Err(err) => {
                warn!(?handle, index, %err, "Attachment query failed");
                None
            }
        }
    }

    /// Attachment origin and angles, setting up bones on demand
    pub fn get_attachment(&mut self, handle: EntityHandle, index: usize) -> Option<(Vec3, QAngle)> {
        self.get_attachment_matrix(handle, index)
            .map(|m| (matrix_position(&m), matrix_angles(&m)))
    }

    // ------------------------------------------------------------------
    // Ragdolls
    // ------------------------------------------------------------------

    /// Replace an animated entity with a physics ragdoll
    ///
    /// The source's pose is captured once; calling this again while the
    /// ragdoll lives returns the same ragdoll. The source stays alive but
    /// hidden.
    ///
    /// # Errors
    /// `RagdollNotReady` if physics cannot build a ragdoll for the model
    #[tracing::instrument(skip(self))]
    pub fn become_ragdoll_on_client(&mut self, source: EntityHandle) -> AnimResult<EntityHandle> {
        let existing = self
            .entity_or_err(source)?
            .spawned_ragdoll()
            .filter(|h| self.entities.contains_key(*h));
        if let Some(ragdoll) = existing {
            debug!(?ragdoll, "Entity already ragdolled");
            return Ok(ragdoll);
        }
        if self.entity_or_err(source)?.kind().ragdoll().is_some() {
            return Err(InvalidStateError::NotARagdoll.into());
        }

        self.setup_bones(source, BoneFlags::USED_BY_ANYTHING)?;

        let curtime = self.globals.curtime;
        let entity = self.entity_or_err(source)?;
        let model = entity.model().ok_or(AnimError::NoModel)?;
        let hdr = entity.studio_hdr().cloned().ok_or(AnimError::NoModel)?;
        let snapshot = entity.save_ragdoll_info(curtime)?;
        let bones = entity.accessor().bones().to_vec();
        let origin = entity.origin();
        let angles = entity.angles();

        let config = &self.config;
        let physics = &mut self.physics;
        let mut physics_id = None;
        let handle = self.entities.insert_with_key(|key| {
            physics_id = physics.create_ragdoll(key.to_raw(), &hdr.name, &bones);
            let ragdoll = ClientRagdoll::new(
                Some(source),
                physics_id,
                snapshot,
                bones,
                config.ragdoll_fade_speed,
            );
            let mut entity = AnimatingEntity::new(EntityKind::Ragdoll(Box::new(ragdoll)), config);
            entity.set_model(model, Arc::clone(&hdr));
            entity.set_abs_origin(origin);
            entity.set_abs_angles(angles);
            entity
        });

        if physics_id.is_none() {
            self.entities.remove(handle);
            warn!(model = %hdr.name, "Physics could not build a ragdoll");
            return Err(InvalidStateError::RagdollNotReady.into());
        }

        if let Some(entity) = self.entities.get_mut(source) {
            entity.set_hidden(true);
            entity.set_spawned_ragdoll(Some(handle));
        }
        self.ragdolls.add(handle);

        info!(?source, ragdoll = ?handle, model = %hdr.name, "Entity became a ragdoll");
        Ok(handle)
    }

    fn ragdoll_mut(&mut self, handle: EntityHandle) -> AnimResult<&mut ClientRagdoll> {
        self.entity_mut_or_err(handle)?
            .kind_mut()
            .ragdoll_mut()
            .ok_or_else(|| InvalidStateError::NotARagdoll.into())
    }

    /// Pull a ragdoll's latest pose from physics
    ///
    /// # Returns
    /// `true` if physics produced a pose
    pub fn vphysics_update(&mut self, handle: EntityHandle) -> AnimResult<bool> {
        let physics = self.physics.as_ref();
        let entity = self
            .entities
            .get_mut(handle)
            .ok_or(AnimError::StaleHandle)?;
        let moved = entity
            .kind_mut()
            .ragdoll_mut()
            .ok_or(InvalidStateError::NotARagdoll)?
            .vphysics_update(physics);

        if moved {
            entity.invalidate_bone_cache();
            self.ragdolls.moved(handle);
            self.shadows
                .mark_render_to_texture_shadow_dirty(handle.to_raw());
        }
        Ok(moved)
    }

    /// The pose snapshot a ragdoll was created from
    ///
    /// # Errors
    /// `NotARagdoll`, or `RagdollNotReady` until physics has produced a pose
    pub fn retrieve_ragdoll_info(&self, handle: EntityHandle) -> AnimResult<RagdollInfo> {
        self.entity_or_err(handle)?
            .kind()
            .ragdoll()
            .ok_or(InvalidStateError::NotARagdoll)?
            .retrieve_ragdoll_info()
            .cloned()
    }

    /// Start `source` blending from the ragdoll's current pose back to its animation
    pub fn create_unragdoll_info(&mut self, source: EntityHandle, ragdoll: EntityHandle) -> AnimResult<()> {
        self.retrieve_ragdoll_info(ragdoll)?;

        let curtime = self.globals.curtime;
        let ragdoll_entity = self.entity_or_err(ragdoll)?;
        let bones = ragdoll_entity
            .kind()
            .ragdoll()
            .map(|r| r.current_bones().to_vec())
            .unwrap_or_default();

        let target = self.entity_or_err(source)?;
        let hdr = target.studio_hdr().cloned().ok_or(AnimError::NoModel)?;
        let info = RagdollInfo::capture(&hdr, &target.entity_to_world(), &bones, curtime);

        let target = self.entity_mut_or_err(source)?;
        target.create_unragdoll_info(info);
        target.set_hidden(false);
        Ok(())
    }

    /// Lifecycle state, `Animated` for entities that are not ragdolls
    pub fn ragdoll_state(&self, handle: EntityHandle) -> AnimResult<RagdollState> {
        Ok(self.entity_or_err(handle)?.ragdoll_state())
    }

    /// Remove the ragdoll on the next simulate
    pub fn release_ragdoll(&mut self, handle: EntityHandle) -> AnimResult<()> {
        self.ragdoll_mut(handle)?.release_ragdoll();
        Ok(())
    }

    pub fn fade_out_ragdoll(&mut self, handle: EntityHandle) -> AnimResult<()> {
        self.ragdoll_mut(handle)?.fade_out();
        Ok(())
    }

    /// Burn every hitbox of the ragdoll's default hitbox set
    pub fn ignite_ragdoll(&mut self, handle: EntityHandle, duration: f32, scale_end: f32) -> AnimResult<()> {
        let curtime = self.globals.curtime;
        let hitboxes = self
            .entity_or_err(handle)?
            .studio_hdr()
            .and_then(|hdr| hdr.hitbox_sets.first())
            .map_or(0, |set| set.hitboxes.len());
        self.ragdoll_mut(handle)?
            .ignite(hitboxes, curtime, duration, scale_end);
        Ok(())
    }

    /// Continue a dissolve started at `start_time` on the ragdoll
    pub fn transfer_dissolve_from(&mut self, handle: EntityHandle, start_time: f32) -> AnimResult<()> {
        let duration = self.config.dissolve_time;
        self.ragdoll_mut(handle)?
            .transfer_dissolve_from(start_time, duration);
        Ok(())
    }

    /// Important ragdolls are only retired past the important cap
    pub fn set_ragdoll_important(&mut self, handle: EntityHandle, important: bool) -> AnimResult<()> {
        self.ragdoll_mut(handle)?.important = important;
        Ok(())
    }

    /// Server-replicated ragdoll cap, -1 for the configured default
    pub fn set_max_ragdoll_count(&mut self, max: i32) {
        self.ragdolls.set_max_ragdoll_count(max);
    }

    pub fn ragdoll_count(&self) -> usize {
        self.ragdolls.len()
    }

    /// Entity entered or left the potentially visible set
    pub fn set_pvs_state(&mut self, handle: EntityHandle, in_pvs: bool) -> AnimResult<()> {
        let entity = self
            .entities
            .get_mut(handle)
            .ok_or(AnimError::StaleHandle)?;
        entity.on_pvs_status_changed(handle.to_raw(), in_pvs, self.shadows.as_mut());
        Ok(())
    }
}
