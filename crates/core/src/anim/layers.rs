//! Animation layers and overlays
//!
//! An [`AnimationLayer`] is one sequence playing at its own cycle and weight.
//! The sequence transitioner keeps a queue of them for fading out previous
//! sequences, and [`AnimationOverlays`] holds the gesture layers an entity
//! plays on top of its base sequence.

use bitflags::bitflags;
use tracing::{debug, trace};

use studioanim_sdk::{simple_spline, BoneMask, StudioHdr, MAX_OVERLAYS};

use super::{accumulate_pose, clamp_cycle, BonePose};

bitflags! {
    /// Layer state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LayerFlags: u32 {
        const ACTIVE = 1 << 0;
        /// Remove once a non-looping sequence finishes
        const AUTOKILL = 1 << 1;
        /// Marked for removal on the next advance
        const KILLME = 1 << 2;
    }
}

/// One sequence contributing to the final pose
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationLayer {
    pub sequence: i32,
    pub cycle: f32,
    pub prev_cycle: f32,
    pub weight: f32,
    pub playback_rate: f32,
    /// Accumulation order, lowest first
    pub order: i32,
    pub flags: LayerFlags,
    /// Time the layer was last updated
    pub layer_anim_time: f32,
    /// Seconds the layer takes to fade out, 0 when it is not fading
    pub layer_fade_out_time: f32,
    /// When the layer was added, breaks ties between equal orders
    pub insertion: u64,
}

impl Default for AnimationLayer {
    fn default() -> Self {
        Self {
            sequence: -1,
            cycle: 0.0,
            prev_cycle: 0.0,
            weight: 0.0,
            playback_rate: 1.0,
            order: MAX_OVERLAYS as i32,
            flags: LayerFlags::empty(),
            layer_anim_time: 0.0,
            layer_fade_out_time: 0.0,
            insertion: 0,
        }
    }
}

impl AnimationLayer {
    pub fn new(sequence: i32, weight: f32, order: i32) -> Self {
        Self {
            sequence,
            weight,
            order,
            flags: LayerFlags::ACTIVE,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags.contains(LayerFlags::ACTIVE) && !self.flags.contains(LayerFlags::KILLME)
    }

    /// Remaining weight of a fading layer at `curtime`
    ///
    /// Eases along a simple spline from 1 at the start of the fade to 0 at
    /// its end. Returns 0 for a layer with no fade time, and a non-positive
    /// value once the fade has completed.
    pub fn get_fadeout(&self, curtime: f32) -> f32 {
        if self.layer_fade_out_time <= 0.0 {
            return 0.0;
        }

        let s = 1.0 - (curtime - self.layer_anim_time) / self.layer_fade_out_time;
        if s > 0.0 && s <= 1.0 {
            simple_spline(s)
        } else if s > 1.0 {
            1.0
        } else {
            s
        }
    }

    /// Advance the layer's cycle by `dt` seconds
    ///
    /// # Returns
    /// `true` if a non-looping sequence reached its end during this step
    pub fn advance(&mut self, hdr: &StudioHdr, pose_params: &[f32], dt: f32) -> bool {
        self.prev_cycle = self.cycle;
        let rate = hdr.sequence_cycle_rate(self.sequence, pose_params);
        let looping = hdr.is_sequence_looping(self.sequence);

        let cycle = self.cycle + dt * rate * self.playback_rate;
        self.cycle = clamp_cycle(cycle, looping);
        !looping && cycle >= 1.0 && self.prev_cycle < 1.0
    }
}

/// Gesture layers played over an entity's base sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimationOverlays {
    layers: Vec<AnimationLayer>,
    next_insertion: u64,
}

impl AnimationOverlays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a gesture layer
    ///
    /// # Returns
    /// The layer index, or `None` when every overlay slot is in use
    pub fn add_layer(&mut self, sequence: i32, weight: f32, order: i32, autokill: bool) -> Option<usize> {
        let mut layer = AnimationLayer::new(sequence, weight, order);
        layer.insertion = self.next_insertion;
        self.next_insertion += 1;
        if autokill {
            layer.flags |= LayerFlags::AUTOKILL;
        }

        // reuse a dead slot first so indices stay small
        if let Some(index) = self.layers.iter().position(|l| !l.is_active()) {
            self.layers[index] = layer;
            return Some(index);
        }

        if self.layers.len() >= MAX_OVERLAYS {
            debug!(sequence, "No free overlay slot");
            return None;
        }

        self.layers.push(layer);
        Some(self.layers.len() - 1)
    }

    pub fn layer(&self, index: usize) -> Option<&AnimationLayer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut AnimationLayer> {
        self.layers.get_mut(index)
    }

    /// Stop a layer, freeing its slot
    pub fn remove_layer(&mut self, index: usize) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) if layer.is_active() => {
                layer.flags = LayerFlags::KILLME;
                layer.weight = 0.0;
                true
            }
            _ => false,
        }
    }

    /// Number of layers still contributing
    pub fn active_count(&self) -> usize {
        self.layers.iter().filter(|l| l.is_active()).count()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }

    /// Advance every active layer, retiring finished auto-kill layers
    pub fn advance(&mut self, hdr: &StudioHdr, pose_params: &[f32], dt: f32, curtime: f32) {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            if !layer.is_active() {
                continue;
            }

            let finished = layer.advance(hdr, pose_params, dt);
            layer.layer_anim_time = curtime;
            if finished && layer.flags.contains(LayerFlags::AUTOKILL) {
                trace!(index, sequence = layer.sequence, "Overlay finished");
                layer.flags.insert(LayerFlags::KILLME);
                layer.weight = 0.0;
            }
        }
    }

    /// Blend every active layer onto `pose` in ascending order
    ///
    /// # Returns
    /// Number of layers that contributed
    pub fn accumulate_layers(
        &self,
        hdr: &StudioHdr,
        pose: &mut BonePose,
        pose_params: &[f32],
        mask: BoneMask,
    ) -> usize {
        let mut ordered: Vec<&AnimationLayer> = self
            .layers
            .iter()
            .filter(|l| l.is_active() && l.weight > 0.0 && l.sequence >= 0)
            .collect();
        // slots are reused, so equal orders fall back to when the layer was added
        ordered.sort_by_key(|l| (l.order, l.insertion));

        ordered
            .into_iter()
            .filter(|layer| {
                accumulate_pose(
                    hdr,
                    pose,
                    layer.sequence,
                    layer.cycle,
                    pose_params,
                    layer.weight.min(1.0),
                    mask,
                )
            })
            .count()
    }
}
