//! Sequence transitions
//!
//! When an entity switches sequence the previous one does not vanish: it is
//! kept in a queue and faded out over `min(prev.fade_out, next.fade_in)`
//! seconds, blended over the new sequence's pose. The tail of the queue
//! always mirrors the entity's current sequence.

use tracing::{debug, trace};

use studioanim_sdk::{BoneMask, SequenceFlags, StudioHdr};

use super::{accumulate_pose, clamp_cycle, AnimClock, AnimationLayer, BonePose};

/// Queue of sequences fading out under the current one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceTransitioner {
    queue: Vec<AnimationLayer>,
}

impl SequenceTransitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// All queued layers, oldest first; the last one is the current sequence
    pub fn queue(&self) -> &[AnimationLayer] {
        &self.queue
    }

    /// Whether any previous sequence is still fading out
    pub fn is_transitioning(&self) -> bool {
        self.queue.len() > 1
    }

    pub fn remove_all(&mut self) {
        self.queue.clear();
    }

    /// Push a new queue entry if the entity changed sequence
    ///
    /// # Arguments
    /// * `force_new` - Start a transition even when the index is unchanged
    /// * `interpolate` - When false the queue is dropped instead of faded
    pub fn check_for_sequence_change(
        &mut self,
        hdr: &StudioHdr,
        sequence: i32,
        force_new: bool,
        interpolate: bool,
    ) {
        if self.queue.is_empty() {
            self.queue.push(AnimationLayer::default());
        }

        let Some(current) = self.queue.last_mut() else {
            return;
        };

        if current.layer_anim_time != 0.0 && (current.sequence != sequence || force_new) {
            let snap = hdr
                .seq_desc(sequence)
                .is_some_and(|s| s.flags.contains(SequenceFlags::SNAP));

            if snap || !interpolate {
                debug!(sequence, snap, "Sequence change without blending");
                self.queue.clear();
            } else {
                let fade_in = hdr.seq_desc(sequence).map_or(0.0, |s| s.fade_in_time);
                let fade_out = hdr
                    .seq_desc(current.sequence)
                    .map_or(fade_in, |s| s.fade_out_time);
                current.layer_fade_out_time = fade_out.min(fade_in);
                trace!(
                    from = current.sequence,
                    to = sequence,
                    fade = current.layer_fade_out_time,
                    "Sequence transition"
                );
            }

            self.queue.push(AnimationLayer::default());
        }

        if let Some(current) = self.queue.last_mut() {
            current.sequence = -1;
            current.layer_anim_time = 0.0;
            current.layer_fade_out_time = 0.0;
        }
    }

    /// Stamp the current sequence on the tail and refresh fading weights
    pub fn update_current(
        &mut self,
        sequence: i32,
        cycle: f32,
        playback_rate: f32,
        curtime: f32,
    ) {
        let Some(current) = self.queue.last_mut() else {
            return;
        };

        current.sequence = sequence;
        current.layer_anim_time = curtime;
        current.cycle = cycle;
        current.playback_rate = playback_rate;
        current.weight = 1.0;

        let tail = self.queue.len() - 1;
        let mut i = 0;
        let mut end = tail;
        while i < end {
            let s = self.queue[i].get_fadeout(curtime);
            if s > 0.0 {
                self.queue[i].weight = s;
                i += 1;
            } else {
                self.queue.remove(i);
                end -= 1;
            }
        }
    }

    /// Blend fading sequences over the entity's current pose
    ///
    /// The server bumping the new-sequence parity forces a transition even
    /// when the sequence index did not change.
    #[allow(clippy::too_many_arguments)]
    pub fn maintain_sequence_transitions(
        &mut self,
        hdr: &StudioHdr,
        clock: &mut AnimClock,
        pose: &mut BonePose,
        pose_params: &[f32],
        curtime: f32,
        interpolate: bool,
        mask: BoneMask,
    ) {
        let force_new = clock.take_new_sequence_parity();
        self.check_for_sequence_change(hdr, clock.sequence, force_new, interpolate);
        self.update_current(clock.sequence, clock.cycle, clock.playback_rate, curtime);

        if self.queue.len() < 2 {
            return;
        }

        for blend in self.queue[..self.queue.len() - 1].iter().rev() {
            let dt = curtime - blend.layer_anim_time;
            let rate = hdr.sequence_cycle_rate(blend.sequence, pose_params);
            let cycle = clamp_cycle(
                blend.cycle + dt * blend.playback_rate * rate,
                hdr.is_sequence_looping(blend.sequence),
            );

            accumulate_pose(
                hdr,
                pose,
                blend.sequence,
                cycle,
                pose_params,
                blend.weight,
                mask,
            );
        }
    }
}
