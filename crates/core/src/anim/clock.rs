//! Animation clock
//!
//! Advances an entity's normalized cycle through its current sequence and
//! keeps the bookkeeping the event scanner needs: how many times the cycle
//! wrapped, whether a non-looping sequence just finished, and the two network
//! parity counters that signal server-forced resets.

use studioanim_sdk::StudioHdr;

/// Wrap a looping cycle into `[0, 1)`, clamp a non-looping one into `[0, 1]`
pub fn clamp_cycle(cycle: f32, looping: bool) -> f32 {
    if looping {
        let wrapped = cycle.rem_euclid(1.0);
        // rem_euclid of a tiny negative can round up to exactly 1.0
        if wrapped >= 1.0 {
            0.0
        } else {
            wrapped
        }
    } else {
        cycle.clamp(0.0, 1.0)
    }
}

/// What one call to [`AnimClock::frame_advance`] did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockAdvance {
    /// Seconds actually advanced
    pub interval: f32,
    /// Cycle before the advance
    pub prev_cycle: f32,
    /// Times a looping cycle passed 1.0
    pub wraps: u32,
    /// A non-looping sequence reached its end during this advance
    pub finished_now: bool,
}

/// Per-entity playback state
#[derive(Debug, Clone, PartialEq)]
pub struct AnimClock {
    pub sequence: i32,
    pub cycle: f32,
    pub playback_rate: f32,
    /// Time of the last advance; 0 until the first one
    pub anim_time: f32,
    sequence_finished: bool,
    sequence_loops: bool,
    ground_speed: f32,

    /// Bumped by the server to force a sequence restart
    pub new_sequence_parity: i32,
    pub prev_new_sequence_parity: i32,
    /// Bumped by the server to discard pending event bookkeeping
    pub reset_events_parity: i32,
}

impl Default for AnimClock {
    fn default() -> Self {
        Self {
            sequence: -1,
            cycle: 0.0,
            playback_rate: 1.0,
            anim_time: 0.0,
            sequence_finished: false,
            sequence_loops: false,
            ground_speed: 0.0,
            new_sequence_parity: 0,
            prev_new_sequence_parity: 0,
            reset_events_parity: 0,
        }
    }
}

impl AnimClock {
    #[inline]
    pub fn is_sequence_finished(&self) -> bool {
        self.sequence_finished
    }

    #[inline]
    pub fn sequence_loops(&self) -> bool {
        self.sequence_loops
    }

    #[inline]
    pub fn ground_speed(&self) -> f32 {
        self.ground_speed
    }

    /// Change sequence without resetting cycle or events
    ///
    /// # Returns
    /// `true` if the sequence index changed
    pub fn set_sequence(&mut self, hdr: &StudioHdr, sequence: i32, pose_params: &[f32]) -> bool {
        if self.sequence == sequence {
            return false;
        }
        self.sequence = sequence;
        self.sequence_loops = hdr.is_sequence_looping(sequence);
        self.ground_speed = hdr.sequence_ground_speed(sequence, pose_params);
        true
    }

    /// Recompute cached sequence info and flag a new sequence for transitions and events
    pub fn reset_sequence_info(&mut self, hdr: &StudioHdr, pose_params: &[f32]) {
        if self.sequence < 0 {
            self.sequence = 0;
        }
        if hdr.seq_desc(self.sequence).is_none() {
            self.sequence = if hdr.sequences_available() { 0 } else { -1 };
        }

        self.ground_speed = hdr.sequence_ground_speed(self.sequence, pose_params);
        self.sequence_loops = hdr.is_sequence_looping(self.sequence);
        self.playback_rate = 1.0;
        self.sequence_finished = false;
        self.new_sequence_parity = self.new_sequence_parity.wrapping_add(1);
        self.reset_events_parity = self.reset_events_parity.wrapping_add(1);
    }

    /// Start `sequence` from cycle 0
    pub fn reset_sequence(&mut self, hdr: &StudioHdr, sequence: i32, pose_params: &[f32]) {
        self.sequence = sequence;
        self.cycle = 0.0;
        self.reset_sequence_info(hdr, pose_params);
    }

    /// Consume a change of the new-sequence parity counter for transitions
    ///
    /// # Returns
    /// `true` if the server forced a sequence restart since the last call
    pub fn take_new_sequence_parity(&mut self) -> bool {
        let changed = self.new_sequence_parity != self.prev_new_sequence_parity;
        self.prev_new_sequence_parity = self.new_sequence_parity;
        changed
    }

    /// Advance the cycle by `interval` seconds at the sequence's cycle rate
    ///
    /// An `interval` of zero means "since the last advance", using `curtime`
    /// and the stored animation time. The very first advance only stamps the
    /// time.
    pub fn frame_advance(
        &mut self,
        hdr: &StudioHdr,
        pose_params: &[f32],
        curtime: f32,
        interval: f32,
    ) -> ClockAdvance {
        let mut interval = interval;
        if interval == 0.0 {
            interval = curtime - self.anim_time;
            if interval <= 0.001 {
                return ClockAdvance {
                    prev_cycle: self.cycle,
                    ..Default::default()
                };
            }
        }

        if self.anim_time == 0.0 {
            interval = 0.0;
        }

        let prev_cycle = self.cycle;
        let cycle_rate = hdr.sequence_cycle_rate(self.sequence, pose_params);
        let mut new_cycle = self.cycle + interval * cycle_rate * self.playback_rate;
        self.anim_time = curtime;

        let mut advance = ClockAdvance {
            interval,
            prev_cycle,
            ..Default::default()
        };

        if !(0.0..1.0).contains(&new_cycle) {
            let looping = hdr.is_sequence_looping(self.sequence);
            if looping {
                if new_cycle >= 1.0 {
                    advance.wraps = new_cycle.floor() as u32;
                }
            } else if new_cycle >= 1.0 && !self.sequence_finished {
                self.sequence_finished = true;
                advance.finished_now = true;
            }
            new_cycle = clamp_cycle(new_cycle, looping);
        }

        self.cycle = new_cycle;
        advance
    }
}
