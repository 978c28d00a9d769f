//! Animation events
//!
//! Sequences carry events at normalized cycles (footsteps, muzzle flashes).
//! [`EventScanner`] walks the cycle interval traversed since the previous
//! scan and reports each event inside it exactly once, in cycle order,
//! including the wrapped tail of a looping sequence. Reported events are
//! handed to the listeners registered on an [`EventDispatcher`].
//!
//! # Example
//!
//! ```ignore
//! use studioanim_core::anim::{EventDispatcher, HookResult};
//!
//! let mut events = EventDispatcher::new();
//! let key = events.register(Some(100), |entity, event| {
//!     tracing::info!(?entity, options = %event.options, "footstep");
//!     HookResult::Continue
//! });
//!
//! events.unregister(key);
//! ```

use slotmap::{new_key_type, SlotMap};
use tracing::{debug, trace};

use studioanim_sdk::{AnimEventDesc, SeqDesc, StudioHdr, EVENT_CYCLE_START};

use crate::entities::EntityHandle;

use super::AnimClock;

/// An event reached by the clock
#[derive(Debug, Clone, PartialEq)]
pub struct AnimEvent {
    pub sequence: i32,
    pub cycle: f32,
    pub event: i32,
    pub options: String,
}

/// Tracks the last scanned cycle for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EventScanner {
    prev_event_cycle: f32,
    event_sequence: i32,
    seen_new_sequence_parity: i32,
    seen_reset_events_parity: i32,
}

impl Default for EventScanner {
    fn default() -> Self {
        Self {
            prev_event_cycle: EVENT_CYCLE_START,
            event_sequence: -1,
            seen_new_sequence_parity: 0,
            seen_reset_events_parity: 0,
        }
    }
}

fn fire_range(
    sequence: i32,
    events: &[&AnimEventDesc],
    after: f32,
    up_to: f32,
    out: &mut Vec<AnimEvent>,
) {
    for desc in events {
        if desc.cycle > after && desc.cycle <= up_to {
            out.push(AnimEvent {
                sequence,
                cycle: desc.cycle,
                event: desc.event,
                options: desc.options.clone(),
            });
        }
    }
}

fn sorted_events(seq: &SeqDesc) -> Vec<&AnimEventDesc> {
    let mut events: Vec<_> = seq.events.iter().collect();
    events.sort_by(|a, b| a.cycle.total_cmp(&b.cycle));
    events
}

impl EventScanner {
    pub fn prev_event_cycle(&self) -> f32 {
        self.prev_event_cycle
    }

    /// Collect events crossed since the last scan
    ///
    /// A change of sequence or of the new-sequence parity restarts scanning
    /// from just before cycle 0 so frame-0 events fire. A change of the
    /// reset-events parity skips to the current cycle without firing.
    ///
    /// # Arguments
    /// * `wraps` - Times the clock passed the end of a looping sequence this advance
    /// * `max_wraps` - Upper bound on full loops replayed for one advance
    pub fn scan(
        &mut self,
        hdr: &StudioHdr,
        clock: &AnimClock,
        wraps: u32,
        max_wraps: u32,
        out: &mut Vec<AnimEvent>,
    ) {
        let sequence = clock.sequence;
        let cycle = clock.cycle;

        let new_sequence = clock.new_sequence_parity != self.seen_new_sequence_parity;
        let reset_events = clock.reset_events_parity != self.seen_reset_events_parity;
        self.seen_new_sequence_parity = clock.new_sequence_parity;
        self.seen_reset_events_parity = clock.reset_events_parity;

        if self.event_sequence != sequence || new_sequence {
            self.event_sequence = sequence;
            self.prev_event_cycle = EVENT_CYCLE_START;
        } else if reset_events {
            trace!(sequence, cycle, "Event bookkeeping reset");
            self.prev_event_cycle = cycle;
            return;
        }

        let Some(seq) = hdr.seq_desc(sequence) else {
            return;
        };

        // events only fire while playing forward
        if seq.events.is_empty() || clock.playback_rate < 0.0 {
            self.prev_event_cycle = cycle;
            return;
        }

        let prev = self.prev_event_cycle;
        if prev == cycle && wraps == 0 {
            return;
        }

        let events = sorted_events(seq);
        let mut wraps = wraps;
        if cycle < prev && wraps == 0 {
            if seq.is_looping() {
                wraps = 1;
            } else {
                // non-looping sequence restarted underneath us
                self.prev_event_cycle = EVENT_CYCLE_START;
            }
        }

        if wraps > 0 {
            let replayed = wraps.min(max_wraps.max(1));
            if replayed < wraps {
                debug!(sequence, wraps, replayed, "Capped event replay for long advance");
            }

            fire_range(sequence, &events, self.prev_event_cycle, 1.0, out);
            for _ in 1..replayed {
                fire_range(sequence, &events, EVENT_CYCLE_START, 1.0, out);
            }
            self.prev_event_cycle = EVENT_CYCLE_START;
        }

        fire_range(sequence, &events, self.prev_event_cycle, cycle, out);
        self.prev_event_cycle = cycle;
    }
}

/// Result from an event listener determining how to proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum HookResult {
    /// Continue calling other listeners
    #[default]
    Continue = 0,

    /// Event was consumed, other listeners still run
    Handled = 3,

    /// Event was consumed and no further listeners run
    Stop = 4,
}

new_key_type! {
    /// Key for registered event listeners
    pub struct EventListenerKey;
}

/// Type alias for event listener callbacks
///
/// # Arguments
/// * `entity` - Entity whose animation produced the event
/// * `event` - The event that was reached
pub type AnimEventCallback = Box<dyn FnMut(EntityHandle, &AnimEvent) -> HookResult + Send>;

struct Listener {
    /// `None` listens to every event
    event: Option<i32>,
    callback: AnimEventCallback,
}

/// Routes animation events to registered listeners
pub struct EventDispatcher {
    listeners: SlotMap<EventListenerKey, Listener>,
    order: Vec<EventListenerKey>,
    dispatched: u64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: SlotMap::with_key(),
            order: Vec::new(),
            dispatched: 0,
        }
    }

    /// Register a listener for one event id, or every event with `None`
    ///
    /// Listeners run in registration order.
    ///
    /// # Returns
    /// A key that can be used to remove the listener via `unregister`
    pub fn register<F>(&mut self, event: Option<i32>, callback: F) -> EventListenerKey
    where
        F: FnMut(EntityHandle, &AnimEvent) -> HookResult + Send + 'static,
    {
        let key = self.listeners.insert(Listener {
            event,
            callback: Box::new(callback),
        });
        self.order.push(key);
        key
    }

    /// Remove a listener
    ///
    /// # Returns
    /// `true` if the listener was found and removed
    pub fn unregister(&mut self, key: EventListenerKey) -> bool {
        self.order.retain(|k| *k != key);
        self.listeners.remove(key).is_some()
    }

    /// Deliver one event to its listeners
    ///
    /// # Returns
    /// The strongest result any listener returned
    pub fn dispatch(&mut self, entity: EntityHandle, event: &AnimEvent) -> HookResult {
        self.dispatched += 1;
        let mut result = HookResult::Continue;

        for key in &self.order {
            let Some(listener) = self.listeners.get_mut(*key) else {
                continue;
            };
            if listener.event.is_some_and(|id| id != event.event) {
                continue;
            }

            let r = (listener.callback)(entity, event);
            result = result.max(r);
            if r == HookResult::Stop {
                break;
            }
        }

        result
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Total events dispatched
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use slotmap::KeyData;

    fn idle_clock(hdr: &StudioHdr) -> AnimClock {
        let mut clock = AnimClock::default();
        clock.reset_sequence(hdr, SEQ_IDLE, &[]);
        clock
    }

    fn ids(events: &[AnimEvent]) -> Vec<i32> {
        events.iter().map(|e| e.event).collect()
    }

    #[test]
    fn test_fires_both_events_in_one_step() {
        let hdr = arm_model();
        let mut clock = idle_clock(&hdr);
        let mut scanner = EventScanner::default();
        let mut out = Vec::new();

        clock.cycle = 0.1;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        assert!(out.is_empty());

        clock.cycle = 0.9;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        assert_eq!(ids(&out), vec![EVENT_QUARTER, EVENT_THREE_QUARTER]);

        // no double fire on a stalled clock
        out.clear();
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_fires_across_wrap() {
        let hdr = arm_model();
        let mut clock = idle_clock(&hdr);
        let mut scanner = EventScanner::default();
        let mut out = Vec::new();

        clock.cycle = 0.5;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        assert_eq!(ids(&out), vec![EVENT_QUARTER]);

        out.clear();
        clock.cycle = 0.3;
        scanner.scan(&hdr, &clock, 1, 4, &mut out);
        assert_eq!(ids(&out), vec![EVENT_THREE_QUARTER, EVENT_QUARTER]);
    }

    #[test]
    fn test_multiple_wraps_fire_once_per_wrap_capped() {
        let hdr = arm_model();
        let mut clock = idle_clock(&hdr);
        let mut scanner = EventScanner::default();
        let mut out = Vec::new();

        clock.cycle = 0.5;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        out.clear();

        clock.cycle = 0.5;
        scanner.scan(&hdr, &clock, 3, 4, &mut out);
        // tail of loop 1, two full loops, head of the last one
        assert_eq!(out.len(), 1 + 2 + 2 + 1);

        out.clear();
        scanner.scan(&hdr, &clock, 10, 2, &mut out);
        assert_eq!(out.len(), 1 + 2 + 1);
    }

    #[test]
    fn test_new_sequence_parity_replays_from_start() {
        let hdr = arm_model();
        let mut clock = idle_clock(&hdr);
        let mut scanner = EventScanner::default();
        let mut out = Vec::new();

        clock.cycle = 0.5;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        out.clear();

        // server restarts the same sequence
        clock.new_sequence_parity += 1;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        assert_eq!(ids(&out), vec![EVENT_QUARTER]);
    }

    #[test]
    fn test_reset_events_parity_suppresses_replay() {
        let hdr = arm_model();
        let mut clock = idle_clock(&hdr);
        let mut scanner = EventScanner::default();
        let mut out = Vec::new();

        clock.cycle = 0.1;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);

        clock.reset_events_parity += 1;
        clock.cycle = 0.8;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        assert!(out.is_empty());
        assert_eq!(scanner.prev_event_cycle(), 0.8);
    }

    #[test]
    fn test_non_looping_end_event_fires_once() {
        let hdr = arm_model();
        let mut clock = AnimClock::default();
        clock.reset_sequence(&hdr, SEQ_FIRE, &[]);
        let mut scanner = EventScanner::default();
        let mut out = Vec::new();

        clock.cycle = 1.0;
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        scanner.scan(&hdr, &clock, 0, 4, &mut out);
        assert_eq!(ids(&out), vec![EVENT_FIRE]);
    }

    #[test]
    fn test_dispatch_order_and_stop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();

        let log = Arc::clone(&seen);
        dispatcher.register(Some(EVENT_QUARTER), move |_, _| {
            log.lock().push("first");
            HookResult::Handled
        });
        let log = Arc::clone(&seen);
        dispatcher.register(None, move |_, _| {
            log.lock().push("second");
            HookResult::Stop
        });
        let log = Arc::clone(&seen);
        let third = dispatcher.register(None, move |_, _| {
            log.lock().push("third");
            HookResult::Continue
        });

        let entity = EntityHandle::from(KeyData::from_ffi(1));
        let event = AnimEvent {
            sequence: 0,
            cycle: 0.25,
            event: EVENT_QUARTER,
            options: String::new(),
        };

        assert_eq!(dispatcher.dispatch(entity, &event), HookResult::Stop);
        assert_eq!(*seen.lock(), vec!["first", "second"]);

        assert!(dispatcher.unregister(third));
        assert!(!dispatcher.unregister(third));
        assert_eq!(dispatcher.len(), 2);
    }
}
