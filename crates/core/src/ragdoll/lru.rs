//! Cap on concurrent client ragdolls
//!
//! Ragdolls are kept in least-recently-moved order. Once there are more than
//! the cap, the oldest ordinary ragdolls are picked for fading. Important
//! ragdolls (players) are never counted against ordinary eviction, they only
//! go when there are more of them than `max_important`.

use std::collections::VecDeque;

use tracing::debug;

use crate::entities::EntityHandle;

/// Least-recently-moved list of live ragdolls
#[derive(Debug, Clone)]
pub struct RagdollLru {
    order: VecDeque<EntityHandle>,
    /// Server-replicated cap, -1 when unset
    server_max: i32,
    default_max: usize,
    max_important: usize,
}

impl RagdollLru {
    pub fn new(default_max: usize, max_important: usize) -> Self {
        Self {
            order: VecDeque::new(),
            server_max: -1,
            default_max,
            max_important,
        }
    }

    /// Apply the server's ragdoll cap; -1 falls back to the configured default
    pub fn set_max_ragdoll_count(&mut self, max: i32) {
        if max != self.server_max {
            debug!(max, "Ragdoll cap changed");
        }
        self.server_max = max;
    }

    /// Cap currently in effect
    pub fn max_ragdoll_count(&self) -> usize {
        if self.server_max < 0 {
            self.default_max
        } else {
            self.server_max as usize
        }
    }

    pub fn set_defaults(&mut self, default_max: usize, max_important: usize) {
        self.default_max = default_max;
        self.max_important = max_important;
    }

    /// Track a new ragdoll as the most recent
    pub fn add(&mut self, ragdoll: EntityHandle) {
        self.remove(ragdoll);
        self.order.push_back(ragdoll);
    }

    /// The ragdoll moved; it becomes the most recent
    pub fn moved(&mut self, ragdoll: EntityHandle) {
        if self.remove(ragdoll) {
            self.order.push_back(ragdoll);
        }
    }

    pub fn remove(&mut self, ragdoll: EntityHandle) -> bool {
        match self.order.iter().position(|h| *h == ragdoll) {
            Some(index) => {
                self.order.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, ragdoll: EntityHandle) -> bool {
        self.order.contains(&ragdoll)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    /// Pick ragdolls to retire, oldest first
    ///
    /// `importance` reports whether a handle is an important ragdoll, or
    /// `None` when it no longer exists (it is dropped from the list).
    ///
    /// # Returns
    /// Handles removed from the list that should start fading out
    pub fn update(&mut self, importance: impl Fn(EntityHandle) -> Option<bool>) -> Vec<EntityHandle> {
        let mut live: Vec<(EntityHandle, bool)> = Vec::with_capacity(self.order.len());
        for handle in self.order.drain(..) {
            if let Some(important) = importance(handle) {
                live.push((handle, important));
            }
        }

        let max = self.max_ragdoll_count();
        let mut remaining = live.len();
        let mut important_count = live.iter().filter(|(_, i)| *i).count();
        let mut evicted = Vec::new();

        for (handle, important) in live {
            let evict = if important {
                important_count > self.max_important
            } else {
                remaining > max
            };

            if evict {
                if important {
                    important_count -= 1;
                }
                remaining -= 1;
                evicted.push(handle);
            } else {
                self.order.push_back(handle);
            }
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), max, "Evicting ragdolls over cap");
        }
        evicted
    }
}
