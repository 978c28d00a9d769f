//! Interpolated networked variables
//!
//! Networked fields arrive at the server's tick times. Entities that are not
//! animated client-side render those fields a little in the past,
//! interpolating between the two received samples that bracket the render
//! time. Cycles of looping sequences interpolate across the wrap point.

use std::collections::VecDeque;

/// Values that can be blended between two network samples
pub trait Interpolate: Copy + PartialEq {
    fn lerp(a: Self, b: Self, t: f32) -> Self;

    /// Blend where the value lives on a circle of period 1
    fn lerp_wrapped(a: Self, b: Self, t: f32) -> Self {
        Self::lerp(a, b, t)
    }
}

impl Interpolate for f32 {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }

    fn lerp_wrapped(a: Self, b: Self, t: f32) -> Self {
        let b = if b < a { b + 1.0 } else { b };
        let value = (a + (b - a) * t).rem_euclid(1.0);
        if value >= 1.0 {
            0.0
        } else {
            value
        }
    }
}

impl<const N: usize> Interpolate for [f32; N] {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        let mut out = a;
        for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
            *o = <f32 as Interpolate>::lerp(*x, *y, t);
        }
        out
    }
}

/// Seconds of history kept behind the newest sample
const HISTORY_SECONDS: f32 = 1.0;

/// A networked value with a timestamped history
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedVar<T: Interpolate> {
    history: VecDeque<(f32, T)>,
    value: T,
    last_networked: T,
}

impl<T: Interpolate> InterpolatedVar<T> {
    pub fn new(value: T) -> Self {
        Self {
            history: VecDeque::new(),
            value,
            last_networked: value,
        }
    }

    /// The most recently interpolated (or reset) value
    #[inline]
    pub fn value(&self) -> T {
        self.value
    }

    #[inline]
    pub fn last_networked(&self) -> T {
        self.last_networked
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Record a networked sample received for `time`
    ///
    /// # Returns
    /// `true` if the value differs from the previous sample
    pub fn note_changed(&mut self, time: f32, value: T) -> bool {
        let changed = value != self.last_networked;
        self.last_networked = value;

        // a sample for an older tick replaces everything newer
        while self.history.back().is_some_and(|(t, _)| *t >= time) {
            self.history.pop_back();
        }
        self.history.push_back((time, value));

        while self
            .history
            .front()
            .is_some_and(|(t, _)| *t < time - HISTORY_SECONDS)
            && self.history.len() > 2
        {
            self.history.pop_front();
        }

        changed
    }

    /// Update the value for render time `time`
    ///
    /// Times before the oldest sample hold it, times after the newest hold
    /// the newest. With no history the value is left as is.
    ///
    /// # Arguments
    /// * `wrap` - Interpolate on the unit circle (looping cycles)
    pub fn interpolate(&mut self, time: f32, wrap: bool) -> T {
        let (Some(&(first_t, first)), Some(&(last_t, last))) =
            (self.history.front(), self.history.back())
        else {
            return self.value;
        };

        self.value = if time <= first_t {
            first
        } else if time >= last_t {
            last
        } else {
            let newer = self.history.partition_point(|(t, _)| *t <= time);
            let (t0, a) = self.history[newer - 1];
            let (t1, b) = self.history[newer];
            let frac = if t1 > t0 { (time - t0) / (t1 - t0) } else { 1.0 };
            if wrap {
                T::lerp_wrapped(a, b, frac)
            } else {
                T::lerp(a, b, frac)
            }
        };

        self.value
    }

    /// Forget all history and snap to `value`
    pub fn reset(&mut self, value: T) {
        self.history.clear();
        self.value = value;
        self.last_networked = value;
    }

    /// Collapse history onto the last networked sample
    pub fn reset_latched(&mut self) {
        if let Some(newest) = self.history.pop_back() {
            self.history.clear();
            self.history.push_back(newest);
        }
        self.value = self.last_networked;
    }

    /// Drop any interpolated value in favor of the last networked one
    pub fn restore_to_last_networked(&mut self) {
        self.value = self.last_networked;
    }
}

impl<T: Interpolate + Default> Default for InterpolatedVar<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolates_between_samples() {
        let mut var = InterpolatedVar::new(0.0f32);
        var.note_changed(1.0, 0.0);
        var.note_changed(1.1, 10.0);

        assert!((var.interpolate(1.05, false) - 5.0).abs() < 1e-3);
        assert_eq!(var.interpolate(0.5, false), 0.0);
        assert_eq!(var.interpolate(2.0, false), 10.0);
    }

    #[test]
    fn test_cycle_interpolates_across_wrap() {
        let mut cycle = InterpolatedVar::new(0.0f32);
        cycle.note_changed(1.0, 0.9);
        cycle.note_changed(1.1, 0.1);

        let mid = cycle.interpolate(1.05, true);
        assert!(mid.abs() < 1e-3 || (mid - 1.0).abs() < 1e-3);
        assert!((0.0..1.0).contains(&mid));

        // a plain lerp would go backwards through 0.5
        assert!((cycle.interpolate(1.05, false) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_array_interpolation() {
        let mut params = InterpolatedVar::new([0.0f32; 2]);
        params.note_changed(0.0, [0.0, 1.0]);
        params.note_changed(1.0, [1.0, 0.0]);
        let v = params.interpolate(0.25, false);
        assert!((v[0] - 0.25).abs() < 1e-5);
        assert!((v[1] - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_note_changed_reports_changes_and_prunes() {
        let mut var = InterpolatedVar::new(0.0f32);
        assert!(!var.note_changed(0.0, 0.0));
        assert!(var.note_changed(0.1, 1.0));

        for i in 2..40 {
            var.note_changed(i as f32 * 0.1, i as f32);
        }
        assert!(var.history_len() <= 12);

        // out-of-order sample drops the newer ones
        var.note_changed(3.0, 7.0);
        assert_eq!(var.interpolate(10.0, false), 7.0);
    }

    #[test]
    fn test_restore_and_reset_latched() {
        let mut var = InterpolatedVar::new(0.0f32);
        var.note_changed(1.0, 2.0);
        var.note_changed(2.0, 4.0);
        var.interpolate(1.5, false);
        assert_eq!(var.value(), 3.0);

        var.restore_to_last_networked();
        assert_eq!(var.value(), 4.0);

        var.reset_latched();
        assert_eq!(var.history_len(), 1);
        assert_eq!(var.interpolate(1.5, false), 4.0);

        var.reset(9.0);
        assert_eq!(var.history_len(), 0);
        assert_eq!(var.interpolate(1.5, false), 9.0);
    }
}
