//! Virtual time.
//!
//! A monotone clock, `f64` seconds, with a `debug_assert!` against
//! going backwards — every delay and interval this harness deals with
//! is a fractional second (`0.1`, `1.0`, `U(min_delay, max_delay)`)
//! rather than an integer nanosecond count.

/// The controller's single virtual clock. Advances only when the
/// scheduler dispatches an event; never advances on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualClock {
    now: f64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { now: 0.0 }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Advances the clock to `time`. Panics in debug builds if `time` is
    /// in the past — reordering mode is the one case the scheduler is
    /// allowed to dispatch out of scheduled-time order, and it does so by
    /// selecting a different event, not by moving the clock backwards.
    pub fn advance_to(&mut self, time: f64) {
        debug_assert!(
            time >= self.now,
            "virtual time cannot go backwards: {time} < {}",
            self.now
        );
        self.now = time;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(VirtualClock::new().now(), 0.0);
    }

    #[test]
    fn advances_forward() {
        let mut clock = VirtualClock::new();
        clock.advance_to(1.5);
        assert_eq!(clock.now(), 1.5);
        clock.advance_to(1.5);
        assert_eq!(clock.now(), 1.5);
    }

    #[test]
    #[should_panic(expected = "virtual time cannot go backwards")]
    fn panics_on_rewind_in_debug() {
        let mut clock = VirtualClock::new();
        clock.advance_to(2.0);
        clock.advance_to(1.0);
    }
}
