//! Fault-injection knobs. Owned by the controller's state object —
//! never module-level singletons, so two concurrent test runs never
//! share (and silently clobber) each other's fault policy.

/// The current fault-injection policy. Mutated only through the
/// controller's `set_*` driver methods.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultPolicy {
    pub min_delay: f64,
    pub max_delay: f64,
    pub drop_rate: f64,
    pub repeat_rate: f64,
    pub repeat_times: u32,
    pub event_reordering: bool,
    pub real_time_mode: bool,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            min_delay: 0.0,
            max_delay: 0.0,
            drop_rate: 0.0,
            repeat_rate: 0.0,
            repeat_times: 0,
            event_reordering: false,
            real_time_mode: true,
        }
    }
}

impl FaultPolicy {
    /// The dispatch algorithm's delay-assignment rule: zero delay for
    /// same-process self-messages when no delay range is configured, a
    /// fixed 0.1s default delay otherwise, or a uniform sample when a
    /// range is configured.
    pub fn sample_delay(&self, sender: &str, recipient: &str, rng: &mut crate::rng::SimRng) -> f64 {
        if self.min_delay == 0.0 && self.max_delay == 0.0 {
            if sender == recipient { 0.0 } else { 0.1 }
        } else {
            rng.uniform(self.min_delay, self.max_delay)
        }
    }
}
