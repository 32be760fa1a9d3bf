//! Deterministic, seedable randomness for fault-injection decisions:
//! delay sampling, drop/repeat coin flips, and reordering-mode
//! selection.
//!
//! Wraps the underlying RNG behind a narrow, purpose-named method
//! surface instead of exposing the generator trait directly, so every
//! call site documents *why* it's drawing a random number rather than
//! just *that* it is. A single global scheduler drives the whole run,
//! so there's one RNG stream rather than per-process ones.

use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng};

/// Wraps a [`SmallRng`] so fault-injection call sites read as intent
/// (`drop_event`, `delay_in`) rather than raw `gen_range` calls.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: SmallRng,
}

impl SimRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// A uniform sample in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// `true` with probability `p` (clamped to `[0, 1]`).
    pub fn next_bool_with_probability(&mut self, p: f64) -> bool {
        self.next_f64() < p.clamp(0.0, 1.0)
    }

    /// A uniform sample in `[min, max]`; returns `min` if `max <= min`.
    pub fn uniform(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.inner.gen_range(min..=max)
    }

    /// Picks a uniformly random index in `0..len`. Panics if `len == 0`;
    /// callers are expected to have already checked for emptiness.
    pub fn pick_index(&mut self, len: usize) -> usize {
        self.inner.gen_range(0..len)
    }
}
