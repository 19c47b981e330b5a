//! The simulation clock exposed to the module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic milliseconds since the host started, shifted by a base offset.
///
/// The module reads this through its clock import. Restoring a checkpoint
/// re-baselines the clock so that simulation time continues from the
/// checkpoint's timestamp instead of jumping back to zero.
#[derive(Debug)]
pub struct SimClock {
    origin: Instant,
    /// Base offset in milliseconds, stored as `f64` bits.
    base: AtomicU64,
}

impl SimClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            base: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Current simulation time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> f64 {
        f64::from_bits(self.base.load(Ordering::Acquire)) + self.elapsed_ms()
    }

    /// Shift the clock so that [`now_ms`](Self::now_ms) reads `timestamp_ms`
    /// right now.
    pub fn rebase(&self, timestamp_ms: f64) {
        let base = timestamp_ms - self.elapsed_ms();
        self.base.store(base.to_bits(), Ordering::Release);
    }

    fn elapsed_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_near_zero() {
        let clock = SimClock::new();
        let now = clock.now_ms();
        assert!((0.0..1000.0).contains(&now));
    }

    #[test]
    fn test_rebase_continues_from_timestamp() {
        let clock = SimClock::new();
        clock.rebase(60_000.0);
        let now = clock.now_ms();
        assert!(now >= 59_999.9);
        assert!(now < 61_000.0);
    }

    #[test]
    fn test_monotonic() {
        let clock = SimClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
