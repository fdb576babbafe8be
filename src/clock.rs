//! Injectable time source.
//!
//! Every time-sensitive component (heartbeat gating, the rate gate's
//! fixed window, the reaper's grace-period sweep) reads the clock through
//! this trait instead of calling `Instant::now()` directly, so tests can
//! drive time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances when told to. `now()` returns a fixed
/// `Instant` captured at construction plus an offset driven by `advance()`.
#[derive(Clone)]
pub struct FakeClock {
    base: Instant,
    offset_millis: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, dur: Duration) {
        self.offset_millis
            .fetch_add(dur.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_demand() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(30));
        let t1 = clock.now();
        assert_eq!(t1 - t0, Duration::from_secs(30));
    }
}
