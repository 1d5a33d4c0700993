//! Monotonic millisecond time source shared by all tasks.

use tokio::time::Instant;

/// Milliseconds since the flight computer booted.
///
/// Flight decisions must never see wall-clock time: an NTP step would corrupt
/// both the Kalman dt and the landed-check interval. `tokio::time::Instant`
/// also follows virtual time under a paused test runtime, which is what makes
/// the timing-sensitive paths testable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
