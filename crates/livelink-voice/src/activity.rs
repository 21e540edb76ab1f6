//! Activity clock: the single "last meaningful activity" timestamp.
//!
//! Touched on voice detection, inbound audio, buffer completion, and tool
//! dispatch; read by the idle monitor. Uses `tokio::time::Instant` so tests
//! can drive it with a paused clock.

use std::time::Duration;
use tokio::time::Instant;

/// Tracks the last time anything conversationally meaningful happened.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    last: Instant,
}

impl ActivityClock {
    /// A clock whose last activity is now.
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Record activity at the current instant. The timestamp never moves
    /// backwards; `Instant::now()` is monotonic.
    pub fn touch(&mut self) {
        self.last = Instant::now();
    }

    /// Time elapsed since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last.elapsed()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}
