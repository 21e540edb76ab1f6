//! Timed performance countdown (shayari, ghazal, singing, teaching).
//!
//! A one-second tick advances `elapsed` while active; reaching the total
//! duration deactivates the state and the session loop drops the tick
//! source. Audio scheduling is untouched; the idle monitor just treats an
//! active performance as activity.

use crate::tools::PerformanceKind;
use std::time::Duration;

/// The tick cadence for an active performance.
pub const PERFORMANCE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceState {
    pub kind: PerformanceKind,
    pub artist: Option<String>,
    pub total_seconds: u32,
    pub elapsed_seconds: u32,
    pub active: bool,
}

impl PerformanceState {
    pub fn start(kind: PerformanceKind, artist: Option<String>, total_seconds: u32) -> Self {
        Self {
            kind,
            artist,
            total_seconds,
            elapsed_seconds: 0,
            // A zero-duration performance is over before it begins.
            active: total_seconds > 0,
        }
    }

    /// Advance one second. Returns true while still active.
    pub fn tick(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.elapsed_seconds += 1;
        if self.elapsed_seconds >= self.total_seconds {
            self.active = false;
        }
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_terminates() {
        let mut perf = PerformanceState::start(PerformanceKind::Ghazal, None, 3);
        assert!(perf.active);
        assert!(perf.tick());
        assert!(perf.tick());
        assert!(!perf.tick());
        assert!(!perf.active);
        assert_eq!(perf.elapsed_seconds, 3);
    }

    #[test]
    fn tick_after_termination_is_inert() {
        let mut perf = PerformanceState::start(PerformanceKind::Singing, Some("Begum Akhtar".into()), 1);
        assert!(!perf.tick());
        assert!(!perf.tick());
        assert_eq!(perf.elapsed_seconds, 1);
    }

    #[test]
    fn zero_duration_never_activates() {
        let perf = PerformanceState::start(PerformanceKind::Teaching, None, 0);
        assert!(!perf.active);
    }
}
