//! Idle monitor: proactive keep-alives after a quiet gap.
//!
//! A one-second tick while the session is open; when nothing meaningful has
//! happened for the idle window and nothing is playing, one silent PCM
//! keep-alive goes out and the activity clock resets, so the next send needs
//! another full gap.

use std::time::Duration;

/// Idle monitor configuration.
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// Tick cadence (default 1s).
    pub tick: Duration,

    /// Inactivity window that triggers a keep-alive (default 8s).
    pub window: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            window: Duration::from_secs(8),
        }
    }
}

/// The per-tick decision. Pure so the property is trivially testable; the
/// session loop owns the tick source and the clock reset.
pub fn should_send_keepalive(
    config: &IdleConfig,
    idle_for: Duration,
    speaking: bool,
    media_or_performance_active: bool,
) -> bool {
    idle_for >= config.window && !speaking && !media_or_performance_active
}
