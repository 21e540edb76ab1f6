//! Observable session state and the engine event stream.
//!
//! The engine mutates state only from its serializing task; every externally
//! interesting change is mirrored onto a broadcast channel so a front-end can
//! subscribe instead of polling. Subscribers that lag just miss frames.

use crate::performance::PerformanceState;
use crate::tools::{MediaAction, MediaPlatform, Mood};
use crate::transport::Citation;
use tokio::sync::broadcast;
use tracing::debug;

/// Connection lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Open,
    /// Lost or failed session; a retry is pending.
    Recalibrating,
    Closing,
}

/// Current media playback request state. A fresh request has no control
/// applied yet (it is simply playing); `control_media` fills `control`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaState {
    pub platform: MediaPlatform,
    pub query: String,
    pub media_id: Option<String>,
    pub control: Option<MediaAction>,
}

/// State changes published to subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Status(SessionStatus),
    Speaking(bool),
    Mood(Mood),
    Media(Option<MediaState>),
    Performance(Option<PerformanceState>),
    Identity(Option<String>),
    Citations(Vec<Citation>),
    MemorySyncing(bool),
}

/// Session-scoped state plus its event fan-out. Reset when a session is
/// created; cleared on explicit stop.
pub struct StateTracker {
    status: SessionStatus,
    speaking: bool,
    mood: Mood,
    media: Option<MediaState>,
    performance: Option<PerformanceState>,
    identity: Option<String>,
    citations: Vec<Citation>,
    events: broadcast::Sender<EngineEvent>,
}

impl StateTracker {
    pub fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            status: SessionStatus::Idle,
            speaking: false,
            mood: Mood::Default,
            media: None,
            performance: None,
            identity: None,
            citations: Vec::new(),
            events,
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine; the engine doesn't require an audience.
        let _ = self.events.send(event);
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            debug!(?status, "session status");
            self.status = status;
            self.emit(EngineEvent::Status(status));
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn set_speaking(&mut self, speaking: bool) {
        if self.speaking != speaking {
            self.speaking = speaking;
            self.emit(EngineEvent::Speaking(speaking));
        }
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    pub fn set_mood(&mut self, mood: Mood) {
        self.mood = mood;
        self.emit(EngineEvent::Mood(mood));
    }

    pub fn media(&self) -> Option<&MediaState> {
        self.media.as_ref()
    }

    pub fn set_media(&mut self, media: Option<MediaState>) {
        self.media = media;
        self.emit(EngineEvent::Media(self.media.clone()));
    }

    /// Apply a control action to the active media request; no-op when
    /// nothing is playing.
    pub fn set_media_action(&mut self, action: MediaAction) {
        if let Some(media) = &mut self.media {
            media.control = Some(action);
            self.emit(EngineEvent::Media(self.media.clone()));
        }
    }

    pub fn performance(&self) -> Option<&PerformanceState> {
        self.performance.as_ref()
    }

    pub fn set_performance(&mut self, performance: Option<PerformanceState>) {
        self.performance = performance;
        self.emit(EngineEvent::Performance(self.performance.clone()));
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: Option<String>) {
        self.identity = identity;
        self.emit(EngineEvent::Identity(self.identity.clone()));
    }

    pub fn set_citations(&mut self, citations: Vec<Citation>) {
        self.citations = citations;
        self.emit(EngineEvent::Citations(self.citations.clone()));
    }

    pub fn memory_syncing(&mut self, syncing: bool) {
        self.emit(EngineEvent::MemorySyncing(syncing));
    }

    /// True when media or a performance would hold off the idle monitor.
    pub fn media_or_performance_active(&self) -> bool {
        self.media.is_some() || self.performance.as_ref().is_some_and(|p| p.active)
    }

    /// Clear everything session-scoped. Used on explicit stop.
    pub fn clear_session_state(&mut self) {
        self.set_speaking(false);
        self.set_mood(Mood::Default);
        self.set_media(None);
        self.set_performance(None);
        self.set_identity(None);
        self.set_citations(Vec::new());
        self.set_status(SessionStatus::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (StateTracker, broadcast::Receiver<EngineEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (StateTracker::new(tx), rx)
    }

    #[test]
    fn speaking_only_emits_on_change() {
        let (mut state, mut rx) = tracker();
        state.set_speaking(true);
        state.set_speaking(true);
        state.set_speaking(false);

        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Speaking(true)));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Speaking(false)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn media_action_requires_active_media() {
        let (mut state, mut rx) = tracker();
        state.set_media_action(MediaAction::Pause);
        assert!(rx.try_recv().is_err());

        state.set_media(Some(MediaState {
            platform: MediaPlatform::Youtube,
            query: "q".to_string(),
            media_id: Some("id".to_string()),
            control: None,
        }));
        state.set_media_action(MediaAction::Pause);
        assert_eq!(state.media().unwrap().control, Some(MediaAction::Pause));
    }

    #[test]
    fn clear_resets_everything() {
        let (mut state, _rx) = tracker();
        state.set_status(SessionStatus::Open);
        state.set_mood(Mood::Excited);
        state.set_identity(Some("Asha".to_string()));
        state.set_speaking(true);

        state.clear_session_state();
        assert_eq!(state.status(), SessionStatus::Idle);
        assert_eq!(state.mood(), Mood::Default);
        assert!(state.identity().is_none());
        assert!(!state.is_speaking());
        assert!(!state.media_or_performance_active());
    }
}
