//! Tool-call dispatch: every id in, exactly one acknowledgment out.
//!
//! Batches run sequentially in receipt order. A handler fault (including
//! malformed arguments) is logged and contained; the call is still
//! acknowledged because the remote side blocks awaiting every id.

use crate::error::{EngineError, EngineResult};
use crate::lookup::MediaLookup;
use crate::performance::PerformanceState;
use crate::state::{MediaState, StateTracker};
use crate::tools::{self, MediaPlatform, ProfileAction, ToolCall, ToolResponse};
use crate::transport::ToolCallWire;
use livelink_core::{MemoryStore, LAST_SYNC_KEY, MEMORY_KEY};
use std::sync::Arc;
use tracing::{info, warn};

/// Applies tool side effects against session state and the injected ports.
pub struct ToolDispatcher {
    memory: Arc<dyn MemoryStore>,
    lookup: Arc<dyn MediaLookup>,
}

impl ToolDispatcher {
    pub fn new(memory: Arc<dyn MemoryStore>, lookup: Arc<dyn MediaLookup>) -> Self {
        Self { memory, lookup }
    }

    /// Process one batch. Returns exactly one response per call, same ids,
    /// receipt order.
    pub async fn dispatch_batch(
        &self,
        calls: &[ToolCallWire],
        state: &mut StateTracker,
    ) -> Vec<ToolResponse> {
        let mut responses = Vec::with_capacity(calls.len());
        for wire in calls {
            let parsed = tools::parse_call(wire);
            match parsed.call {
                Ok(call) => {
                    if let Err(e) = self.apply(call, state).await {
                        warn!(id = %parsed.id, name = %parsed.name, "tool handler failed: {e}");
                    }
                }
                Err(e) => {
                    warn!(id = %parsed.id, name = %parsed.name, "malformed tool arguments: {e}");
                }
            }
            responses.push(ToolResponse::ack(&parsed.id, &parsed.name));
        }
        responses
    }

    async fn apply(&self, call: ToolCall, state: &mut StateTracker) -> EngineResult<()> {
        match call {
            ToolCall::SyncMemory { updated_summary } => {
                state.memory_syncing(true);
                let result = self.memory.set(MEMORY_KEY, &updated_summary).and_then(|()| {
                    self.memory
                        .set(LAST_SYNC_KEY, &chrono::Utc::now().to_rfc3339())
                });
                state.memory_syncing(false);
                result?;
                info!(bytes = updated_summary.len(), "memory record synced");
            }
            ToolCall::ManageVoiceProfile {
                action,
                user_name,
                profile_details,
            } => match action {
                ProfileAction::Save | ProfileAction::Update => {
                    self.memory.append_line(
                        MEMORY_KEY,
                        &format!(
                            "VOICE_ID: {user_name}. Details: {}",
                            profile_details.as_deref().unwrap_or("None")
                        ),
                    )?;
                    info!(user = %user_name, "voice profile recorded");
                    state.set_identity(Some(user_name));
                }
                ProfileAction::Forget => {
                    self.memory.remove(MEMORY_KEY)?;
                    info!(user = %user_name, "voice profile forgotten");
                    state.set_identity(None);
                }
            },
            ToolCall::PlayMedia {
                query,
                platform,
                media_id,
            } => {
                let resolved = match (platform, media_id) {
                    (_, Some(id)) => Some(id),
                    (MediaPlatform::Youtube, None) => self.lookup.resolve(&query).await?,
                    (MediaPlatform::Spotify, None) => None,
                };
                match (platform, resolved) {
                    // A YouTube request that resolves to nothing stays inactive.
                    (MediaPlatform::Youtube, None) => {
                        return Err(EngineError::Handler(format!(
                            "no playable result for {query:?}"
                        )));
                    }
                    (platform, media_id) => {
                        state.set_media(Some(MediaState {
                            platform,
                            query,
                            media_id,
                            control: None,
                        }));
                    }
                }
            }
            ToolCall::ControlMedia { action } => {
                state.set_media_action(action);
            }
            ToolCall::SignalMood { mood } => {
                state.set_mood(mood);
            }
            ToolCall::StartPerformance {
                kind,
                artist,
                duration_seconds,
            } => {
                state.set_performance(Some(PerformanceState::start(
                    kind,
                    artist,
                    duration_seconds,
                )));
            }
            ToolCall::Unknown { name } => {
                warn!(name = %name, "unknown tool call acknowledged without effect");
            }
        }
        Ok(())
    }
}
