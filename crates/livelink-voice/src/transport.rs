//! Transport seam: the duplex channel to the remote conversational model.
//!
//! `SessionTransport` establishes a session; `SessionHandle` is the open
//! channel. Inbound traffic arrives as `ServerEvent`s on a channel, already
//! split into payload order (grounding, tool calls, audio) so the session
//! loop processes exactly what the wire delivered, in order.

use crate::codec::EncodedChunk;
use crate::error::EngineResult;
use crate::tools::ToolResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Everything the connect request carries: model identity, rendered persona,
/// declared tools, and the synthesis voice.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest {
    pub model: String,
    pub system_instruction: String,
    pub voice: String,
    pub tool_declarations: Value,
}

/// One grounding citation attached to a model turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

/// A tool call as it arrives on the wire, before typed parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallWire {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Inbound session traffic, in payload order.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Base64 PCM chunk of synthesized speech.
    Audio { data: String },
    /// An ordered tool-call batch; every call must be answered.
    ToolCalls(Vec<ToolCallWire>),
    /// Grounding citations for the current turn.
    Grounding(Vec<Citation>),
    /// The remote side closed or the transport failed.
    Closed { reason: Option<String> },
}

/// An open duplex session. Owned exclusively by the session manager.
#[async_trait]
pub trait SessionHandle: Send {
    async fn send_audio(&mut self, chunk: &EncodedChunk) -> EngineResult<()>;
    async fn send_tool_response(&mut self, response: &ToolResponse) -> EngineResult<()>;
    async fn close(&mut self);
}

/// Connects to the remote service. Implementations must deliver inbound
/// events in arrival order on the returned channel and finish with a
/// `Closed` event (or drop the sender) when the session ends.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn connect(
        &self,
        request: &SessionRequest,
    ) -> EngineResult<(Box<dyn SessionHandle>, mpsc::Receiver<ServerEvent>)>;
}
