//! WebSocket transport for the live voice service.
//!
//! Speaks the bidirectional JSON protocol: a `setup` frame on connect, then
//! `realtimeInput` media chunks outbound and model turns inbound. Each
//! inbound frame is split into [`ServerEvent`]s in payload order
//! (grounding, tool calls, audio) before it reaches the session loop.

use crate::codec::EncodedChunk;
use crate::error::{EngineError, EngineResult};
use crate::tools::ToolResponse;
use crate::transport::{Citation, ServerEvent, SessionHandle, SessionRequest, SessionTransport, ToolCallWire};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Environment variable holding the service API key.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// [`SessionTransport`] over a TLS WebSocket.
pub struct WsTransport {
    endpoint: String,
    api_key: String,
}

impl WsTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Reads the API key from [`API_KEY_VAR`].
    pub fn from_env() -> EngineResult<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .map_err(|_| EngineError::Config(format!("{API_KEY_VAR} is not set")))?;
        Ok(Self::new(api_key))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn setup_frame(request: &SessionRequest) -> Value {
        json!({
            "setup": {
                "model": format!("models/{}", request.model),
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": request.voice }
                        }
                    }
                },
                "systemInstruction": {
                    "parts": [{ "text": request.system_instruction }]
                },
                "tools": request.tool_declarations,
            }
        })
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn connect(
        &self,
        request: &SessionRequest,
    ) -> EngineResult<(Box<dyn SessionHandle>, mpsc::Receiver<ServerEvent>)> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        let (mut sink, source) = stream.split();

        let setup = Self::setup_frame(request);
        sink.send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        info!(model = %request.model, voice = %request.voice, "session opened");

        let (event_tx, event_rx) = mpsc::channel(64);
        let reader = tokio::spawn(read_loop(source, event_tx));

        Ok((Box::new(WsSessionHandle { sink, reader }), event_rx))
    }
}

struct WsSessionHandle {
    sink: WsSink,
    reader: JoinHandle<()>,
}

#[async_trait]
impl SessionHandle for WsSessionHandle {
    async fn send_audio(&mut self, chunk: &EncodedChunk) -> EngineResult<()> {
        let frame = json!({
            "realtimeInput": { "mediaChunks": [chunk] }
        });
        self.sink
            .send(Message::Text(frame.to_string()))
            .await?;
        Ok(())
    }

    async fn send_tool_response(&mut self, response: &ToolResponse) -> EngineResult<()> {
        let frame = json!({
            "toolResponse": {
                "functionResponses": [{
                    "id": response.id,
                    "name": response.name,
                    "response": { "result": response.result },
                }]
            }
        });
        self.sink
            .send(Message::Text(frame.to_string()))
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("close while already closed: {e}");
        }
        self.reader.abort();
    }
}

async fn read_loop(mut source: WsSource, event_tx: mpsc::Sender<ServerEvent>) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                for event in parse_server_message(&text) {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    for event in parse_server_message(text) {
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(_) => warn!("non-utf8 binary frame skipped"),
            },
            Some(Ok(Message::Close(frame))) => {
                break frame.map(|f| f.reason.to_string());
            }
            Some(Ok(_)) => {} // ping/pong handled by the stack
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        }
    };
    let _ = event_tx.send(ServerEvent::Closed { reason }).await;
}

/// Split one inbound frame into events, payload order preserved:
/// grounding first, then tool calls, then audio.
pub fn parse_server_message(text: &str) -> Vec<ServerEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("undecodable server frame skipped: {e}");
            return Vec::new();
        }
    };
    let mut events = Vec::new();

    let citations = extract_citations(&value);
    if !citations.is_empty() {
        events.push(ServerEvent::Grounding(citations));
    }

    if let Some(calls) = value
        .pointer("/toolCall/functionCalls")
        .and_then(Value::as_array)
    {
        let wires: Vec<ToolCallWire> = calls
            .iter()
            .filter_map(|c| serde_json::from_value(c.clone()).ok())
            .collect();
        if !wires.is_empty() {
            events.push(ServerEvent::ToolCalls(wires));
        }
    }

    if let Some(parts) = value
        .pointer("/serverContent/modelTurn/parts")
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                events.push(ServerEvent::Audio {
                    data: data.to_string(),
                });
            }
        }
    }

    events
}

fn extract_citations(value: &Value) -> Vec<Citation> {
    let Some(chunks) = value
        .pointer("/serverContent/groundingMetadata/groundingChunks")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    chunks
        .iter()
        .filter_map(|chunk| {
            let web = chunk.get("web")?;
            Some(Citation {
                title: web.get("title")?.as_str()?.to_string(),
                uri: web.get("uri")?.as_str()?.to_string(),
            })
        })
        .collect()
}
