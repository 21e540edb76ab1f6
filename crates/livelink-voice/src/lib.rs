//! # LiveLink Voice - Duplex Voice Session Engine
//!
//! Full-duplex voice sessions against a live conversational model: captured
//! microphone audio streams up while synthesized speech, tool calls, and
//! grounding citations stream back. One task owns all session state, so
//! nothing downstream races.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Session Manager                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │   Capture    │→ │    Codec     │→ │  Transport   │       │
//! │  │    (cpal)    │  │ (PCM/base64) │  │ (WebSocket)  │       │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘       │
//! │         ↑                                    ↓               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Idle Monitor │  │   Playback   │← │    Tool      │       │
//! │  │ (keep-alive) │  │   (rodio)    │  │  Dispatcher  │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions never die for good: a failed connect retries after 4s, a
//! dropped session resumes after 1.2s, forever, while accumulated state
//! (mood, identity, media) carries across the gap.

pub mod activity;
pub mod capture;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod idle;
pub mod lookup;
pub mod performance;
pub mod playback;
pub mod session;
pub mod state;
pub mod tools;
pub mod transport;
pub mod ws;

pub use activity::ActivityClock;
pub use capture::{has_voice, AudioBlock, CaptureConfig, CpalMic, MicHandle, MicSource};
pub use codec::{
    decode_chunk, encode_block, EncodedChunk, INPUT_SAMPLE_RATE, KEEPALIVE_DATA,
    OUTPUT_SAMPLE_RATE,
};
pub use dispatch::ToolDispatcher;
pub use error::{EngineError, EngineResult};
pub use idle::{should_send_keepalive, IdleConfig};
pub use lookup::{FixedLookup, MediaLookup, YoutubeLookup};
pub use performance::{PerformanceState, PERFORMANCE_TICK};
pub use playback::{
    OutputDevice, OutputPort, PlaybackScheduler, RodioOutput, ScheduleOutcome, VirtualOutput,
};
pub use session::{ReconnectConfig, SessionConfig, SessionManager, SessionStats};
pub use state::{EngineEvent, MediaState, SessionStatus, StateTracker};
pub use tools::{
    MediaAction, MediaPlatform, Mood, ParsedCall, PerformanceKind, ProfileAction, ToolCall,
    ToolResponse,
};
pub use transport::{Citation, ServerEvent, SessionHandle, SessionRequest, SessionTransport, ToolCallWire};
pub use ws::WsTransport;
