//! Error types for the duplex session engine.
//!
//! The taxonomy mirrors how each failure is recovered: transport drops and
//! connect failures are retried with their own backoffs, handler and decode
//! faults are contained where they happen. Nothing here is fatal.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the duplex session engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The session dropped after being open. Recovered with the resume backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// Connect or device acquisition failed. Recovered with the connect backoff.
    #[error("connect error: {0}")]
    Connect(String),

    /// A tool handler faulted. Caught and logged; the batch continues.
    #[error("tool handler error: {0}")]
    Handler(String),

    /// An inbound audio chunk could not be decoded. The chunk is dropped.
    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio playback error: {0}")]
    Playback(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("memory error: {0}")]
    Memory(#[from] livelink_core::MemoryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for EngineError {
    fn from(err: cpal::DevicesError) -> Self {
        EngineError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for EngineError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        EngineError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for EngineError {
    fn from(err: cpal::BuildStreamError) -> Self {
        EngineError::AudioDevice(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for EngineError {
    fn from(err: cpal::PlayStreamError) -> Self {
        EngineError::AudioDevice(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}
