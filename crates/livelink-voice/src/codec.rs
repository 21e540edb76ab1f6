//! PCM wire codec: f32 samples to base64 16-bit little-endian and back.
//!
//! Outbound microphone blocks are 16 kHz; inbound synthesized audio is
//! 24 kHz. Both travel as base64 of interleaved i16 LE with a
//! `audio/pcm;rate=N` mime marker.

use crate::error::{EngineError, EngineResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Input (microphone) sample rate in Hz.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Output (playback) sample rate in Hz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// The minimal silent payload used as an idle keep-alive: 4 base64 chars,
/// three zero bytes, one and a half samples of silence.
pub const KEEPALIVE_DATA: &str = "AAAA";

/// A wire-format audio payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl EncodedChunk {
    /// The keep-alive chunk sent by the idle monitor.
    pub fn keepalive() -> Self {
        Self {
            data: KEEPALIVE_DATA.to_string(),
            mime_type: format!("audio/pcm;rate={INPUT_SAMPLE_RATE}"),
        }
    }
}

/// Encode a block of normalized f32 samples into the wire format.
pub fn encode_block(samples: &[f32]) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    EncodedChunk {
        data: B64.encode(bytes),
        mime_type: format!("audio/pcm;rate={INPUT_SAMPLE_RATE}"),
    }
}

/// Decode a base64 PCM payload into normalized f32 samples.
///
/// A trailing odd byte means a truncated sample; that is a decode error, not
/// something to round away silently.
pub fn decode_chunk(data: &str) -> EngineResult<Vec<f32>> {
    let bytes = B64
        .decode(data)
        .map_err(|e| EngineError::Decode(format!("invalid base64: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(EngineError::Decode(format!(
            "odd PCM byte length: {}",
            bytes.len()
        )));
    }
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(value as f32 / 32768.0);
    }
    Ok(samples)
}

/// Duration in seconds of a decoded buffer at the output rate.
pub fn buffer_duration(sample_count: usize) -> f64 {
    sample_count as f64 / OUTPUT_SAMPLE_RATE as f64
}
