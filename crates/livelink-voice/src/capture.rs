//! Microphone capture: fixed-size sample blocks plus amplitude voice gating.
//!
//! Capture runs on its own thread because the cpal `Stream` is !Send on some
//! platforms. The callback only accumulates samples and pushes full blocks
//! into an unbounded channel; voice detection and encoding happen later on
//! the session's serializing task, so the next block is never held up.

use crate::error::{EngineError, EngineResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input sample rate in Hz (default 16000).
    pub sample_rate: u32,

    /// Block size in samples (default 2048, ~128ms at 16kHz).
    pub block_size: usize,

    /// Voice is present when any |sample| exceeds this (default 0.01).
    pub voice_threshold: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::codec::INPUT_SAMPLE_RATE,
            block_size: 2048,
            voice_threshold: 0.01,
        }
    }
}

/// One block of captured samples, in capture order.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Normalized f32 samples, -1.0..1.0.
    pub samples: Vec<f32>,
}

/// True when the block crosses the amplitude gate.
pub fn has_voice(samples: &[f32], threshold: f32) -> bool {
    samples.iter().any(|s| s.abs() > threshold)
}

/// Microphone port. Acquired per session; dropping the handle releases the
/// device. Acquisition failure is fatal for that connect attempt.
pub trait MicSource: Send + Sync {
    fn open(
        &self,
        config: &CaptureConfig,
        block_tx: mpsc::UnboundedSender<AudioBlock>,
    ) -> EngineResult<Box<dyn MicHandle>>;
}

/// Keeps the capture stream alive. Drop to release the microphone.
pub trait MicHandle: Send {}

/// Default-host cpal microphone.
pub struct CpalMic;

impl MicSource for CpalMic {
    fn open(
        &self,
        config: &CaptureConfig,
        block_tx: mpsc::UnboundedSender<AudioBlock>,
    ) -> EngineResult<Box<dyn MicHandle>> {
        let config = config.clone();
        let (ready_tx, ready_rx) = std_mpsc::channel::<EngineResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        // The stream must be built and dropped on the same thread.
        let join = thread::spawn(move || {
            let stream = match build_stream(&config, block_tx) {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.into()));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Park until the handle is dropped; the stream is released with us.
            let _ = stop_rx.recv();
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("microphone acquired");
                Ok(Box::new(CpalMicHandle {
                    stop_tx,
                    join: Some(join),
                }))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::AudioDevice(
                "capture thread exited before reporting readiness".to_string(),
            )),
        }
    }
}

fn build_stream(
    config: &CaptureConfig,
    block_tx: mpsc::UnboundedSender<AudioBlock>,
) -> EngineResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| EngineError::AudioDevice("no input device available".to_string()))?;
    info!(
        "using input device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let block_size = config.block_size;
    let mut pending = Vec::with_capacity(block_size);
    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                pending.push(sample);
                if pending.len() >= block_size {
                    let block = AudioBlock {
                        samples: std::mem::replace(&mut pending, Vec::with_capacity(block_size)),
                    };
                    if block_tx.send(block).is_err() {
                        // Session is gone; keep capturing until the handle drops.
                        pending.clear();
                    }
                }
            }
        },
        move |err| {
            warn!("capture stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

struct CpalMicHandle {
    stop_tx: std_mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl MicHandle for CpalMicHandle {}

impl Drop for CpalMicHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        info!("microphone released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_defaults() {
        let c = CaptureConfig::default();
        assert_eq!(c.sample_rate, 16_000);
        assert_eq!(c.block_size, 2048);
        assert!((c.voice_threshold - 0.01).abs() < 1e-9);
    }

    #[test]
    fn voice_gate_is_strict_inequality() {
        let threshold = 0.01;
        assert!(!has_voice(&[0.0; 64], threshold));
        assert!(!has_voice(&[0.01, -0.01, 0.005], threshold));
        assert!(has_voice(&[0.0, 0.0, 0.011], threshold));
        assert!(has_voice(&[-0.5], threshold));
    }

    #[test]
    fn silence_block_is_voiceless() {
        let samples = vec![0.0015f32; 2048];
        assert!(!has_voice(&samples, CaptureConfig::default().voice_threshold));
    }
}
