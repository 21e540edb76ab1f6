//! Gapless playback scheduling against a monotonic output clock.
//!
//! Each decoded buffer starts at `max(watermark, clock_now)` and advances the
//! watermark by its duration: back-to-back arrivals butt up exactly, late
//! arrivals start immediately (an audible gap, never an overlap). The
//! "speaking" flag is true iff at least one scheduled buffer has not finished.

use crate::codec;
use crate::error::{EngineError, EngineResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Output device port: a monotonic clock plus time-scheduled buffer playout.
/// Completion is reported out-of-band as buffer ids on the channel returned
/// by [`OutputDevice::open`].
pub trait OutputPort: Send {
    /// Monotonic output clock, seconds since the port opened.
    fn clock_now(&self) -> f64;

    /// Queue `samples` (24 kHz mono f32) to begin at `start_at` on the
    /// port's clock.
    fn schedule(&self, id: u64, samples: Vec<f32>, start_at: f64) -> EngineResult<()>;

    /// Stop everything scheduled or playing. Stopped buffers do not report
    /// completion.
    fn stop_all(&self);
}

/// Factory acquiring an output port per session. Dropping the port releases
/// the device.
pub trait OutputDevice: Send + Sync {
    fn open(&self) -> EngineResult<(Box<dyn OutputPort>, mpsc::UnboundedReceiver<u64>)>;
}

/// Where and for how long a buffer was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleOutcome {
    pub id: u64,
    pub start_at: f64,
    pub duration: f64,
}

/// Owns the watermark and the set of in-flight buffers for one session.
pub struct PlaybackScheduler {
    port: Box<dyn OutputPort>,
    watermark: f64,
    active: HashSet<u64>,
    next_id: u64,
    decode_failures: u64,
}

impl PlaybackScheduler {
    pub fn new(port: Box<dyn OutputPort>) -> Self {
        Self {
            port,
            watermark: 0.0,
            active: HashSet::new(),
            next_id: 0,
            decode_failures: 0,
        }
    }

    /// Decode one inbound chunk and schedule it. An undecodable chunk is
    /// counted and dropped; playback continues with the next chunk.
    pub fn handle_chunk(&mut self, data: &str) -> EngineResult<ScheduleOutcome> {
        let samples = match codec::decode_chunk(data) {
            Ok(s) => s,
            Err(e) => {
                self.decode_failures += 1;
                warn!(failures = self.decode_failures, "dropping undecodable audio chunk: {e}");
                return Err(e);
            }
        };
        if samples.is_empty() {
            return Err(EngineError::Decode("empty audio chunk".to_string()));
        }

        let duration = codec::buffer_duration(samples.len());
        let start_at = self.watermark.max(self.port.clock_now());
        let id = self.next_id;
        self.next_id += 1;

        self.port.schedule(id, samples, start_at)?;
        self.watermark = start_at + duration;
        self.active.insert(id);
        debug!(id, start_at, duration, "buffer scheduled");

        Ok(ScheduleOutcome {
            id,
            start_at,
            duration,
        })
    }

    /// A buffer finished playing. Returns true when this emptied the set
    /// (speaking flips false).
    pub fn buffer_done(&mut self, id: u64) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// True iff any buffer is scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    /// Undecodable chunks dropped this session.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Stop all pending playback (not drained) and clear the set.
    pub fn stop_all(&mut self) {
        self.port.stop_all();
        self.active.clear();
    }
}

// ---------------------------------------------------------------------------
// Rodio-backed output
// ---------------------------------------------------------------------------

enum OutputCommand {
    Schedule {
        id: u64,
        samples: Vec<f32>,
        start_at: f64,
    },
    StopAll,
}

/// Default-device rodio output. The `OutputStream` is !Send, so a dedicated
/// thread owns it; completion times are estimated from the schedule (the sink
/// plays queued buffers back to back).
pub struct RodioOutput;

impl OutputDevice for RodioOutput {
    fn open(&self) -> EngineResult<(Box<dyn OutputPort>, mpsc::UnboundedReceiver<u64>)> {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<OutputCommand>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<EngineResult<()>>();
        let opened = Instant::now();

        std::thread::spawn(move || {
            let (stream, handle) = match rodio::OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(EngineError::Playback(e.to_string())));
                    return;
                }
            };
            let sink = match rodio::Sink::try_new(&handle) {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(EngineError::Playback(e.to_string())));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            let _keep = stream;

            let mut pending: Vec<(u64, f64)> = Vec::new();
            loop {
                match cmd_rx.recv_timeout(Duration::from_millis(25)) {
                    Ok(OutputCommand::Schedule {
                        id,
                        samples,
                        start_at,
                    }) => {
                        let duration = codec::buffer_duration(samples.len());
                        let buffer = rodio::buffer::SamplesBuffer::new(
                            1,
                            codec::OUTPUT_SAMPLE_RATE,
                            samples,
                        );
                        sink.append(buffer);
                        pending.push((id, start_at + duration));
                    }
                    Ok(OutputCommand::StopAll) => {
                        sink.stop();
                        pending.clear();
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
                let now = opened.elapsed().as_secs_f64();
                pending.retain(|(id, end_at)| {
                    if *end_at <= now {
                        let _ = done_tx.send(*id);
                        false
                    } else {
                        true
                    }
                });
            }
            info!("output device released");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((
                Box::new(RodioPort {
                    opened,
                    cmd_tx: Mutex::new(cmd_tx),
                }),
                done_rx,
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Playback(
                "output thread exited before reporting readiness".to_string(),
            )),
        }
    }
}

struct RodioPort {
    opened: Instant,
    cmd_tx: Mutex<std::sync::mpsc::Sender<OutputCommand>>,
}

impl OutputPort for RodioPort {
    fn clock_now(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    fn schedule(&self, id: u64, samples: Vec<f32>, start_at: f64) -> EngineResult<()> {
        self.cmd_tx
            .lock()
            .expect("output command lock")
            .send(OutputCommand::Schedule {
                id,
                samples,
                start_at,
            })
            .map_err(|_| EngineError::Playback("output thread gone".to_string()))
    }

    fn stop_all(&self) {
        if let Ok(tx) = self.cmd_tx.lock() {
            let _ = tx.send(OutputCommand::StopAll);
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual output for tests and demos
// ---------------------------------------------------------------------------

/// A buffer as the virtual port saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBuffer {
    pub id: u64,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Default)]
struct VirtualShared {
    clock: f64,
    scheduled: Vec<RecordedBuffer>,
    stops: u32,
    done_tx: Option<mpsc::UnboundedSender<u64>>,
}

/// Hardware-free output port with a manually driven clock. Clone it before
/// handing it to the engine to keep a controller side.
#[derive(Clone, Default)]
pub struct VirtualOutput {
    shared: Arc<Mutex<VirtualShared>>,
}

impl VirtualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the output clock.
    pub fn advance(&self, seconds: f64) {
        self.shared.lock().expect("virtual output lock").clock += seconds;
    }

    /// Everything scheduled so far, in order.
    pub fn scheduled(&self) -> Vec<RecordedBuffer> {
        self.shared
            .lock()
            .expect("virtual output lock")
            .scheduled
            .clone()
    }

    /// How many times `stop_all` was called.
    pub fn stop_count(&self) -> u32 {
        self.shared.lock().expect("virtual output lock").stops
    }

    /// Report a buffer as finished to the session that opened this port.
    pub fn complete(&self, id: u64) {
        let shared = self.shared.lock().expect("virtual output lock");
        if let Some(tx) = &shared.done_tx {
            let _ = tx.send(id);
        }
    }
}

impl OutputPort for VirtualOutput {
    fn clock_now(&self) -> f64 {
        self.shared.lock().expect("virtual output lock").clock
    }

    fn schedule(&self, id: u64, samples: Vec<f32>, start_at: f64) -> EngineResult<()> {
        let mut shared = self.shared.lock().expect("virtual output lock");
        shared.scheduled.push(RecordedBuffer {
            id,
            start_at,
            duration: codec::buffer_duration(samples.len()),
        });
        Ok(())
    }

    fn stop_all(&self) {
        self.shared.lock().expect("virtual output lock").stops += 1;
    }
}

impl OutputDevice for VirtualOutput {
    fn open(&self) -> EngineResult<(Box<dyn OutputPort>, mpsc::UnboundedReceiver<u64>)> {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        self.shared.lock().expect("virtual output lock").done_tx = Some(done_tx);
        Ok((Box::new(self.clone()), done_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine as _;

    fn pcm_chunk(sample_count: usize) -> String {
        B64.encode(vec![0u8; sample_count * 2])
    }

    #[test]
    fn back_to_back_chunks_are_gapless() {
        let port = VirtualOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(port.clone()));

        // 500ms then 300ms at 24kHz, arriving with no gap.
        let a = scheduler.handle_chunk(&pcm_chunk(12_000)).unwrap();
        let b = scheduler.handle_chunk(&pcm_chunk(7_200)).unwrap();

        assert_eq!(a.start_at, 0.0);
        assert!((a.duration - 0.5).abs() < 1e-9);
        assert!((b.start_at - (a.start_at + a.duration)).abs() < 1e-9);
        assert!((b.duration - 0.3).abs() < 1e-9);
    }

    #[test]
    fn late_chunk_starts_at_clock_not_watermark() {
        let port = VirtualOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(port.clone()));

        let a = scheduler.handle_chunk(&pcm_chunk(2_400)).unwrap(); // 100ms
        port.advance(1.0); // clock passes the watermark
        let b = scheduler.handle_chunk(&pcm_chunk(2_400)).unwrap();

        assert!(b.start_at >= 1.0);
        assert!(b.start_at > a.start_at + a.duration);
    }

    #[test]
    fn watermark_never_schedules_in_the_past() {
        let port = VirtualOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(port.clone()));

        for i in 0..10 {
            port.advance(0.05 * (i % 3) as f64);
            let outcome = scheduler.handle_chunk(&pcm_chunk(1_200)).unwrap();
            assert!(outcome.start_at >= port.clock_now() - 1e-9);
        }
    }

    #[test]
    fn speaking_flag_tracks_active_set() {
        let port = VirtualOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(port));
        assert!(!scheduler.is_speaking());

        let a = scheduler.handle_chunk(&pcm_chunk(2_400)).unwrap();
        let b = scheduler.handle_chunk(&pcm_chunk(2_400)).unwrap();
        assert!(scheduler.is_speaking());

        assert!(!scheduler.buffer_done(a.id));
        assert!(scheduler.is_speaking());
        assert!(scheduler.buffer_done(b.id));
        assert!(!scheduler.is_speaking());
    }

    #[test]
    fn undecodable_chunk_is_counted_and_skipped() {
        let port = VirtualOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(port.clone()));

        assert!(scheduler.handle_chunk("!!bad!!").is_err());
        assert_eq!(scheduler.decode_failures(), 1);
        assert!(!scheduler.is_speaking());

        // The next good chunk still schedules from the start.
        let outcome = scheduler.handle_chunk(&pcm_chunk(2_400)).unwrap();
        assert_eq!(outcome.start_at, 0.0);
    }

    #[test]
    fn stop_all_clears_set_and_reaches_port() {
        let port = VirtualOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(port.clone()));
        scheduler.handle_chunk(&pcm_chunk(2_400)).unwrap();

        scheduler.stop_all();
        assert!(!scheduler.is_speaking());
        assert_eq!(port.stop_count(), 1);
    }
}
