//! End-to-end session tests over fake devices and a scripted transport.
//!
//! The clock is paused, so reconnect backoffs and idle windows are asserted
//! exactly instead of approximately.

use async_trait::async_trait;
use livelink_core::{InMemoryStore, MemoryStore, MEMORY_KEY};
use livelink_voice::{
    codec, AudioBlock, CaptureConfig, Citation, EncodedChunk, EngineError, EngineEvent,
    EngineResult, FixedLookup, MicHandle, MicSource, ServerEvent, SessionConfig, SessionHandle,
    SessionManager, SessionRequest, SessionStatus, SessionTransport, ToolCallWire, ToolResponse,
    VirtualOutput,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Instant};

struct FakeMic {
    taps: Mutex<Vec<mpsc::UnboundedSender<AudioBlock>>>,
}

impl FakeMic {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            taps: Mutex::new(Vec::new()),
        })
    }

    fn push_block(&self, samples: Vec<f32>) {
        let taps = self.taps.lock().unwrap();
        let tap = taps.last().expect("no open capture stream");
        tap.send(AudioBlock { samples }).unwrap();
    }
}

struct FakeMicHandle;
impl MicHandle for FakeMicHandle {}

impl MicSource for FakeMic {
    fn open(
        &self,
        _config: &CaptureConfig,
        block_tx: mpsc::UnboundedSender<AudioBlock>,
    ) -> EngineResult<Box<dyn MicHandle>> {
        self.taps.lock().unwrap().push(block_tx);
        Ok(Box::new(FakeMicHandle))
    }
}

/// One opened session as seen from the test: what went out, plus a sender
/// to script inbound traffic.
#[derive(Clone)]
struct SessionProbe {
    events: mpsc::Sender<ServerEvent>,
    sent_audio: Arc<Mutex<Vec<String>>>,
    sent_responses: Arc<Mutex<Vec<ToolResponse>>>,
}

struct TransportShared {
    fail_connects: u32,
    connect_times: Vec<Instant>,
    probes: Vec<SessionProbe>,
}

struct FakeTransport {
    shared: Arc<Mutex<TransportShared>>,
}

impl FakeTransport {
    fn new(fail_connects: u32) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Mutex::new(TransportShared {
                fail_connects,
                connect_times: Vec::new(),
                probes: Vec::new(),
            })),
        })
    }

    fn connect_times(&self) -> Vec<Instant> {
        self.shared.lock().unwrap().connect_times.clone()
    }

    fn probe(&self, session: usize) -> SessionProbe {
        self.shared.lock().unwrap().probes[session].clone()
    }

    fn session_count(&self) -> usize {
        self.shared.lock().unwrap().probes.len()
    }
}

struct FakeHandle {
    sent_audio: Arc<Mutex<Vec<String>>>,
    sent_responses: Arc<Mutex<Vec<ToolResponse>>>,
}

#[async_trait]
impl SessionHandle for FakeHandle {
    async fn send_audio(&mut self, chunk: &EncodedChunk) -> EngineResult<()> {
        self.sent_audio.lock().unwrap().push(chunk.data.clone());
        Ok(())
    }

    async fn send_tool_response(&mut self, response: &ToolResponse) -> EngineResult<()> {
        self.sent_responses.lock().unwrap().push(response.clone());
        Ok(())
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn connect(
        &self,
        _request: &SessionRequest,
    ) -> EngineResult<(Box<dyn SessionHandle>, mpsc::Receiver<ServerEvent>)> {
        let mut shared = self.shared.lock().unwrap();
        shared.connect_times.push(Instant::now());
        if shared.fail_connects > 0 {
            shared.fail_connects -= 1;
            return Err(EngineError::Connect("scripted failure".to_string()));
        }
        let (event_tx, event_rx) = mpsc::channel(64);
        let sent_audio = Arc::new(Mutex::new(Vec::new()));
        let sent_responses = Arc::new(Mutex::new(Vec::new()));
        shared.probes.push(SessionProbe {
            events: event_tx,
            sent_audio: sent_audio.clone(),
            sent_responses: sent_responses.clone(),
        });
        Ok((
            Box::new(FakeHandle {
                sent_audio,
                sent_responses,
            }),
            event_rx,
        ))
    }
}

struct Rig {
    manager: SessionManager,
    transport: Arc<FakeTransport>,
    mic: Arc<FakeMic>,
    output: VirtualOutput,
    memory: Arc<InMemoryStore>,
    events: broadcast::Receiver<EngineEvent>,
}

fn rig(fail_connects: u32) -> Rig {
    let transport = FakeTransport::new(fail_connects);
    let mic = FakeMic::new();
    let output = VirtualOutput::new();
    let memory = Arc::new(InMemoryStore::new());
    let manager = SessionManager::new(
        transport.clone(),
        mic.clone(),
        Arc::new(output.clone()),
        memory.clone(),
        Arc::new(FixedLookup::always("vid42")),
        SessionConfig::default(),
    );
    let events = manager.subscribe();
    Rig {
        manager,
        transport,
        mic,
        output,
        memory,
        events,
    }
}

fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn failed_connects_retry_every_four_seconds() {
    let mut rig = rig(2);
    rig.manager.start();
    sleep(Duration::from_secs(9)).await;

    let times = rig.transport.connect_times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[1] - times[0], Duration::from_secs(4));
    assert_eq!(times[2] - times[1], Duration::from_secs(4));

    // Third attempt succeeded.
    assert_eq!(rig.transport.session_count(), 1);
    let stats = rig.manager.stats();
    assert_eq!(stats.connect_attempts, 3);
    assert_eq!(stats.sessions_opened, 1);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dropped_session_resumes_after_short_backoff() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.transport.session_count(), 1);

    rig.transport
        .probe(0)
        .events
        .send(ServerEvent::Closed { reason: None })
        .await
        .unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(rig.transport.session_count(), 2);
    let times = rig.transport.connect_times();
    let gap = times[1] - times[0];
    assert!(gap >= Duration::from_millis(1_200), "gap was {gap:?}");
    assert!(gap < Duration::from_secs(2), "gap was {gap:?}");
    assert_eq!(rig.manager.stats().resumes, 1);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn audio_chunks_play_back_to_back_and_track_speaking() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    let probe = rig.transport.probe(0);
    // 500ms then 300ms of output-rate PCM.
    let first = codec::encode_block(&vec![0.25; 12_000]).data;
    let second = codec::encode_block(&vec![0.25; 7_200]).data;
    probe.events.send(ServerEvent::Audio { data: first }).await.unwrap();
    probe.events.send(ServerEvent::Audio { data: second }).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let scheduled = rig.output.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert!((scheduled[1].start_at - (scheduled[0].start_at + 0.5)).abs() < 1e-9);

    let events = drain(&mut rig.events);
    let speaking: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Speaking(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(speaking, vec![true]);

    // Completion of both buffers ends the speaking window.
    rig.output.complete(scheduled[0].id);
    rig.output.complete(scheduled[1].id);
    sleep(Duration::from_millis(50)).await;
    let speaking: Vec<bool> = drain(&mut rig.events)
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Speaking(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(speaking, vec![false]);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn tool_batch_is_acknowledged_in_order_with_effects() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    let probe = rig.transport.probe(0);
    probe
        .events
        .send(ServerEvent::ToolCalls(vec![
            ToolCallWire {
                id: "a".to_string(),
                name: "signal_mood".to_string(),
                args: json!({"mood": "sad"}),
            },
            ToolCallWire {
                id: "b".to_string(),
                name: "unknown_tool".to_string(),
                args: json!({}),
            },
        ]))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let responses = probe.sent_responses.lock().unwrap().clone();
    let ids: Vec<&str> = responses.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(responses.iter().all(|r| r.result == "ok"));

    let moods: Vec<livelink_voice::Mood> = drain(&mut rig.events)
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Mood(m) => Some(*m),
            _ => None,
        })
        .collect();
    assert_eq!(moods, vec![livelink_voice::Mood::Sad]);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn forgetting_a_profile_clears_identity_and_record() {
    let mut rig = rig(0);
    rig.memory.set(MEMORY_KEY, "VOICE_ID: Asha.").unwrap();
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    let probe = rig.transport.probe(0);
    probe
        .events
        .send(ServerEvent::ToolCalls(vec![ToolCallWire {
            id: "1".to_string(),
            name: "manage_voice_profile".to_string(),
            args: json!({"action": "forget", "userName": "Asha"}),
        }]))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    assert!(rig.memory.get(MEMORY_KEY).unwrap().is_none());
    let identities: Vec<Option<String>> = drain(&mut rig.events)
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Identity(i) => Some(i.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(identities, vec![None]);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn keepalive_goes_out_once_per_idle_window() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    sleep(Duration::from_secs(9)).await;
    let probe = rig.transport.probe(0);
    let keepalives = probe
        .sent_audio
        .lock()
        .unwrap()
        .iter()
        .filter(|d| d.as_str() == codec::KEEPALIVE_DATA)
        .count();
    assert_eq!(keepalives, 1);
    assert_eq!(rig.manager.stats().keepalives_sent, 1);

    // Another full window of silence earns exactly one more.
    sleep(Duration::from_secs(8)).await;
    let keepalives = probe
        .sent_audio
        .lock()
        .unwrap()
        .iter()
        .filter(|d| d.as_str() == codec::KEEPALIVE_DATA)
        .count();
    assert_eq!(keepalives, 2);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn captured_blocks_stream_up_even_when_silent() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    rig.mic.push_block(vec![0.0; 2_048]);
    rig.mic.push_block(vec![0.5; 2_048]);
    sleep(Duration::from_millis(50)).await;

    let probe = rig.transport.probe(0);
    let sent = probe.sent_audio.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(codec::decode_chunk(&sent[0]).unwrap().len(), 2_048);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn grounding_citations_reach_subscribers() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    rig.transport
        .probe(0)
        .events
        .send(ServerEvent::Grounding(vec![Citation {
            title: "Monsoon ragas".to_string(),
            uri: "https://example.com/r".to_string(),
        }]))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let citations: Vec<Vec<Citation>> = drain(&mut rig.events)
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Citations(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0][0].title, "Monsoon ragas");

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_start_is_ignored_and_stop_returns_to_idle() {
    let mut rig = rig(0);
    rig.manager.start();
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.transport.session_count(), 1);

    rig.manager.stop().await;
    let statuses: Vec<SessionStatus> = drain(&mut rig.events)
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Status(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.first(), Some(&SessionStatus::Connecting));
    assert_eq!(statuses.last(), Some(&SessionStatus::Idle));
    // Playback is flushed on the way out.
    assert!(rig.output.stop_count() >= 1);
}

/// A transport whose connect never resolves, like a black-holed endpoint.
struct StalledTransport;

#[async_trait]
impl SessionTransport for StalledTransport {
    async fn connect(
        &self,
        _request: &SessionRequest,
    ) -> EngineResult<(Box<dyn SessionHandle>, mpsc::Receiver<ServerEvent>)> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_an_in_flight_connect() {
    let mut manager = SessionManager::new(
        Arc::new(StalledTransport),
        FakeMic::new(),
        Arc::new(VirtualOutput::new()),
        Arc::new(InMemoryStore::new()),
        Arc::new(FixedLookup::default()),
        SessionConfig::default(),
    );
    manager.start();
    sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), manager.stop())
        .await
        .expect("stop returned while connect was still pending");
}

#[tokio::test(start_paused = true)]
async fn performance_does_not_survive_a_session_drop() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    let first = rig.transport.probe(0);
    first
        .events
        .send(ServerEvent::ToolCalls(vec![ToolCallWire {
            id: "1".to_string(),
            name: "start_performance".to_string(),
            args: json!({"performanceType": "ghazal", "expectedDurationSeconds": 600}),
        }]))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    first
        .events
        .send(ServerEvent::Closed { reason: None })
        .await
        .unwrap();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.transport.session_count(), 2);

    // The resumed session is not mid-performance, so a quiet stretch
    // still earns its keep-alive.
    sleep(Duration::from_secs(10)).await;
    let keepalives = rig
        .transport
        .probe(1)
        .sent_audio
        .lock()
        .unwrap()
        .iter()
        .filter(|d| d.as_str() == codec::KEEPALIVE_DATA)
        .count();
    assert!(keepalives >= 1, "idle monitor stayed suppressed after resume");

    let cleared = drain(&mut rig.events)
        .iter()
        .any(|e| matches!(e, EngineEvent::Performance(None)));
    assert!(cleared);

    rig.manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn undecodable_audio_is_counted_not_fatal() {
    let mut rig = rig(0);
    rig.manager.start();
    sleep(Duration::from_millis(50)).await;

    let probe = rig.transport.probe(0);
    probe
        .events
        .send(ServerEvent::Audio {
            data: "!!not-base64!!".to_string(),
        })
        .await
        .unwrap();
    let good = codec::encode_block(&vec![0.1; 2_400]).data;
    probe.events.send(ServerEvent::Audio { data: good }).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(rig.manager.stats().decode_failures, 1);
    assert_eq!(rig.output.scheduled().len(), 1);
    assert_eq!(rig.transport.session_count(), 1);

    rig.manager.stop().await;
}
