//! Session manager: the single-consumer event loop and reconnect policy.
//!
//! One task owns the session end to end. Every state mutation happens inside
//! its `select!` loop, so captured audio, inbound server traffic, playback
//! completions, idle ticks, and performance ticks never race. The loop runs
//! until stopped: a failed connect retries after the connect backoff, a
//! dropped session resumes after the shorter resume backoff, forever.

use crate::activity::ActivityClock;
use crate::capture::{has_voice, CaptureConfig, MicSource};
use crate::codec::{encode_block, EncodedChunk};
use crate::dispatch::ToolDispatcher;
use crate::error::EngineResult;
use crate::idle::{should_send_keepalive, IdleConfig};
use crate::lookup::MediaLookup;
use crate::performance::PERFORMANCE_TICK;
use crate::playback::{OutputDevice, PlaybackScheduler};
use crate::state::{EngineEvent, SessionStatus, StateTracker};
use crate::tools;
use crate::transport::{ServerEvent, SessionRequest, SessionTransport};
use livelink_core::{EngineConfig, MemoryStore, PersonaTemplate, MEMORY_KEY};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Reconnect timing. Nothing is fatal: both paths retry forever.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before retrying a connect that never established (default 4s).
    pub connect_backoff: Duration,

    /// Delay before resuming after an established session dropped
    /// (default 1.2s).
    pub resume_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            connect_backoff: Duration::from_secs(4),
            resume_backoff: Duration::from_millis(1_200),
        }
    }
}

/// Everything the session loop needs that is policy, not plumbing.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub persona: PersonaTemplate,
    pub reconnect: ReconnectConfig,
    pub capture: CaptureConfig,
    pub idle: IdleConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            model: engine.model,
            voice: engine.voice,
            persona: PersonaTemplate::default(),
            reconnect: ReconnectConfig::default(),
            capture: CaptureConfig::default(),
            idle: IdleConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Session policy from loaded engine configuration.
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            persona: config
                .persona_template
                .as_deref()
                .map(PersonaTemplate::new)
                .unwrap_or_default(),
            ..Self::default()
        }
    }
}

/// Counters exposed for diagnostics; written only by the session task.
#[derive(Debug, Default)]
struct StatsInner {
    connect_attempts: AtomicU64,
    sessions_opened: AtomicU64,
    resumes: AtomicU64,
    decode_failures: AtomicU64,
    keepalives_sent: AtomicU64,
}

/// A point-in-time snapshot of session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub connect_attempts: u64,
    pub sessions_opened: u64,
    pub resumes: u64,
    pub decode_failures: u64,
    pub keepalives_sent: u64,
}

impl StatsInner {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
        }
    }
}

/// Why one session attempt ended.
enum SessionEnd {
    Stopped,
    Dropped,
    /// Device acquisition failed before the session was established;
    /// retried on the connect backoff like any failed connect.
    ConnectFailed,
}

/// Owns the background session task. `start` spawns it, `stop` signals and
/// joins it; a second `start` while running is ignored.
pub struct SessionManager {
    transport: Arc<dyn SessionTransport>,
    mic: Arc<dyn MicSource>,
    output: Arc<dyn OutputDevice>,
    memory: Arc<dyn MemoryStore>,
    lookup: Arc<dyn MediaLookup>,
    config: SessionConfig,
    events: broadcast::Sender<EngineEvent>,
    stats: Arc<StatsInner>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        mic: Arc<dyn MicSource>,
        output: Arc<dyn OutputDevice>,
        memory: Arc<dyn MemoryStore>,
        lookup: Arc<dyn MediaLookup>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            mic,
            output,
            memory,
            lookup,
            config,
            events,
            stats: Arc::new(StatsInner::default()),
            shutdown,
            task: None,
        }
    }

    /// Subscribe to state-change events. Safe before and after `start`.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Spawn the session task. A duplicate call while running is a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            debug!("session already running, start ignored");
            return;
        }
        let _ = self.shutdown.send(false);
        let loop_ctx = SessionLoop {
            transport: self.transport.clone(),
            mic: self.mic.clone(),
            output: self.output.clone(),
            memory: self.memory.clone(),
            lookup: self.lookup.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
            shutdown: self.shutdown.subscribe(),
            state: StateTracker::new(self.events.clone()),
        };
        self.task = Some(tokio::spawn(loop_ctx.run()));
    }

    /// Signal shutdown and wait for the task to finish. Idempotent.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("session task ended abnormally: {e}");
            }
        }
    }
}

struct SessionLoop {
    transport: Arc<dyn SessionTransport>,
    mic: Arc<dyn MicSource>,
    output: Arc<dyn OutputDevice>,
    memory: Arc<dyn MemoryStore>,
    lookup: Arc<dyn MediaLookup>,
    config: SessionConfig,
    stats: Arc<StatsInner>,
    shutdown: watch::Receiver<bool>,
    state: StateTracker,
}

impl SessionLoop {
    async fn run(mut self) {
        let dispatcher = ToolDispatcher::new(self.memory.clone(), self.lookup.clone());
        let mut first_attempt = true;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.state.set_status(if first_attempt {
                SessionStatus::Connecting
            } else {
                SessionStatus::Recalibrating
            });

            self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
            let request = self.build_request();
            // Stop must win even against a transport that never resolves.
            let connected = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                result = self.transport.connect(&request) => result,
            };
            match connected {
                Err(e) => {
                    warn!("connect failed: {e}");
                    first_attempt = false;
                    if self.backoff(self.config.reconnect.connect_backoff).await {
                        break;
                    }
                }
                Ok((handle, events)) => {
                    let resume = !first_attempt;
                    first_attempt = false;
                    let end = self.drive(handle, events, &dispatcher, resume).await;
                    self.state.set_speaking(false);

                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::ConnectFailed => {
                            self.state.set_status(SessionStatus::Recalibrating);
                            if self.backoff(self.config.reconnect.connect_backoff).await {
                                break;
                            }
                        }
                        SessionEnd::Dropped => {
                            info!("session dropped, resuming");
                            self.state.set_status(SessionStatus::Recalibrating);
                            if self.backoff(self.config.reconnect.resume_backoff).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.state.set_status(SessionStatus::Closing);
        self.state.clear_session_state();
        self.state.set_status(SessionStatus::Idle);
    }

    /// Sleep unless shutdown arrives first. Returns true on shutdown.
    /// A dropped shutdown sender means the manager is gone; treat as stop.
    async fn backoff(&mut self, delay: Duration) -> bool {
        tokio::select! {
            changed = self.shutdown.changed() => {
                changed.is_err() || *self.shutdown.borrow()
            }
            _ = sleep(delay) => false,
        }
    }

    fn build_request(&self) -> SessionRequest {
        let memory = match self.memory.get(MEMORY_KEY) {
            Ok(value) => value,
            Err(e) => {
                warn!("memory read failed, connecting without it: {e}");
                None
            }
        };
        SessionRequest {
            model: self.config.model.clone(),
            system_instruction: self.config.persona.render(memory.as_deref()),
            voice: self.config.voice.clone(),
            tool_declarations: tools::declarations(),
        }
    }

    /// Acquire devices and drive one session until it drops or we are
    /// stopped. The session counts as established only once the devices
    /// are held.
    async fn drive(
        &mut self,
        mut handle: Box<dyn crate::transport::SessionHandle>,
        mut server_rx: mpsc::Receiver<ServerEvent>,
        dispatcher: &ToolDispatcher,
        resume: bool,
    ) -> SessionEnd {
        let (block_tx, mut block_rx) = mpsc::unbounded_channel();
        let _mic = match self.mic.open(&self.config.capture, block_tx) {
            Ok(mic) => mic,
            Err(e) => {
                warn!("microphone open failed: {e}");
                handle.close().await;
                return SessionEnd::ConnectFailed;
            }
        };
        let (port, mut done_rx) = match self.output.open() {
            Ok(opened) => opened,
            Err(e) => {
                warn!("audio output open failed: {e}");
                handle.close().await;
                return SessionEnd::ConnectFailed;
            }
        };
        let mut scheduler = PlaybackScheduler::new(port);

        self.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);
        if resume {
            self.stats.resumes.fetch_add(1, Ordering::Relaxed);
        }
        self.state.set_status(SessionStatus::Open);

        // Session-scoped state starts fresh: the countdown of a previous
        // session's performance died with it.
        if self.state.performance().is_some() {
            self.state.set_performance(None);
        }
        let mut activity = ActivityClock::new();
        let mut idle_tick = interval(self.config.idle.tick);
        idle_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut perf_tick: Option<Interval> = None;

        let end = loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break SessionEnd::Stopped;
                    }
                }
                block = block_rx.recv() => {
                    let Some(block) = block else {
                        warn!("capture stream ended");
                        break SessionEnd::Dropped;
                    };
                    if has_voice(&block.samples, self.config.capture.voice_threshold) {
                        activity.touch();
                    }
                    // Silence is streamed too; the service runs its own VAD.
                    if let Err(e) = handle.send_audio(&encode_block(&block.samples)).await {
                        warn!("audio send failed: {e}");
                        break SessionEnd::Dropped;
                    }
                }
                event = server_rx.recv() => {
                    match event {
                        Some(ServerEvent::Audio { data }) => {
                            match scheduler.handle_chunk(&data) {
                                Ok(_) => {
                                    activity.touch();
                                    self.state.set_speaking(true)
                                }
                                Err(e) => {
                                    self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                                    warn!("audio chunk dropped: {e}");
                                }
                            }
                        }
                        Some(ServerEvent::ToolCalls(calls)) => {
                            activity.touch();
                            let responses = dispatcher
                                .dispatch_batch(&calls, &mut self.state)
                                .await;
                            if let Err(e) = self.send_responses(&mut handle, responses).await {
                                warn!("tool response send failed: {e}");
                                break SessionEnd::Dropped;
                            }
                            self.arm_performance_tick(&mut perf_tick);
                        }
                        Some(ServerEvent::Grounding(citations)) => {
                            self.state.set_citations(citations);
                        }
                        Some(ServerEvent::Closed { reason }) => {
                            info!(reason = ?reason, "session closed by remote");
                            break SessionEnd::Dropped;
                        }
                        None => break SessionEnd::Dropped,
                    }
                }
                done = done_rx.recv() => {
                    match done {
                        Some(id) => {
                            activity.touch();
                            if scheduler.buffer_done(id) {
                                self.state.set_speaking(false);
                            }
                        }
                        None => break SessionEnd::Dropped,
                    }
                }
                _ = idle_tick.tick() => {
                    let idle_for = activity.idle_for();
                    if should_send_keepalive(
                        &self.config.idle,
                        idle_for,
                        self.state.is_speaking(),
                        self.state.media_or_performance_active(),
                    ) {
                        if let Err(e) = handle.send_audio(&EncodedChunk::keepalive()).await {
                            warn!("keep-alive send failed: {e}");
                            break SessionEnd::Dropped;
                        }
                        self.stats.keepalives_sent.fetch_add(1, Ordering::Relaxed);
                        debug!(idle_ms = idle_for.as_millis() as u64, "keep-alive sent");
                        activity.touch();
                    }
                }
                _ = async { perf_tick.as_mut().unwrap().tick().await }, if perf_tick.is_some() => {
                    self.tick_performance(&mut perf_tick);
                }
            }
        };

        scheduler.stop_all();
        handle.close().await;
        end
    }

    async fn send_responses(
        &mut self,
        handle: &mut Box<dyn crate::transport::SessionHandle>,
        responses: Vec<tools::ToolResponse>,
    ) -> EngineResult<()> {
        for response in responses {
            handle.send_tool_response(&response).await?;
        }
        Ok(())
    }

    fn arm_performance_tick(&self, perf_tick: &mut Option<Interval>) {
        let active = self
            .state
            .performance()
            .map(|p| p.active)
            .unwrap_or(false);
        if active && perf_tick.is_none() {
            let mut tick = interval(PERFORMANCE_TICK);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // A fresh interval fires immediately; reset so the first tick
            // lands one full period after the start call.
            tick.reset();
            *perf_tick = Some(tick);
        } else if !active {
            *perf_tick = None;
        }
    }

    fn tick_performance(&mut self, perf_tick: &mut Option<Interval>) {
        let Some(mut perf) = self.state.performance().cloned() else {
            *perf_tick = None;
            return;
        };
        let still_active = perf.tick();
        self.state.set_performance(Some(perf));
        if !still_active {
            *perf_tick = None;
        }
    }
}
