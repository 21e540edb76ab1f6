//! Live session demo — microphone to model and back, end to end.
//!
//! Needs `GEMINI_API_KEY` in the environment (or `.env`), plus working audio
//! devices. Optional overrides: `LIVELINK_MODEL`, `LIVELINK_VOICE`,
//! `LIVELINK_MEMORY_PATH`. Press Ctrl+C to stop.

use livelink_core::{EngineConfig, SledMemoryStore};
use livelink_voice::{
    CpalMic, EngineEvent, RodioOutput, SessionConfig, SessionManager, WsTransport, YoutubeLookup,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::from_env();
    info!(model = %config.model, voice = %config.voice, "starting live session");

    let memory = Arc::new(SledMemoryStore::open(&config.memory_path)?);
    let mut manager = SessionManager::new(
        Arc::new(WsTransport::from_env()?),
        Arc::new(CpalMic),
        Arc::new(RodioOutput),
        memory,
        Arc::new(YoutubeLookup::new()),
        SessionConfig::from_engine(&config),
    );

    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Status(status) => info!("status: {status:?}"),
                EngineEvent::Speaking(speaking) => info!("speaking: {speaking}"),
                EngineEvent::Mood(mood) => info!("mood: {mood:?}"),
                EngineEvent::Identity(Some(name)) => info!("recognized: {name}"),
                EngineEvent::Identity(None) => info!("identity cleared"),
                EngineEvent::Media(Some(media)) => info!("media: {:?} {:?}", media.platform, media.query),
                EngineEvent::Media(None) => info!("media stopped"),
                EngineEvent::Performance(Some(perf)) => {
                    info!("performance: {:?} {}s", perf.kind, perf.total_seconds)
                }
                EngineEvent::Performance(None) => info!("performance over"),
                EngineEvent::Citations(citations) => {
                    for citation in citations {
                        info!("source: {} <{}>", citation.title, citation.uri);
                    }
                }
                EngineEvent::MemorySyncing(syncing) => info!("memory sync: {syncing}"),
            }
        }
    });

    manager.start();
    tokio::signal::ctrl_c().await?;
    info!("stopping");
    manager.stop().await;
    printer.abort();
    Ok(())
}
