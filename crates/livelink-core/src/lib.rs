//! livelink-core: shared foundation for the livelink voice companion.
//!
//! Holds the pieces the session engine depends on but that outlive any single
//! session: the persisted long-term memory record, engine configuration, and
//! persona (system instruction) assembly with memory injection.

mod config;
mod memory;
mod persona;

pub use config::{ConfigError, EngineConfig};
pub use memory::{InMemoryStore, MemoryError, MemoryStore, SledMemoryStore, LAST_SYNC_KEY, MEMORY_KEY};
pub use persona::{PersonaTemplate, DEFAULT_EMPTY_MEMORY, MEMORY_PLACEHOLDER};
