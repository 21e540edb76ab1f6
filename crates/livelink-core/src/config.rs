//! Engine configuration: model identity, voice, memory location.
//!
//! Loadable from a TOML file with environment overrides (`LIVELINK_MODEL`,
//! `LIVELINK_VOICE`, `LIVELINK_MEMORY_PATH`), so deployments change behavior
//! without code edits.

use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_model() -> String {
    "gemini-2.5-flash-native-audio-preview-12-2025".to_string()
}

fn default_voice() -> String {
    "Kore".to_string()
}

fn default_memory_path() -> String {
    "./data/livelink_memory".to_string()
}

/// Engine-level configuration shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Remote model identity sent with the connect request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Prebuilt voice name for synthesized output.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Filesystem path of the Sled memory database.
    #[serde(default = "default_memory_path")]
    pub memory_path: String,

    /// System instruction template; `{{USER_MEMORY}}` is replaced at connect.
    #[serde(default)]
    pub persona_template: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            voice: default_voice(),
            memory_path: default_memory_path(),
            persona_template: None,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus `.env` / environment overrides.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("LIVELINK_MODEL") {
            self.model = model;
        }
        if let Ok(voice) = std::env::var("LIVELINK_VOICE") {
            self.voice = voice;
        }
        if let Ok(path) = std::env::var("LIVELINK_MEMORY_PATH") {
            self.memory_path = path;
        }
    }
}

/// Errors loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.model.contains("audio"));
        assert_eq!(config.voice, "Kore");
        assert!(config.persona_template.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("voice = \"Aoede\"").unwrap();
        assert_eq!(config.voice, "Aoede");
        assert_eq!(config.model, default_model());
    }

    #[test]
    fn load_errors_are_nameable_from_the_crate_root() {
        let err = crate::EngineConfig::load("/nonexistent/livelink.toml").unwrap_err();
        assert!(matches!(err, crate::ConfigError::Io(_)));
    }
}
