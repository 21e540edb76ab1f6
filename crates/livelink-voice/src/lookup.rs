//! Media lookup: resolve a free-text query to a playable identifier.
//!
//! Only the `play_media` handler uses this. The YouTube resolver scrapes the
//! public results page for the first video id; Spotify requests carry their
//! own id or none at all.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// Lookup port. `Ok(None)` means the query resolved to nothing playable.
#[async_trait]
pub trait MediaLookup: Send + Sync {
    async fn resolve(&self, query: &str) -> EngineResult<Option<String>>;
}

/// Resolves via the public YouTube results page: first `videoId` wins.
pub struct YoutubeLookup {
    client: reqwest::Client,
    video_id: Regex,
}

impl YoutubeLookup {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            video_id: Regex::new(r#""videoId":"([A-Za-z0-9_-]{11})""#).expect("static regex"),
        }
    }

    /// Extract the first video id from a results page body.
    fn first_video_id(&self, body: &str) -> Option<String> {
        self.video_id
            .captures(body)
            .map(|caps| caps[1].to_string())
    }
}

impl Default for YoutubeLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaLookup for YoutubeLookup {
    async fn resolve(&self, query: &str) -> EngineResult<Option<String>> {
        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencode(query)
        );
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Handler(format!("media lookup request failed: {e}")))?
            .text()
            .await
            .map_err(|e| EngineError::Handler(format!("media lookup body failed: {e}")))?;
        let id = self.first_video_id(&body);
        debug!(query, resolved = ?id, "media lookup");
        Ok(id)
    }
}

/// Placeholder lookup returning a fixed id (or nothing). For tests and
/// offline demos.
#[derive(Debug, Clone, Default)]
pub struct FixedLookup {
    pub id: Option<String>,
}

impl FixedLookup {
    pub fn always(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }
}

#[async_trait]
impl MediaLookup for FixedLookup {
    async fn resolve(&self, _query: &str) -> EngineResult<Option<String>> {
        Ok(self.id.clone())
    }
}

fn urlencode(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for byte in query.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
