//! The tool contract: six declared tools, typed end to end.
//!
//! Dispatch is an exhaustive match over `ToolCall`, not string branching; a
//! name outside the contract parses to `Unknown` and is acknowledged without
//! side effects, because the remote side blocks on a response for every id.

use crate::transport::ToolCallWire;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Voice-profile memory action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileAction {
    Save,
    Update,
    Forget,
}

/// Media platform for `play_media`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaPlatform {
    Youtube,
    Spotify,
}

/// Playback control for `control_media`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaAction {
    Pause,
    Resume,
    Skip,
    VolumeUp,
    VolumeDown,
}

/// Conversation mood signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Romantic,
    Sad,
    Inspirational,
    Funny,
    Excited,
    Anxious,
    Frustrated,
    #[default]
    Default,
}

/// Timed live performance kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceKind {
    Shayari,
    Ghazal,
    Singing,
    Teaching,
}

#[derive(Debug, Clone, Deserialize)]
struct SyncMemoryArgs {
    updated_summary: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceProfileArgs {
    action: ProfileAction,
    user_name: String,
    #[serde(default)]
    profile_details: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayMediaArgs {
    query: String,
    platform: MediaPlatform,
    #[serde(default)]
    media_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ControlMediaArgs {
    action: MediaAction,
}

#[derive(Debug, Clone, Deserialize)]
struct SignalMoodArgs {
    mood: Mood,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPerformanceArgs {
    performance_type: PerformanceKind,
    #[serde(default)]
    artist_name: Option<String>,
    expected_duration_seconds: u32,
}

/// A parsed tool call. `id` stays alongside in [`ParsedCall`].
#[derive(Debug, Clone)]
pub enum ToolCall {
    SyncMemory {
        updated_summary: String,
    },
    ManageVoiceProfile {
        action: ProfileAction,
        user_name: String,
        profile_details: Option<String>,
    },
    PlayMedia {
        query: String,
        platform: MediaPlatform,
        media_id: Option<String>,
    },
    ControlMedia {
        action: MediaAction,
    },
    SignalMood {
        mood: Mood,
    },
    StartPerformance {
        kind: PerformanceKind,
        artist: Option<String>,
        duration_seconds: u32,
    },
    /// Outside the contract. Acknowledged, never acted on.
    Unknown {
        name: String,
    },
}

/// A wire call with its typed payload (or the parse failure).
#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub id: String,
    pub name: String,
    pub call: Result<ToolCall, String>,
}

/// Parse a wire call into the typed contract. Unknown names succeed as
/// `ToolCall::Unknown`; malformed arguments for a known name are a parse
/// error (handled like any handler fault: logged, still acknowledged).
pub fn parse_call(wire: &ToolCallWire) -> ParsedCall {
    let args = wire.args.clone();
    let call = match wire.name.as_str() {
        "sync_memory" => serde_json::from_value::<SyncMemoryArgs>(args)
            .map(|a| ToolCall::SyncMemory {
                updated_summary: a.updated_summary,
            })
            .map_err(|e| e.to_string()),
        "manage_voice_profile" => serde_json::from_value::<VoiceProfileArgs>(args)
            .map(|a| ToolCall::ManageVoiceProfile {
                action: a.action,
                user_name: a.user_name,
                profile_details: a.profile_details,
            })
            .map_err(|e| e.to_string()),
        "play_media" => serde_json::from_value::<PlayMediaArgs>(args)
            .map(|a| ToolCall::PlayMedia {
                query: a.query,
                platform: a.platform,
                media_id: a.media_id,
            })
            .map_err(|e| e.to_string()),
        "control_media" => serde_json::from_value::<ControlMediaArgs>(args)
            .map(|a| ToolCall::ControlMedia { action: a.action })
            .map_err(|e| e.to_string()),
        "signal_mood" => serde_json::from_value::<SignalMoodArgs>(args)
            .map(|a| ToolCall::SignalMood { mood: a.mood })
            .map_err(|e| e.to_string()),
        "start_performance" => serde_json::from_value::<StartPerformanceArgs>(args)
            .map(|a| ToolCall::StartPerformance {
                kind: a.performance_type,
                artist: a.artist_name,
                duration_seconds: a.expected_duration_seconds,
            })
            .map_err(|e| e.to_string()),
        _ => Ok(ToolCall::Unknown {
            name: wire.name.clone(),
        }),
    };
    ParsedCall {
        id: wire.id.clone(),
        name: wire.name.clone(),
        call,
    }
}

/// Acknowledgment sent back for every call id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub result: String,
}

impl ToolResponse {
    /// The generic success ack; the remote side only needs the id answered.
    pub fn ack(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            result: "ok".to_string(),
        }
    }
}

/// The fixed, versioned declarations sent with each connect request.
pub fn declarations() -> Value {
    json!([
        {
            "functionDeclarations": [
                {
                    "name": "sync_memory",
                    "description": "Store details from this conversation in the persistent archive.",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "updated_summary": {
                                "type": "STRING",
                                "description": "Updated summary of the user's life status and this chat."
                            }
                        },
                        "required": ["updated_summary"]
                    }
                },
                {
                    "name": "manage_voice_profile",
                    "description": "Save, update, or forget a voice identity.",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "action": { "type": "STRING", "enum": ["save", "update", "forget"] },
                            "userName": { "type": "STRING" },
                            "profileDetails": { "type": "STRING" }
                        },
                        "required": ["action", "userName"]
                    }
                },
                {
                    "name": "play_media",
                    "description": "Play a song on YouTube or Spotify.",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "query": { "type": "STRING" },
                            "platform": { "type": "STRING", "enum": ["youtube", "spotify"] },
                            "mediaId": { "type": "STRING" }
                        },
                        "required": ["query", "platform"]
                    }
                },
                {
                    "name": "control_media",
                    "description": "Control current media playback.",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "action": {
                                "type": "STRING",
                                "enum": ["pause", "resume", "skip", "volume_up", "volume_down"]
                            }
                        },
                        "required": ["action"]
                    }
                },
                {
                    "name": "signal_mood",
                    "description": "Signal the conversation mood.",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "mood": {
                                "type": "STRING",
                                "enum": ["romantic", "sad", "inspirational", "funny", "excited", "anxious", "frustrated", "default"]
                            }
                        },
                        "required": ["mood"]
                    }
                },
                {
                    "name": "start_performance",
                    "description": "Start a timed live performance (shayari, ghazal, singing, teaching).",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "performanceType": {
                                "type": "STRING",
                                "enum": ["shayari", "ghazal", "singing", "teaching"]
                            },
                            "artistName": { "type": "STRING" },
                            "expectedDurationSeconds": { "type": "NUMBER" }
                        },
                        "required": ["performanceType", "expectedDurationSeconds"]
                    }
                }
            ]
        },
        { "googleSearch": {} }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(name: &str, args: Value) -> ToolCallWire {
        ToolCallWire {
            id: "call-1".to_string(),
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn parses_all_declared_tools() {
        let cases = vec![
            wire("sync_memory", json!({"updated_summary": "s"})),
            wire(
                "manage_voice_profile",
                json!({"action": "save", "userName": "Asha", "profileDetails": "tea"}),
            ),
            wire("play_media", json!({"query": "q", "platform": "spotify"})),
            wire("control_media", json!({"action": "volume_up"})),
            wire("signal_mood", json!({"mood": "excited"})),
            wire(
                "start_performance",
                json!({"performanceType": "ghazal", "expectedDurationSeconds": 90}),
            ),
        ];
        for case in cases {
            let parsed = parse_call(&case);
            assert!(parsed.call.is_ok(), "{} failed: {:?}", case.name, parsed.call);
        }
    }

    #[test]
    fn unknown_name_parses_to_unknown() {
        let parsed = parse_call(&wire("telepathy", json!({})));
        assert!(matches!(parsed.call, Ok(ToolCall::Unknown { ref name }) if name == "telepathy"));
    }

    #[test]
    fn malformed_args_are_a_parse_error_not_unknown() {
        let parsed = parse_call(&wire("signal_mood", json!({"mood": "gloomy"})));
        assert!(parsed.call.is_err());
        assert_eq!(parsed.name, "signal_mood");
    }

    #[test]
    fn optional_fields_default() {
        let parsed = parse_call(&wire(
            "play_media",
            json!({"query": "monsoon song", "platform": "youtube"}),
        ));
        match parsed.call.unwrap() {
            ToolCall::PlayMedia { media_id, .. } => assert!(media_id.is_none()),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn declarations_cover_the_contract() {
        let decls = declarations();
        let names: Vec<&str> = decls[0]["functionDeclarations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "sync_memory",
                "manage_voice_profile",
                "play_media",
                "control_media",
                "signal_mood",
                "start_performance"
            ]
        );
    }
}
