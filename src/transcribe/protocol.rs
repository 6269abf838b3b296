// Wire messages for the transcription service.
//
// One JSON message per line item: a configuration handshake sent right
// after connect, then one append per converted audio buffer. Inbound events
// arrive as tagged JSON objects on the same socket.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Session configuration handshake, sent once per connection immediately
/// after open.
#[derive(Debug, Serialize)]
pub struct SessionUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub session: SessionSettings,
}

#[derive(Debug, Serialize)]
pub struct SessionSettings {
    pub input_audio_format: String,
    pub input_audio_transcription: TranscriptionSettings,
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl SessionUpdate {
    pub fn new(model: &str, language: &str) -> Self {
        Self {
            kind: "transcription_session.update".to_string(),
            session: SessionSettings {
                input_audio_format: "pcm16".to_string(),
                input_audio_transcription: TranscriptionSettings {
                    model: model.to_string(),
                    language: language.to_string(),
                },
                turn_detection: TurnDetection {
                    kind: "server_vad".to_string(),
                    threshold: 0.5,
                    prefix_padding_ms: 300,
                    silence_duration_ms: 200,
                },
            },
        }
    }
}

/// One converted audio buffer, base64-encoded PCM16 mono.
#[derive(Debug, Serialize)]
pub struct AudioAppend {
    #[serde(rename = "type")]
    pub kind: String,
    pub audio: String,
}

impl AudioAppend {
    pub fn new(pcm: &[u8]) -> Self {
        Self {
            kind: "input_audio_buffer.append".to_string(),
            audio: base64::engine::general_purpose::STANDARD.encode(pcm),
        }
    }
}

/// Events the transcription service pushes over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    Delta { delta: String },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    Completed { transcript: String },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    Failed {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated { rate_limits: Vec<RateLimit> },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    pub name: String,
    pub remaining: u64,
    pub limit: u64,
}

/// How an inbound `error` event affects the channel.
#[derive(Debug, PartialEq)]
pub enum ErrorClass {
    /// Session-expiry-equivalent: renew silently, keep capturing.
    Expired,
    /// Stops the whole capture session.
    Fatal(CaptureError),
    /// Logged, nothing else.
    Ignorable,
}

/// Classify a service `error` event. This is the single place protocol
/// error codes are interpreted.
pub fn classify_error(code: Option<&str>, message: Option<&str>) -> ErrorClass {
    let code = code.unwrap_or("");
    let message = message.unwrap_or("");

    if code == "session_expired" || message.contains("expired") {
        return ErrorClass::Expired;
    }
    if code == "invalid_api_key" || code.contains("auth") {
        return ErrorClass::Fatal(CaptureError::AuthenticationFailed(message.to_string()));
    }
    if code == "insufficient_quota" {
        return ErrorClass::Fatal(CaptureError::InsufficientQuota(message.to_string()));
    }
    if code.contains("rate_limit") {
        return ErrorClass::Fatal(CaptureError::RateLimited(message.to_string()));
    }

    ErrorClass::Ignorable
}
