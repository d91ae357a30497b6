//! Engine event protocol.
//!
//! Inbound envelopes are decoded into a closed [`ServerEvent`] variant at the
//! stream boundary. Kinds the relay does not act on land in
//! [`ServerEvent::Informational`] so a new engine event is logged rather than
//! silently matched against nothing.

use crate::error::VoiceError;
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds worth logging at info level when they arrive.
pub const LOGGED_EVENT_KINDS: &[&str] = &[
    "response.content.done",
    "rate_limits.updated",
    "response.done",
    "input_audio_buffer.committed",
    "input_audio_buffer.speech_stopped",
    "input_audio_buffer.speech_started",
    "session.created",
    "session.updated",
];

/// Decoded event received from the speech engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The engine's turn detection heard the caller start speaking.
    SpeechStarted { item_id: Option<String> },
    /// A chunk of synthesized speech (base64 audio).
    AudioDelta {
        response_id: Option<String>,
        delta: String,
    },
    /// The engine finished (or cancelled) a response.
    ResponseDone { response_id: Option<String> },
    /// `session.created` or `session.updated`.
    SessionAcknowledged { kind: String },
    /// The engine asks the relay to run a function tool.
    FunctionCallRequested {
        name: String,
        call_id: String,
        arguments: String,
    },
    /// The engine reported a protocol or processing error.
    Error { message: String },
    /// Any other kind; logged only.
    Informational { kind: String },
}

#[derive(Deserialize)]
struct FunctionCallDone {
    name: String,
    call_id: String,
    #[serde(default)]
    arguments: String,
}

impl ServerEvent {
    /// Decodes one text frame from the engine.
    pub fn decode(text: &str) -> Result<Self, VoiceError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| VoiceError::MalformedEnvelope(format!("invalid json: {}", e)))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| VoiceError::MalformedEnvelope("missing event type".to_string()))?;

        match kind.as_str() {
            "input_audio_buffer.speech_started" => Ok(Self::SpeechStarted {
                item_id: string_field(&value, "item_id"),
            }),
            "response.audio.delta" => {
                let delta = string_field(&value, "delta")
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| {
                        VoiceError::MalformedEnvelope("audio delta without payload".to_string())
                    })?;
                Ok(Self::AudioDelta {
                    response_id: string_field(&value, "response_id"),
                    delta,
                })
            }
            "response.done" => Ok(Self::ResponseDone {
                response_id: value
                    .get("response")
                    .and_then(|r| r.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            "session.created" | "session.updated" => Ok(Self::SessionAcknowledged {
                kind: kind.clone(),
            }),
            "response.function_call_arguments.done" => {
                let done: FunctionCallDone = serde_json::from_value(value).map_err(|e| {
                    VoiceError::MalformedEnvelope(format!("invalid function call: {}", e))
                })?;
                Ok(Self::FunctionCallRequested {
                    name: done.name,
                    call_id: done.call_id,
                    arguments: done.arguments,
                })
            }
            "error" => Ok(Self::Error {
                message: value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified engine error")
                    .to_string(),
            }),
            _ => Ok(Self::Informational { kind: kind.clone() }),
        }
    }

    /// Returns the engine's name for this event.
    pub fn kind(&self) -> &str {
        match self {
            Self::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::AudioDelta { .. } => "response.audio.delta",
            Self::ResponseDone { .. } => "response.done",
            Self::SessionAcknowledged { kind } | Self::Informational { kind } => kind,
            Self::FunctionCallRequested { .. } => "response.function_call_arguments.done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_logged(&self) -> bool {
        LOGGED_EVENT_KINDS.contains(&self.kind())
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Event sent from the relay to the speech engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

/// Item inserted into the engine's conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
    Message { role: String, content: Vec<ContentPart> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

impl ClientEvent {
    /// Result of a function call, keyed by the engine's call id.
    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    /// A user-role text message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::Message {
                role: "user".to_string(),
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    pub fn to_json(&self) -> Result<String, VoiceError> {
        Ok(serde_json::to_string(self)?)
    }
}
