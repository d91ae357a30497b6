use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

const DEFAULT_INSTRUCTIONS: &str = "You are a friendly phone assistant that answers callers using \
only the information returned by the get_additional_context function. \
For every caller question, call get_additional_context with the question rephrased as a \
complete, self-contained query before you answer. \
Do not rely on your own knowledge. \
If get_additional_context says it cannot answer, reply only with: \
'Sorry! I can't provide an answer to your question.' \
Keep answers short and conversational, and never mention the function itself. \
If the caller asks to speak to a person, call request_handoff.";

fn default_url() -> String {
    DEFAULT_REALTIME_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_REALTIME_MODEL.to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_temperature() -> f32 {
    0.6
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

/// Server-side voice activity detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

fn default_threshold() -> f32 {
    0.6
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    500
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

/// Connection and conversation settings for the speech engine.
#[derive(Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// System instructions sent with the initial session configuration.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default)]
    pub turn_detection: TurnDetectionConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            model: default_model(),
            api_key: String::new(),
            voice: default_voice(),
            temperature: default_temperature(),
            instructions: default_instructions(),
            turn_detection: TurnDetectionConfig::default(),
        }
    }
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("voice", &self.voice)
            .field("temperature", &self.temperature)
            .field("turn_detection", &self.turn_detection)
            .finish()
    }
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Returns the websocket endpoint with the model selected.
    ///
    /// A URL that already names a model is used as-is.
    pub fn endpoint(&self) -> String {
        if self.url.contains("model=") || self.model.is_empty() {
            self.url.clone()
        } else if self.url.contains('?') {
            format!("{}&model={}", self.url, self.model)
        } else {
            format!("{}?model={}", self.url, self.model)
        }
    }
}
