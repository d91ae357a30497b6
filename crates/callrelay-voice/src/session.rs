//! Initial session configuration sent to the engine.

use crate::codec::AudioFormat;
use crate::config::RealtimeConfig;
use serde::Serialize;
use serde_json::{json, Value};

/// Function tool that fetches context from the knowledge service.
pub const KNOWLEDGE_TOOL: &str = "get_additional_context";

/// Function tool that hands the call to a human agent.
pub const HANDOFF_TOOL: &str = "request_handoff";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// Function tool schema declared to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Payload of the `session.update` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSettings {
    pub turn_detection: TurnDetection,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub voice: String,
    pub instructions: String,
    pub modalities: Vec<String>,
    pub temperature: f32,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
}

impl SessionSettings {
    pub fn from_config(config: &RealtimeConfig, format: AudioFormat) -> Self {
        let vad = &config.turn_detection;
        Self {
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: vad.threshold,
                prefix_padding_ms: vad.prefix_padding_ms,
                silence_duration_ms: vad.silence_duration_ms,
            },
            input_audio_format: format.engine_name().to_string(),
            output_audio_format: format.engine_name().to_string(),
            voice: config.voice.clone(),
            instructions: config.instructions.clone(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            temperature: config.temperature,
            tools: tool_definitions(),
            tool_choice: "auto".to_string(),
        }
    }
}

/// Schemas for every function tool the relay can dispatch.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            kind: "function".to_string(),
            name: KNOWLEDGE_TOOL.to_string(),
            description: "Get the additional context needed to answer the caller's query."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The caller's question, rewritten as a complete standalone query"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            kind: "function".to_string(),
            name: HANDOFF_TOOL.to_string(),
            description: "Transfer the call to a human agent when the caller asks for one."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Short reason for the transfer"
                    }
                }
            }),
        },
    ]
}
