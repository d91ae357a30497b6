//! AI engine boundary for the call relay.
//!
//! Holds everything that speaks the speech engine's event protocol: the
//! media codec adapter between telephony payloads and engine audio, the
//! decode step for inbound event envelopes, the client events the relay
//! sends, the session configuration with its declared function tools, and
//! the websocket connector that opens one engine leg per call.
//!
//! Both legs of a call are exposed to the orchestrator as a [`Link`], a
//! pair of bounded text channels, so the session logic never touches a
//! socket type directly.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod link;
pub mod session;

pub use codec::{AudioFormat, MediaCodec};
pub use config::{RealtimeConfig, TurnDetectionConfig};
pub use engine::{EngineConnector, RealtimeConnector};
pub use error::VoiceError;
pub use events::{ClientEvent, ConversationItem, ServerEvent};
pub use link::Link;
pub use session::{tool_definitions, SessionSettings, ToolDefinition, HANDOFF_TOOL, KNOWLEDGE_TOOL};
