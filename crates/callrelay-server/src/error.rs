use callrelay_knowledge::KnowledgeError;
use callrelay_voice::VoiceError;
use thiserror::Error;

/// Failure conditions of a call session.
///
/// Only `Configuration` and a failed engine connection end a call before it
/// is relayed; everything else is logged and the session degrades toward
/// draining.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream disconnected: {0}")]
    UpstreamDisconnect(String),

    #[error("retrieval failed: {0}")]
    RetrievalFailure(#[from] KnowledgeError),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),
}

impl From<VoiceError> for CallError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Connect(msg) => Self::UpstreamDisconnect(msg),
            VoiceError::LinkClosed => Self::UpstreamDisconnect("link closed".to_string()),
            VoiceError::Config(msg) => Self::Configuration(msg),
            VoiceError::MalformedEnvelope(msg) | VoiceError::Codec(msg) => {
                Self::MalformedEnvelope(msg)
            }
            VoiceError::Encode(e) => Self::MalformedEnvelope(e.to_string()),
        }
    }
}
