use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("engine connection failed: {0}")]
    Connect(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("link closed")]
    LinkClosed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
