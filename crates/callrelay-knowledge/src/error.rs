use thiserror::Error;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("knowledge service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("knowledge service returned an empty answer")]
    EmptyAnswer,

    #[error("Invalid configuration: {0}")]
    Config(String),
}
