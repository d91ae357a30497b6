//! Knowledge-retrieval collaborator used by the `get_additional_context` tool.
//!
//! A [`KnowledgeClient`] answers one query for one call. Everything that
//! identifies the caller's knowledge base travels in a [`RetrievalContext`]
//! built per session, so two calls with different credentials never share
//! client state.

pub mod error;
pub mod http;
pub mod retry;

pub use error::KnowledgeError;
pub use http::HttpKnowledgeClient;
pub use retry::{ask_with_retry, with_retry, RetryPolicy};

use async_trait::async_trait;
use std::fmt;

/// Per-call identity presented to the knowledge service.
#[derive(Clone, PartialEq, Eq)]
pub struct RetrievalContext {
    pub project_id: String,
    /// Conversation key on the knowledge service side; the call's session id.
    pub session_id: String,
    pub api_key: String,
    pub persona: Option<String>,
}

impl fmt::Debug for RetrievalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalContext")
            .field("project_id", &self.project_id)
            .field("session_id", &self.session_id)
            .field("api_key", &"[REDACTED]")
            .field("persona", &self.persona)
            .finish()
    }
}

#[async_trait]
pub trait KnowledgeClient: Send + Sync {
    /// Returns the answer text for `query`, or an error if no usable answer came back.
    async fn ask(&self, ctx: &RetrievalContext, query: &str) -> Result<String, KnowledgeError>;
}
