use crate::{KnowledgeClient, KnowledgeError, RetrievalContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_KNOWLEDGE_URL: &str = "https://app.customgpt.ai";

/// Longest error body kept in [`KnowledgeError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct MessageRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_persona: Option<&'a str>,
}

#[derive(Deserialize)]
struct MessageResponse {
    data: Option<MessageData>,
}

#[derive(Deserialize)]
struct MessageData {
    openai_response: Option<String>,
}

/// Client for a CustomGPT-compatible conversation API.
///
/// Each query is posted as a message on the conversation named by the
/// session id, so follow-up questions within one call share history.
#[derive(Debug, Clone)]
pub struct HttpKnowledgeClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpKnowledgeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, KnowledgeError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| KnowledgeError::Config(format!("invalid knowledge url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(KnowledgeError::Config(format!(
                "knowledge url cannot carry a path: {}",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("callrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn messages_url(&self, ctx: &RetrievalContext) -> Result<Url, KnowledgeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| KnowledgeError::Config("knowledge url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend([
                "api",
                "v1",
                "projects",
                ctx.project_id.as_str(),
                "conversations",
                ctx.session_id.as_str(),
                "messages",
            ]);
        Ok(url)
    }
}

#[async_trait]
impl KnowledgeClient for HttpKnowledgeClient {
    async fn ask(&self, ctx: &RetrievalContext, query: &str) -> Result<String, KnowledgeError> {
        let url = self.messages_url(ctx)?;
        debug!(project_id = %ctx.project_id, session_id = %ctx.session_id, "querying knowledge service");

        let resp = self
            .client
            .post(url)
            .bearer_auth(&ctx.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&MessageRequest {
                prompt: query,
                custom_persona: ctx.persona.as_deref(),
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(KnowledgeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessageResponse = resp.json().await?;
        parsed
            .data
            .and_then(|d| d.openai_response)
            .map(|answer| answer.trim().to_string())
            .filter(|answer| !answer.is_empty())
            .ok_or(KnowledgeError::EmptyAnswer)
    }
}
