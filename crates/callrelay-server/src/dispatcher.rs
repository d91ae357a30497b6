//! Function Dispatcher: runs the tools the engine calls mid-conversation.

use crate::error::CallError;
use crate::session::CallContext;
use crate::state::SessionState;
use callrelay_knowledge::{ask_with_retry, KnowledgeClient, RetryPolicy};
use callrelay_voice::{HANDOFF_TOOL, KNOWLEDGE_TOOL};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Function result returned when every retrieval attempt failed.
pub const RETRIEVAL_FALLBACK: &str = "Could not resolve query.";

/// Appended to the fallback once failures pile up and a human is reachable.
pub const HANDOFF_HINT: &str =
    " The knowledge base has not been able to help for several questions in a row; \
offer to transfer the caller to a human agent.";

/// What the session does with a finished dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Send this text back as the function result, then continue the response.
    Output(String),
    /// Hand the call to a human; no function result is sent.
    Handoff { reason: Option<String> },
}

#[derive(Deserialize)]
struct KnowledgeArgs {
    query: String,
}

#[derive(Deserialize, Default)]
struct HandoffArgs {
    #[serde(default)]
    reason: Option<String>,
}

pub struct FunctionDispatcher {
    knowledge: Arc<dyn KnowledgeClient>,
    retry: RetryPolicy,
    max_failures: u32,
}

impl FunctionDispatcher {
    pub fn new(knowledge: Arc<dyn KnowledgeClient>, retry: RetryPolicy, max_failures: u32) -> Self {
        Self {
            knowledge,
            retry,
            max_failures,
        }
    }

    /// Runs tool `name` with its JSON `arguments`.
    ///
    /// Always yields an outcome: failed retrievals become the fallback text,
    /// and unknown tools or unreadable arguments become an explanatory result
    /// so the engine's turn is never left waiting.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: &str,
        ctx: &CallContext,
        state: &SessionState,
    ) -> DispatchOutcome {
        match name {
            KNOWLEDGE_TOOL => self.knowledge_query(arguments, ctx, state).await,
            HANDOFF_TOOL => {
                let args = if arguments.trim().is_empty() {
                    HandoffArgs::default()
                } else {
                    serde_json::from_str(arguments).unwrap_or_else(|e| {
                        warn!(session_id = %ctx.session_id, error = %e, "ignoring unreadable handoff arguments");
                        HandoffArgs::default()
                    })
                };
                info!(session_id = %ctx.session_id, reason = ?args.reason, "engine requested handoff");
                DispatchOutcome::Handoff {
                    reason: args.reason,
                }
            }
            unknown => {
                let err = CallError::Dispatch(format!("unknown function {}", unknown));
                warn!(session_id = %ctx.session_id, error = %err, "answering unknown function call");
                DispatchOutcome::Output(format!(
                    "The function {} is not available. Continue without it.",
                    unknown
                ))
            }
        }
    }

    async fn knowledge_query(
        &self,
        arguments: &str,
        ctx: &CallContext,
        state: &SessionState,
    ) -> DispatchOutcome {
        let query = match serde_json::from_str::<KnowledgeArgs>(arguments) {
            Ok(args) if !args.query.trim().is_empty() => args.query,
            Ok(_) => {
                warn!(session_id = %ctx.session_id, "knowledge query is empty");
                return DispatchOutcome::Output(
                    "No query was provided. Ask the caller to repeat the question.".to_string(),
                );
            }
            Err(e) => {
                let err = CallError::Dispatch(format!("invalid {} arguments: {}", KNOWLEDGE_TOOL, e));
                warn!(session_id = %ctx.session_id, error = %err, "answering malformed function call");
                return DispatchOutcome::Output(
                    "The query could not be read. Ask the caller to repeat the question.".to_string(),
                );
            }
        };

        match ask_with_retry(self.knowledge.as_ref(), &ctx.retrieval, &query, &self.retry).await {
            Ok(answer) => {
                state.reset_failures();
                DispatchOutcome::Output(answer)
            }
            Err(e) => {
                let err = CallError::from(e);
                let streak = state.record_failure();
                warn!(
                    session_id = %ctx.session_id,
                    attempts = self.retry.attempts(),
                    streak,
                    error = %err,
                    "knowledge query failed"
                );
                let mut output = RETRIEVAL_FALLBACK.to_string();
                if streak >= self.max_failures && ctx.transfer_number.is_some() {
                    output.push_str(HANDOFF_HINT);
                }
                DispatchOutcome::Output(output)
            }
        }
    }
}
