//! Call-control webhooks: the incoming-call directive and the post-stream
//! call-status directive.

use crate::api::{ApiError, Xml};
use crate::twiml;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::{header, HeaderMap},
};
use callrelay_types::{CallParameters, TransferDecision};
use serde::Deserialize;
use std::sync::Arc;

/// Query parameters of the incoming-call webhook.
#[derive(Debug, Default, Deserialize)]
pub struct IncomingCallQuery {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub introduction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallStatusQuery {
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Handler for `GET|POST /incoming-call`.
///
/// Allocates a session id and answers with a directive that opens a media
/// stream to `/media-stream/{id}`, carrying the call parameters into the
/// stream's start frame. The caller's number is read from the form field
/// `From` when call-control posts one.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<IncomingCallQuery>,
    body: String,
) -> Result<Xml, ApiError> {
    let host = public_host(&state, &headers)?;
    let caller = url::form_urlencoded::parse(body.as_bytes())
        .find(|(key, _)| key == "From")
        .map(|(_, value)| value.into_owned());

    let parameters = CallParameters {
        project_id: query.project_id,
        api_key: query.api_key,
        phone_number: query.phone_number,
        introduction: query.introduction,
        caller,
    }
    .normalized();

    let session_id = uuid::Uuid::new_v4().to_string();
    let stream_url = format!("wss://{}/media-stream/{}", host, session_id);
    let mut action_url = format!("https://{}/call-status/{}", host, session_id);
    if let Some(number) = &parameters.phone_number {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("phone_number", number)
            .finish();
        action_url.push('?');
        action_url.push_str(&encoded);
    }

    tracing::info!(
        session_id = %session_id,
        caller = ?parameters.caller,
        project_id = ?parameters.project_id,
        "incoming call"
    );

    Ok(Xml(twiml::connect_stream(
        &stream_url,
        &action_url,
        &parameters.pairs(),
    )))
}

/// Handler for `GET|POST /call-status/{sessionId}`.
///
/// Consumes the session's transfer decision. A recorded transfer with a
/// known number dials it; every other case, including a missing decision or
/// a store failure, hangs up.
pub async fn call_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<CallStatusQuery>,
) -> Xml {
    let decision = match state.services.transfers.take(&session_id).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "failed to read transfer decision");
            None
        }
    };
    let number = query
        .phone_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    match (decision, number) {
        (Some(TransferDecision::TransferToHuman), Some(number)) => {
            tracing::info!(session_id = %session_id, "transferring call to a human");
            Xml(twiml::dial(twiml::TRANSFER_NOTICE, number))
        }
        (Some(TransferDecision::TransferToHuman), None) => {
            tracing::warn!(session_id = %session_id, "transfer requested but no number to dial");
            Xml(twiml::hangup())
        }
        (decision, _) => {
            tracing::info!(session_id = %session_id, decision = ?decision, "ending call");
            Xml(twiml::hangup())
        }
    }
}

fn public_host(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(host) = &state.public_host {
        return Ok(host.clone());
    }
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("missing Host header".to_string()))
}
