//! Media-stream websocket endpoint.

use crate::api::ApiError;
use crate::session;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, Path, WebSocketUpgrade,
    },
    response::Response,
};
use callrelay_voice::link::LINK_CAPACITY;
use callrelay_voice::Link;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// How long the writer may take to flush and close after the session ends.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Handler for `GET /media-stream/{sessionId}`.
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session_id = uuid::Uuid::parse_str(&session_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid session id: {}", session_id)))?
        .to_string();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session_id)))
}

/// Bridges the socket to a [`Link`] and runs the call over it.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (session_side, bridge_side) = Link::pair(LINK_CAPACITY);
    let (inbound_tx, mut outbound_rx) = bridge_side.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        // The session dropped its sender: close the telephony leg.
        if sender.send(Message::Close(None)).await.is_ok() {
            let _ = sender.close().await;
        }
    });

    let reader_session = session_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(session_id = %reader_session, error = %e, "telephony socket error");
                    break;
                }
            }
        }
    });

    match session::run_call(session_id.clone(), session_side, state.services.clone()).await {
        Ok(outcome) => tracing::info!(
            session_id = %outcome.session_id,
            reason = %outcome.reason,
            decision = %outcome.decision,
            "call finished"
        ),
        Err(e) => tracing::warn!(session_id = %session_id, error = %e, "call ended without relaying"),
    }

    reader.abort();
    if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
        tracing::debug!(session_id = %session_id, "telephony socket did not close in time");
    }
}
