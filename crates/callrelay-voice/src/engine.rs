//! Speech engine connection.

use crate::config::RealtimeConfig;
use crate::error::VoiceError;
use crate::link::{Link, LINK_CAPACITY};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Upper bound on the websocket handshake with the engine.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens one engine leg per call.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self) -> Result<Link, VoiceError>;
}

/// Connects to a realtime speech engine over a websocket.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    config: RealtimeConfig,
}

impl RealtimeConnector {
    pub fn new(config: RealtimeConfig) -> Result<Self, VoiceError> {
        if config.api_key.trim().is_empty() {
            return Err(VoiceError::Config("realtime api key is not set".to_string()));
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl EngineConnector for RealtimeConnector {
    async fn connect(&self) -> Result<Link, VoiceError> {
        let endpoint = self.config.endpoint();
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid engine url: {}", e)))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| VoiceError::Config(format!("invalid api key: {}", e)))?;
        let headers = request.headers_mut();
        headers.insert("Authorization", bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| {
                VoiceError::Connect(format!(
                    "handshake timed out after {} seconds",
                    CONNECT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Connect(e.to_string()))?;

        info!(url = %self.config.url, model = %self.config.model, "connected to speech engine");

        let (mut sink, mut stream) = socket.split();
        let (to_engine_tx, mut to_engine_rx) = mpsc::channel::<String>(LINK_CAPACITY);
        let (from_engine_tx, from_engine_rx) = mpsc::channel::<String>(LINK_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = to_engine_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("engine socket write failed: {}", e);
                    return;
                }
            }
            // The session dropped its sender: close the socket.
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            debug!("engine writer closed");
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if from_engine_tx.send(text.as_str().to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        debug!(len = bytes.len(), "ignoring binary frame from engine");
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "engine closed the socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("engine socket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Link::new(to_engine_tx, from_engine_rx))
    }
}
