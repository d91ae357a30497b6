//! Call relay server library logic.

pub mod api;
pub mod api_call;
pub mod api_media;
pub mod background;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod state;
pub mod telephony;
pub mod twiml;
pub mod watchdog;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use session::SessionServices;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collaborators every call session is built from.
    pub services: SessionServices,
    /// Host name used in generated stream and callback URLs; the request's
    /// `Host` header is used when unset.
    pub public_host: Option<String>,
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/incoming-call",
            get(api_call::incoming_call_handler).post(api_call::incoming_call_handler),
        )
        .route(
            "/call-status/{sessionId}",
            get(api_call::call_status_handler).post(api_call::call_status_handler),
        )
        .route(
            "/media-stream/{sessionId}",
            get(api_media::media_stream_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
