//! Call relay server binary.
//!
//! Starts an axum HTTP server with structured logging, the transfer decision
//! store, and graceful shutdown on SIGTERM/SIGINT.

use callrelay_knowledge::HttpKnowledgeClient;
use callrelay_server::config::{self, TransferBackend};
use callrelay_server::session::{CallSettings, SessionServices};
use callrelay_server::{app, background, AppState};
use callrelay_transfer::{MemoryTransferStore, SqliteTransferStore, StoreSettings, TransferStore};
use callrelay_voice::RealtimeConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLRELAY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let engine = RealtimeConnector::new(config.realtime.clone())
        .expect("speech engine is not configured: set realtime.api_key or OPENAI_API_KEY");

    let knowledge = HttpKnowledgeClient::new(
        &config.knowledge.base_url,
        Duration::from_secs(config.knowledge.timeout_secs),
    )
    .expect("failed to build knowledge client: check knowledge.base_url");

    let transfers: Arc<dyn TransferStore> = match config.transfer.backend {
        TransferBackend::Sqlite => Arc::new(
            SqliteTransferStore::open(
                &config.transfer.database_path,
                StoreSettings {
                    busy_timeout_ms: config.transfer.busy_timeout_ms,
                    pool_max_size: config.transfer.pool_max_size,
                },
            )
            .expect("failed to open transfer store: check transfer.database_path"),
        ),
        TransferBackend::Memory => {
            tracing::warn!("transfer decisions are kept in memory and lost on restart");
            Arc::new(MemoryTransferStore::new())
        }
    };

    let settings = CallSettings::from_config(&config)
        .expect("failed to read filler audio: check session.filler_audio_path");
    if settings.default_api_key.is_none() {
        tracing::warn!("no default knowledge api key; calls must pass api_key");
    }

    tokio::spawn(background::start_purge_task(
        transfers.clone(),
        config.transfer.retention_secs,
    ));

    let state = AppState {
        services: SessionServices {
            engine: Arc::new(engine),
            knowledge: Arc::new(knowledge),
            transfers,
            settings: Arc::new(settings),
        },
        public_host: config.server.public_host.clone(),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting call relay server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("call relay server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
