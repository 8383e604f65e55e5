//! Liveness / webhook HTTP surface (axum).
//!
//! Serves:
//! - `GET /`: liveness, always `200 Bot is running!`
//! - `POST /webhook`: webhook mode only, enqueues a Telegram update

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use teloxide::types::Update;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const LIVENESS_TEXT: &str = "Bot is running!";
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone, Default)]
pub struct ServerState {
    /// Present only in webhook mode.
    pub queue: Option<mpsc::Sender<Update>>,
    pub webhook_secret: Option<String>,
}

impl ServerState {
    pub fn liveness_only() -> Self {
        Self::default()
    }

    pub fn webhook(queue: mpsc::Sender<Update>, webhook_secret: Option<String>) -> Self {
        Self {
            queue: Some(queue),
            webhook_secret,
        }
    }
}

pub fn build_router(state: ServerState) -> Router {
    let router = Router::new().route("/", get(liveness));
    let router = if state.queue.is_some() {
        router.route("/webhook", post(receive_update))
    } else {
        router
    };
    router.with_state(state)
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

/// Accept the update once it is queued; processing outcome is not awaited.
async fn receive_update(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(queue) = state.queue else {
        return StatusCode::NOT_FOUND;
    };

    if let Some(expected) = &state.webhook_secret {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            tracing::warn!("webhook call with missing or wrong secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!("undecodable webhook payload: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    if queue.send(update).await.is_err() {
        tracing::error!("update queue closed; rejecting webhook delivery");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// Serve on `listener` until `shutdown` is cancelled.
pub async fn run_with_listener(
    listener: tokio::net::TcpListener,
    state: ServerState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("HTTP listening on http://{addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// Bind and run in a background task so the chat loop never blocks on it.
pub async fn spawn(
    addr: SocketAddr,
    state: ServerState,
    shutdown: CancellationToken,
) -> Result<SocketAddr, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(listener, state, shutdown).await {
            tracing::error!("HTTP server failed: {err}");
        }
    });

    Ok(local)
}
