//! Local HTTP endpoint exposing the signer's status (for the `status` CLI)
//! and the prometheus gauges.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use color_eyre::eyre;
use prometheus::{Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Port the status server listens on.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Snapshot of the signer state served to the status CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub height: i64,
    pub rank: u32,
    pub set_size: u32,
    pub counter: u32,
    pub threshold: u32,
}

#[derive(Clone)]
struct AppState {
    status: watch::Receiver<Status>,
    registry: Registry,
}

async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(*state.status.borrow())
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    TextEncoder::new()
        .encode_to_string(&state.registry.gather())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serves `/status` and `/metrics` on localhost until the task is aborted.
pub async fn serve(
    status: watch::Receiver<Status>,
    registry: Registry,
    port: u16,
) -> eyre::Result<()> {
    let app = Router::new()
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(AppState { status, registry });

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port = listener.local_addr()?.port(), "Starting HTTP server");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Client side of `/status`, used by the status CLI.
pub async fn get_status(port: u16) -> eyre::Result<Status> {
    let url = format!("http://127.0.0.1:{port}/status");
    let status = reqwest::get(&url)
        .await?
        .error_for_status()?
        .json::<Status>()
        .await?;
    Ok(status)
}
