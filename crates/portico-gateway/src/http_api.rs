//! Admin HTTP surface
//!
//! A small axum router serving `/health` and `/metrics`; everything else
//! is 404. Served on its own port when enabled.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::metrics;
use crate::pg_wire::server::ServerStats;

#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<ServerStats>,
    pub server_name: String,
    pub max_connections: usize,
}

#[derive(Debug, Serialize)]
struct ConnectionStats {
    total: u64,
    active: usize,
    errors: u64,
}

#[derive(Debug, Serialize)]
struct HealthDetail {
    uptime_seconds: u64,
    saturated: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    server: String,
    connections: ConnectionStats,
    health: HealthDetail,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .fallback(not_found)
        .with_state(state)
}

/// Serve the admin router on the given port until the process exits
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("admin HTTP surface listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.stats.active_connections();
    let saturated = active >= state.max_connections;

    let body = HealthResponse {
        status: if saturated { "degraded" } else { "ok" },
        timestamp: chrono::Utc::now().to_rfc3339(),
        server: state.server_name.clone(),
        connections: ConnectionStats {
            total: state.stats.total_connections(),
            active,
            errors: state.stats.errors(),
        },
        health: HealthDetail {
            uptime_seconds: state.stats.uptime_seconds(),
            saturated,
        },
    };

    let status = if saturated {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = metrics::encode_metrics(state.stats.uptime_seconds());
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        body,
    )
}

async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
