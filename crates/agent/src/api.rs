//! HTTP API for health checks, node conditions, and Prometheus metrics.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use eviction_agent_lib::EvictionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<EvictionManager>,
    pub monitoring_interval: Duration,
}

impl AppState {
    pub fn new(manager: Arc<EvictionManager>, monitoring_interval: Duration) -> Self {
        AppState {
            manager,
            monitoring_interval,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_synchronize: Option<DateTime<Utc>>,
}

/// Liveness: healthy while the eviction loop keeps completing cycles. The
/// loop is considered stalled once three intervals pass without one.
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let last_synchronize = state.manager.last_synchronize();
    let (status, status_code) = match last_synchronize {
        None => ("starting", StatusCode::OK),
        Some(at) => {
            let stall_after = chrono::Duration::from_std(state.monitoring_interval * 3)
                .unwrap_or(chrono::Duration::MAX);
            if Utc::now().signed_duration_since(at) <= stall_after {
                ("ok", StatusCode::OK)
            } else {
                ("stalled", StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    };
    (
        status_code,
        Json(HealthResponse {
            status,
            last_synchronize,
        }),
    )
}

#[derive(Debug, Serialize)]
struct ConditionsResponse {
    conditions: Vec<String>,
    memory_pressure: bool,
    disk_pressure: bool,
    pid_pressure: bool,
}

/// The currently advertised node pressure conditions.
async fn conditions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let manager = &state.manager;
    Json(ConditionsResponse {
        conditions: manager
            .node_conditions()
            .iter()
            .map(|condition| condition.to_string())
            .collect(),
        memory_pressure: manager.is_under_memory_pressure(),
        disk_pressure: manager.is_under_disk_pressure(),
        pid_pressure: manager.is_under_pid_pressure(),
    })
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            error.to_string().into_bytes(),
        );
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/conditions", get(conditions))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
