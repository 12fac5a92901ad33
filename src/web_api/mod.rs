//! WebAPI - HTTP and WebSocket Endpoints
//!
//! ## Responsibilities
//!
//! - Upload surface (`POST /upload-video`)
//! - Query surface (`GET /count-events`)
//! - WebSocket stream sessions (`GET /ws`)
//! - Health and status

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::{ApiResponse, HealthResponse, ServiceStatus};
use crate::state::AppState;

/// Liveness banner
pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "People Counter API is running" }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let detector_ok = state.detector.health_check().await;
    let pending = state.payloads.stats().await.pending;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        detector: state.detector.name().to_string(),
        detector_connected: detector_ok,
        active_sessions: state.registry.connection_count(),
        pending_payloads: pending,
    };

    Json(response)
}

/// Payload store and session status
pub async fn service_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = ServiceStatus {
        payloads: state.payloads.stats().await,
        connections: state.registry.connection_count(),
        archived_events: state.event_log.count().await,
        subsample_factor: state.config.subsample_factor,
    };

    Json(ApiResponse::success(status))
}
