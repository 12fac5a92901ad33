//! Shared models and types for the HTTP surface
//!
//! Response bodies used by the web API that are not owned by a
//! single service module.

use crate::count_aggregator::CountEvent;
use crate::payload_store::PayloadStats;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub detector: String,
    pub detector_connected: bool,
    pub active_sessions: u64,
    pub pending_payloads: usize,
}

/// Result of `POST /upload-video`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Payload id for a later `video_file` request
    pub filename: String,
    pub size_bytes: usize,
}

/// Result of `GET /count-events`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountEventsResponse {
    pub events: Vec<CountEvent>,
}

/// Service status (`GET /api/status`)
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub payloads: PayloadStats,
    pub connections: u64,
    pub archived_events: usize,
    pub subsample_factor: u64,
}
