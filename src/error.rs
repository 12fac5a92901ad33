//! Error handling for the People Counter server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown video payload id at processing time
    #[error("Payload not found: {0}")]
    PayloadNotFound(String),

    /// Malformed image or video bytes
    #[error("Decode failure: {0}")]
    Decode(String),

    /// Client went away; ends the session, never reported to anyone
    #[error("Transport closed")]
    TransportClosed,

    /// Unrecognized inbound message shape
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Detector backend failure
    #[error("Detector error: {0}")]
    Detector(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Message sent to a WebSocket client in an `{ "error": ... }` reply
    pub fn client_message(&self) -> String {
        match self {
            Error::PayloadNotFound(_) => "File not found".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::PayloadNotFound(msg) => (StatusCode::NOT_FOUND, "PAYLOAD_NOT_FOUND", msg.clone()),
            Error::Decode(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "DECODE_ERROR", msg.clone()),
            Error::TransportClosed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "TRANSPORT_CLOSED",
                self.to_string(),
            ),
            Error::MalformedRequest(msg) => (StatusCode::BAD_REQUEST, "MALFORMED_REQUEST", msg.clone()),
            Error::Detector(msg) => (StatusCode::BAD_GATEWAY, "DETECTOR_ERROR", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", msg.clone()),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone()),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
