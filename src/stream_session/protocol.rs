//! WebSocket message shapes
//!
//! Field names are the client contract.

use crate::count_aggregator::CountEvent;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Inbound client request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Live frame as a data URI
    Frame { frame: String },
    /// Process a previously uploaded video
    VideoFile { filename: String },
    /// Restore the count valid at a frame index
    Seek { frame: u64 },
    /// Playback controls sent by the web client; accepted, no effect
    Play,
    Pause,
}

impl ClientRequest {
    /// Parse a text message; any shape mismatch is a MalformedRequest
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedRequest(e.to_string()))
    }
}

/// Outbound message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Annotated frame plus recent events
    Detection {
        frame: String,
        count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_number: Option<u64>,
        events: Vec<CountEvent>,
    },
    /// End of a bulk pass with the full log
    Complete {
        events: Vec<CountEvent>,
        total_frames: u64,
    },
    /// Seek result; `matched_frame` is None when nothing was frame-indexed
    SeekAck {
        frame: u64,
        matched_frame: Option<u64>,
        count: u32,
    },
}

/// `{ "error": ... }` reply
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    pub error: String,
}
