//! People Counter Library
//!
//! Streams live or uploaded video through a person detector and keeps a
//! compact log of occupancy changes per client session.
//!
//! ## Architecture (8 Components)
//!
//! 1. Detector - Person detection adapter (HTTP inference server)
//! 2. FrameCodec - Data URI, JPEG decode/encode, box overlay
//! 3. VideoSource - Sequential frame access to uploaded videos (ffmpeg)
//! 4. VideoPayloadStore - Uploaded bytes awaiting one processing pass
//! 5. CountAggregator - Count changes to event log + aggregates
//! 6. StreamSession - Per-connection request controller
//! 7. ConnectionRegistry - Active sessions, fan-out, cleanup
//! 8. EventLogService - Latest session events for the query surface
//!
//! ## Design Principles
//!
//! - Session state is owned by one worker, never shared
//! - Payloads are consumed at most once
//! - Per-frame and per-request failures never end a session

pub mod connection_registry;
pub mod count_aggregator;
pub mod detector;
pub mod error;
pub mod event_log_service;
pub mod frame_codec;
pub mod models;
pub mod payload_store;
pub mod state;
pub mod stream_session;
pub mod video_source;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
