//! Application state
//!
//! Holds all shared components and state

use crate::connection_registry::ConnectionRegistry;
use crate::detector::{FrameDetector, TargetClass};
use crate::event_log_service::EventLogService;
use crate::payload_store::VideoPayloadStore;
use crate::stream_session::{SessionServices, SessionSettings};
use crate::video_source::{FfmpegConfig, VideoDecoder};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Inference server URL
    pub detector_url: String,
    /// Timeout of one inference request
    pub detector_timeout: Duration,
    /// Counted class label
    pub target_class: String,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
    /// Optional per-frame processing bound
    pub frame_deadline: Option<Duration>,
    /// Bulk pass detection stride (>= 1)
    pub subsample_factor: u64,
    /// Tail length attached to detection messages
    pub recent_events: usize,
    pub jpeg_quality: u8,
    /// Upload body limit
    pub max_upload_bytes: usize,
    /// Query surface ring capacity
    pub event_archive_capacity: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Scratch directory for decode resources
    pub temp_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8000),
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            detector_timeout: Duration::from_millis(env_or("DETECTOR_TIMEOUT_MS", 10_000)),
            target_class: std::env::var("TARGET_CLASS").unwrap_or_else(|_| "person".to_string()),
            min_confidence: env_or("MIN_CONFIDENCE", 0.25),
            frame_deadline: std::env::var("FRAME_DEADLINE_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            subsample_factor: env_or("SUBSAMPLE_FACTOR", 5u64).max(1),
            recent_events: env_or("RECENT_EVENTS", 10),
            jpeg_quality: env_or("JPEG_QUALITY", 80u8).clamp(1, 100),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 100 * 1024 * 1024),
            event_archive_capacity: env_or("EVENT_ARCHIVE_CAPACITY", 2000),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
        }
    }
}

impl AppConfig {
    pub fn target(&self) -> TargetClass {
        TargetClass::new(self.target_class.clone(), self.min_confidence)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            subsample_factor: self.subsample_factor.max(1),
            recent_events: self.recent_events,
            jpeg_quality: self.jpeg_quality,
            frame_deadline: self.frame_deadline,
        }
    }

    pub fn ffmpeg(&self) -> FfmpegConfig {
        FfmpegConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            temp_dir: self.temp_dir.clone(),
            ..FfmpegConfig::default()
        }
    }
}

/// Parse an env var, falling back to the default when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = key, value = %raw, "Invalid config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Uploaded videos awaiting processing
    pub payloads: Arc<VideoPayloadStore>,
    /// Person detector
    pub detector: Arc<dyn FrameDetector>,
    /// Video decoder for bulk passes
    pub decoder: Arc<dyn VideoDecoder>,
    /// Active WebSocket sessions
    pub registry: Arc<ConnectionRegistry>,
    /// Latest session event archive (query surface)
    pub event_log: Arc<EventLogService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, detector: Arc<dyn FrameDetector>, decoder: Arc<dyn VideoDecoder>) -> Self {
        let event_log = Arc::new(EventLogService::new(config.event_archive_capacity));
        Self {
            config,
            payloads: Arc::new(VideoPayloadStore::new()),
            detector,
            decoder,
            registry: Arc::new(ConnectionRegistry::new()),
            event_log,
            started_at: Instant::now(),
        }
    }

    /// Collaborators handed to a new stream session
    pub fn session_services(&self) -> SessionServices {
        SessionServices {
            detector: self.detector.clone(),
            decoder: self.decoder.clone(),
            payloads: self.payloads.clone(),
            archive: self.event_log.clone(),
            settings: self.config.session_settings(),
        }
    }
}
