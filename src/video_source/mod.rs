//! VideoSource - Sequential frame access to uploaded videos
//!
//! ## Responsibilities
//!
//! - Turn a consumed VideoPayload into a frame iterator
//! - Report the source frame rate for timestamp derivation
//! - Release decode resources (scratch file, ffmpeg process) on drop
//!
//! Decoding uses ffmpeg/ffprobe as subprocesses. ffmpeg writes MJPEG to
//! stdout and `kill_on_drop(true)` ensures an abandoned pass does not leave
//! the process running.

mod mjpeg;

pub use mjpeg::MjpegSplitter;

use crate::count_aggregator::DEFAULT_FPS;
use crate::error::{Error, Result};
use crate::payload_store::VideoPayload;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 64 * 1024;
const STDERR_LIMIT: usize = 4096;

/// Sequential frame iterator over a decoded container
#[async_trait]
pub trait VideoSource: Send {
    /// Source frame rate
    fn fps(&self) -> f64;

    /// Next encoded (JPEG) frame; `None` once the source is exhausted
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>>>;
}

/// Opens video payloads for decoding
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    /// Consume the payload and open a frame source over it
    async fn open(&self, payload: VideoPayload) -> Result<Box<dyn VideoSource>>;
}

/// ffmpeg decoder configuration
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Directory for scratch copies of payloads
    pub temp_dir: PathBuf,
    /// Upper bound for the ffprobe frame-rate query
    pub probe_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            temp_dir: std::env::temp_dir(),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// ffmpeg subprocess decoder
pub struct FfmpegDecoder {
    config: FfmpegConfig,
}

impl FfmpegDecoder {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// Write payload bytes to a scratch file that is removed on drop
    async fn write_scratch(&self, payload: VideoPayload) -> Result<NamedTempFile> {
        let temp_dir = self.config.temp_dir.clone();
        let VideoPayload { id, bytes } = payload;

        tokio::task::spawn_blocking(move || -> Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix(&format!("{}-", id))
                .suffix(".video")
                .tempfile_in(&temp_dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::Internal(format!("scratch write task failed: {}", e)))?
    }

    /// Query the stream frame rate; falls back to DEFAULT_FPS
    async fn probe_fps(&self, path: &Path) -> f64 {
        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=r_frame_rate",
                "-of", "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.config.probe_timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                match parse_frame_rate(&text) {
                    Some(fps) => fps,
                    None => {
                        tracing::warn!(raw = %text.trim(), "Unusable frame rate, using default");
                        DEFAULT_FPS
                    }
                }
            }
            Ok(Ok(output)) => {
                tracing::warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "ffprobe failed, using default frame rate"
                );
                DEFAULT_FPS
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "ffprobe spawn failed, using default frame rate");
                DEFAULT_FPS
            }
            Err(_) => {
                tracing::warn!(
                    timeout_sec = self.config.probe_timeout.as_secs(),
                    "ffprobe timeout, using default frame rate"
                );
                DEFAULT_FPS
            }
        }
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn open(&self, payload: VideoPayload) -> Result<Box<dyn VideoSource>> {
        let payload_id = payload.id.clone();
        let scratch = self.write_scratch(payload).await?;
        let fps = self.probe_fps(scratch.path()).await;

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(["-loglevel", "error", "-i"])
            .arg(scratch.path())
            .args([
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-q:v", "3",
                "-vsync", "passthrough",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stdout unavailable".to_string()))?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_stderr(stderr)));

        tracing::debug!(payload_id = %payload_id, fps = fps, "ffmpeg decoder opened");

        Ok(Box::new(FfmpegVideoSource {
            fps,
            child,
            stdout: Box::new(stdout),
            stderr_task,
            splitter: MjpegSplitter::new(),
            read_buf: vec![0u8; READ_CHUNK],
            frames_emitted: 0,
            finished: false,
            _scratch: scratch,
        }))
    }
}

/// Frame source over a running ffmpeg process
struct FfmpegVideoSource {
    fps: f64,
    child: Child,
    stdout: Box<dyn AsyncRead + Send + Unpin>,
    stderr_task: Option<JoinHandle<String>>,
    splitter: MjpegSplitter,
    read_buf: Vec<u8>,
    frames_emitted: u64,
    finished: bool,
    /// Held so the scratch file outlives the process reading it
    _scratch: NamedTempFile,
}

impl FfmpegVideoSource {
    /// Reap ffmpeg once stdout hits EOF
    async fn finish(&mut self) -> Option<Result<Vec<u8>>> {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(Err(Error::Io(e))),
        };

        if status.success() {
            return None;
        }

        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if self.frames_emitted == 0 {
            return Some(Err(Error::Decode(format!(
                "ffmpeg could not decode video: {}",
                stderr.trim()
            ))));
        }

        tracing::warn!(
            exit_status = %status,
            frames = self.frames_emitted,
            stderr = %stderr.trim(),
            "ffmpeg exited with error after producing frames"
        );
        None
    }
}

#[async_trait]
impl VideoSource for FfmpegVideoSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    async fn next_frame(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                self.frames_emitted += 1;
                return Some(Ok(frame));
            }
            if self.finished {
                return None;
            }

            match self.stdout.read(&mut self.read_buf).await {
                Ok(0) => {
                    self.finished = true;
                    if self.splitter.pending() > 0 {
                        tracing::debug!(bytes = self.splitter.pending(), "Discarding trailing partial frame");
                    }
                    return self.finish().await;
                }
                Ok(n) => self.splitter.push(&self.read_buf[..n]),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(Error::Io(e)));
                }
            }
        }
    }
}

impl Drop for FfmpegVideoSource {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        tracing::debug!(frames = self.frames_emitted, "Decode resources released");
    }
}

async fn read_stderr<R: AsyncRead + Unpin>(mut stderr: R) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                // keep draining so ffmpeg never blocks on a full pipe
                if buf.len() < STDERR_LIMIT {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parse ffprobe rates such as `30000/1001` or `25`
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let raw = raw.lines().next()?.trim();
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };

    (fps.is_finite() && fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload_store::PayloadId;

    #[test]
    fn test_parse_frame_rate() {
        let ntsc = parse_frame_rate("30000/1001\n").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("25/1\n25/1\n"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("0"), None);
        assert_eq!(parse_frame_rate(""), None);
        assert_eq!(parse_frame_rate("N/A"), None);
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_releases_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = FfmpegDecoder::new(FfmpegConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
            temp_dir: dir.path().to_path_buf(),
            probe_timeout: Duration::from_secs(1),
        });

        let payload = VideoPayload {
            id: PayloadId::from("upload-1-0"),
            bytes: vec![0u8; 128],
        };
        let result = decoder.open(payload).await;
        assert!(matches!(result, Err(Error::Internal(_))));

        let leftover = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftover, 0);
    }
}
