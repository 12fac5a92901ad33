//! StreamSession - Per-connection request controller
//!
//! ## Responsibilities
//!
//! - Parse inbound WebSocket requests (frame / video_file / seek)
//! - Drive detection and the session's CountAggregator
//! - Emit detection, complete, seek_ack and error replies
//! - Abort a bulk pass when the client goes away
//!
//! ## Design
//!
//! One worker per connection handles requests one at a time, so the
//! aggregator is owned without locking. Failures local to a frame or a
//! request become `{ "error": ... }` replies; only `TransportClosed` ends
//! the session.

mod protocol;

pub use protocol::{ClientRequest, ErrorReply, ServerMessage};

use crate::count_aggregator::{CountAggregator, FrameMarker};
use crate::detector::{BoundingBox, FrameDetector};
use crate::error::{Error, Result};
use crate::event_log_service::EventLogService;
use crate::frame_codec;
use crate::payload_store::{PayloadId, VideoPayloadStore};
use crate::video_source::VideoDecoder;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bulk pass detects every Nth frame
    pub subsample_factor: u64,
    /// Events attached to each detection message
    pub recent_events: usize,
    pub jpeg_quality: u8,
    /// Drop a frame whose detection takes longer than this
    pub frame_deadline: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            subsample_factor: 5,
            recent_events: 10,
            jpeg_quality: 80,
            frame_deadline: None,
        }
    }
}

/// Shared collaborators every session uses
#[derive(Clone)]
pub struct SessionServices {
    pub detector: Arc<dyn FrameDetector>,
    pub decoder: Arc<dyn VideoDecoder>,
    pub payloads: Arc<VideoPayloadStore>,
    pub archive: Arc<EventLogService>,
    pub settings: SessionSettings,
}

/// One client session
pub struct StreamSession {
    id: Uuid,
    services: SessionServices,
    counts: CountAggregator,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn new(
        id: Uuid,
        services: SessionServices,
        outbound: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            services,
            counts: CountAggregator::new(),
            outbound,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn counts(&self) -> &CountAggregator {
        &self.counts
    }

    /// Process inbound messages until the channel closes or the
    /// transport goes away
    ///
    /// Requests queue up while one is in flight. A live frame is skipped
    /// when a newer live frame is already queued behind it.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<String>) {
        tracing::debug!(session_id = %self.id, "Session worker started");

        let mut backlog: VecDeque<Result<ClientRequest>> = VecDeque::new();

        loop {
            if backlog.is_empty() {
                let text = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    text = inbound.recv() => match text {
                        Some(text) => text,
                        None => break,
                    },
                };
                backlog.push_back(ClientRequest::parse(&text));
            }
            while let Ok(text) = inbound.try_recv() {
                backlog.push_back(ClientRequest::parse(&text));
            }

            let Some(next) = backlog.pop_front() else {
                continue;
            };
            if is_live_frame(&next) && backlog.iter().any(is_live_frame) {
                tracing::debug!(session_id = %self.id, queued = backlog.len(), "Stale live frame skipped");
                continue;
            }

            if let Err(e) = self.handle_parsed(next).await {
                tracing::debug!(session_id = %self.id, error = %e, "Session worker stopping");
                break;
            }
        }

        tracing::debug!(
            session_id = %self.id,
            events = self.counts.len(),
            "Session worker finished"
        );
        self.services.archive.release(self.id).await;
    }

    /// Handle one text message. Returns Err only when the transport is gone.
    pub async fn handle_text(&mut self, text: &str) -> Result<()> {
        self.handle_parsed(ClientRequest::parse(text)).await
    }

    async fn handle_parsed(&mut self, parsed: Result<ClientRequest>) -> Result<()> {
        let result = match parsed {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    pub async fn handle_request(&mut self, request: ClientRequest) -> Result<()> {
        match request {
            ClientRequest::Frame { frame } => self.handle_frame(&frame).await,
            ClientRequest::VideoFile { filename } => self.handle_video_file(PayloadId::from(filename)).await,
            ClientRequest::Seek { frame } => self.handle_seek(frame),
            control @ (ClientRequest::Play | ClientRequest::Pause) => {
                tracing::debug!(session_id = %self.id, request = ?control, "Playback control ignored");
                Ok(())
            }
        }
    }

    /// Turn a request failure into an error reply
    fn settle(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(Error::TransportClosed) => Err(Error::TransportClosed),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Request failed");
                self.send_error(&e)
            }
        }
    }

    async fn handle_frame(&mut self, data_uri: &str) -> Result<()> {
        let bytes = frame_codec::parse_data_uri(data_uri)?;
        let message = self.process_frame(bytes, FrameMarker::now()).await?;
        self.send(&message)
    }

    async fn handle_video_file(&mut self, payload_id: PayloadId) -> Result<()> {
        let payload = self.services.payloads.take(&payload_id).await?;
        let size_bytes = payload.bytes.len();

        self.counts.reset();
        self.services.archive.reset(self.id).await;

        let mut source = self.services.decoder.open(payload).await?;
        let fps = source.fps();
        let stride = self.services.settings.subsample_factor.max(1);

        tracing::info!(
            session_id = %self.id,
            payload_id = %payload_id,
            size_bytes = size_bytes,
            fps = fps,
            stride = stride,
            "Bulk pass started"
        );

        let cancel = self.cancel.clone();
        let mut frame_index: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        session_id = %self.id,
                        payload_id = %payload_id,
                        frame_index = frame_index,
                        "Bulk pass aborted, client disconnected"
                    );
                    return Err(Error::TransportClosed);
                }
                next = source.next_frame() => next,
            };

            let bytes = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    tracing::warn!(
                        session_id = %self.id,
                        payload_id = %payload_id,
                        frame_index = frame_index,
                        error = %e,
                        "Video source failed, ending pass"
                    );
                    self.send_error(&e)?;
                    break;
                }
            };

            if frame_index % stride == 0 {
                let marker = FrameMarker::video(frame_index, fps);
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::TransportClosed),
                    outcome = self.process_frame(bytes, marker) => outcome,
                };

                match outcome {
                    Ok(message) => self.send(&message)?,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %self.id,
                            frame_index = frame_index,
                            error = %e,
                            "Frame skipped"
                        );
                        self.send_error(&e)?;
                    }
                }
            }

            frame_index += 1;
        }

        drop(source);

        tracing::info!(
            session_id = %self.id,
            payload_id = %payload_id,
            total_frames = frame_index,
            events = self.counts.len(),
            cumulative_total = self.counts.cumulative_total(),
            "Bulk pass complete"
        );

        self.send(&ServerMessage::Complete {
            events: self.counts.events().to_vec(),
            total_frames: frame_index,
        })
    }

    fn handle_seek(&mut self, target: u64) -> Result<()> {
        let matched = self.counts.seek(target);

        tracing::debug!(
            session_id = %self.id,
            target = target,
            matched_frame = ?matched.map(|m| m.frame_index),
            count = self.counts.current_count(),
            "Seek"
        );

        self.send(&ServerMessage::SeekAck {
            frame: target,
            matched_frame: matched.map(|m| m.frame_index),
            count: self.counts.current_count(),
        })
    }

    /// Decode, detect, aggregate and render one encoded frame
    async fn process_frame(&mut self, bytes: Vec<u8>, marker: FrameMarker) -> Result<ServerMessage> {
        let (image, bytes) = tokio::task::spawn_blocking(move || {
            frame_codec::decode(&bytes).map(|image| (image, bytes))
        })
        .await
        .map_err(blocking_failed)??;

        let boxes = self.detect(&bytes).await?;
        let count = u32::try_from(boxes.len()).unwrap_or(u32::MAX);

        // Render before committing so a failed frame leaves no event behind
        let quality = self.services.settings.jpeg_quality;
        let frame = tokio::task::spawn_blocking(move || frame_codec::render(image, &boxes, quality))
            .await
            .map_err(blocking_failed)??;

        if let Some(event) = self.counts.observe(count, marker).cloned() {
            tracing::debug!(
                session_id = %self.id,
                count = event.count,
                previous_count = event.previous_count,
                cumulative_total = event.cumulative_total,
                "Count changed"
            );
            self.services.archive.record(self.id, event).await;
        }

        let frame_number = match marker {
            FrameMarker::Video { frame_index, .. } => Some(frame_index),
            FrameMarker::Live(_) => None,
        };

        Ok(ServerMessage::Detection {
            frame,
            count,
            frame_number,
            events: self.counts.tail(self.services.settings.recent_events).to_vec(),
        })
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<BoundingBox>> {
        let detection = self.services.detector.detect(image);
        match self.services.settings.frame_deadline {
            Some(deadline) => tokio::time::timeout(deadline, detection).await.map_err(|_| {
                Error::Detector(format!(
                    "{} exceeded {} ms deadline, frame dropped",
                    self.services.detector.name(),
                    deadline.as_millis()
                ))
            })?,
            None => detection.await,
        }
    }

    fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.outbound.send(json).map_err(|_| {
            self.cancel.cancel();
            Error::TransportClosed
        })
    }

    fn send_error(&self, error: &Error) -> Result<()> {
        self.send(&ErrorReply {
            error: error.client_message(),
        })
    }
}

fn is_live_frame(request: &Result<ClientRequest>) -> bool {
    matches!(request, Ok(ClientRequest::Frame { .. }))
}

fn blocking_failed(e: JoinError) -> Error {
    Error::Internal(format!("frame task failed: {}", e))
}
