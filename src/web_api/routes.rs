//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection_registry::SessionChannel;
use crate::error::{Error, Result};
use crate::models::{CountEventsResponse, UploadResponse};
use crate::state::AppState;
use crate::stream_session::StreamSession;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(super::root))
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::service_status))
        // Upload & Query
        .route(
            "/upload-video",
            post(upload_video).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/count-events", get(count_events))
        // Stream sessions
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Upload & Query Handlers
// ========================================

/// Store an uploaded video for a later `video_file` request
async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut upload: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("invalid multipart body: {}", e)))?
    {
        let named_file = field.name() == Some("file");
        if !named_file && field.file_name().is_none() {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("failed to read upload: {}", e)))?;

        if named_file {
            upload = Some(bytes.to_vec());
            break;
        }
        if upload.is_none() {
            upload = Some(bytes.to_vec());
        }
    }

    let bytes = upload.ok_or_else(|| Error::Validation("missing file field".to_string()))?;
    if bytes.is_empty() {
        return Err(Error::Validation("uploaded file is empty".to_string()));
    }

    let size_bytes = bytes.len();
    let id = state.payloads.put(bytes).await;

    Ok(Json(UploadResponse {
        filename: id.to_string(),
        size_bytes,
    }))
}

/// Event log of the most recent session
async fn count_events(State(state): State<AppState>) -> impl IntoResponse {
    Json(CountEventsResponse {
        events: state.event_log.latest().await,
    })
}

// ========================================
// WebSocket Handler
// ========================================

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Register with ConnectionRegistry
    let SessionChannel { id: session_id, tx, mut rx } = state.registry.register().await;
    let cancel = CancellationToken::new();
    // Reader never waits on a busy worker
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

    // Forward session replies to the socket
    let send_cancel = cancel.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
        send_cancel.cancel();
    });

    // Feed inbound requests to the session worker
    let recv_cancel = cancel.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            let text = match result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(Message::Ping(data)) => {
                    // Pong is handled automatically by axum
                    tracing::trace!("Received ping: {:?}", data);
                    continue;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "WebSocket error");
                    break;
                }
            };

            if inbound_tx.send(text).is_err() {
                break;
            }
        }
        recv_cancel.cancel();
    });

    let session = StreamSession::new(session_id, state.session_services(), tx, cancel.clone());
    let worker = tokio::spawn(session.run(inbound_rx));

    // Wait for either side of the transport to close
    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
    }

    // Stop any bulk pass and let the worker release its decode resources
    cancel.cancel();
    if let Err(e) = worker.await {
        tracing::error!(session_id = %session_id, error = %e, "Session worker panicked");
    }
    send_task.abort();
    recv_task.abort();

    // Unregister from registry
    state.registry.unregister(&session_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count_aggregator::{CountAggregator, FrameMarker};
    use crate::detector::{BoundingBox, FrameDetector};
    use crate::payload_store::{PayloadId, VideoPayload};
    use crate::state::AppConfig;
    use crate::video_source::{VideoDecoder, VideoSource};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct IdleDetector;

    #[async_trait]
    impl FrameDetector for IdleDetector {
        fn name(&self) -> &'static str {
            "idle"
        }

        async fn detect(&self, _image: &[u8]) -> Result<Vec<BoundingBox>> {
            Ok(Vec::new())
        }
    }

    struct NoVideo;

    #[async_trait]
    impl VideoDecoder for NoVideo {
        async fn open(&self, _payload: VideoPayload) -> Result<Box<dyn VideoSource>> {
            Err(Error::Decode("no decoder in tests".to_string()))
        }
    }

    /// Serves the same frame forever; flags when the source is dropped
    struct EndlessVideo {
        released: Arc<AtomicBool>,
    }

    struct EndlessSource {
        frame: Vec<u8>,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl VideoDecoder for EndlessVideo {
        async fn open(&self, _payload: VideoPayload) -> Result<Box<dyn VideoSource>> {
            let image = image::RgbImage::from_pixel(16, 12, image::Rgb([60, 60, 60]));
            Ok(Box::new(EndlessSource {
                frame: crate::frame_codec::encode_jpeg(&image, 80)?,
                released: self.released.clone(),
            }))
        }
    }

    #[async_trait]
    impl VideoSource for EndlessSource {
        fn fps(&self) -> f64 {
            30.0
        }

        async fn next_frame(&mut self) -> Option<Result<Vec<u8>>> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Some(Ok(self.frame.clone()))
        }
    }

    impl Drop for EndlessSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn test_state() -> AppState {
        AppState::new(AppConfig::default(), Arc::new(IdleDetector), Arc::new(NoVideo))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart_request(field: &str, filename: Option<&str>, content: &[u8]) -> Request<Body> {
        let boundary = "X-PEOPLE-COUNTER-BOUNDARY";
        let disposition = match filename {
            Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, f),
            None => format!("form-data; name=\"{}\"", field),
        };
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(format!("Content-Disposition: {}\r\n", disposition).as_bytes());
        body.extend_from_slice(b"Content-Type: video/mp4\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload-video")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_banner() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "People Counter API is running");
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["detector"], "idle");
        assert_eq!(body["detector_connected"], true);
        assert_eq!(body["active_sessions"], 0);
        assert_eq!(body["pending_payloads"], 0);
    }

    #[tokio::test]
    async fn test_upload_stores_payload() {
        let state = test_state();
        let app = create_router(state.clone());

        let response = app
            .oneshot(multipart_request("file", Some("clip.mp4"), b"fake video bytes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["size_bytes"], 16);
        let id = body["filename"].as_str().unwrap();
        assert!(id.starts_with("upload-"));

        let payload = state.payloads.take(&PayloadId::from(id)).await.unwrap();
        assert_eq!(payload.bytes, b"fake video bytes");
    }

    #[tokio::test]
    async fn test_upload_accepts_other_file_field() {
        let state = test_state();
        let app = create_router(state.clone());

        let response = app
            .oneshot(multipart_request("video", Some("clip.mp4"), b"abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.payloads.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_and_missing() {
        let state = test_state();

        let response = create_router(state.clone())
            .oneshot(multipart_request("file", Some("clip.mp4"), b""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_code"], "VALIDATION_ERROR");

        let response = create_router(state.clone())
            .oneshot(multipart_request("note", None, b"hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(state.payloads.stats().await.pending, 0);
    }

    #[tokio::test]
    async fn test_count_events_returns_latest_session() {
        let state = test_state();
        let session = Uuid::new_v4();
        let mut counts = CountAggregator::new();
        for (i, c) in [0u32, 2, 2, 1].iter().enumerate() {
            if let Some(event) = counts.observe(*c, FrameMarker::video(i as u64, 30.0)) {
                state.event_log.record(session, event.clone()).await;
            }
        }

        let response = create_router(state)
            .oneshot(Request::builder().uri("/count-events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["count"], 2);
        assert_eq!(events[0]["frame"], 1);
        assert_eq!(events[1]["cumulative_total"], 2);
    }

    #[tokio::test]
    async fn test_status() {
        let state = test_state();
        state.payloads.put(vec![1, 2, 3]).await;

        let response = create_router(state)
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["data"]["payloads"]["pending"], 1);
        assert_eq!(body["data"]["payloads"]["total_bytes"], 3);
        assert_eq!(body["data"]["connections"], 0);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let response = create_router(test_state())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_ws_close_cancels_running_pass() {
        let released = Arc::new(AtomicBool::new(false));
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(IdleDetector),
            Arc::new(EndlessVideo {
                released: released.clone(),
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        wait_until(|| state.registry.connection_count() == 1).await;

        let id = state.payloads.put(vec![0u8; 16]).await;
        let request = json!({ "type": "video_file", "filename": id.as_str() }).to_string();
        ws.send(WsMessage::Text(request)).await.unwrap();

        // Seek on every sampled frame like the web client; the worker is busy
        // with the pass so these stay queued
        let mut detections = 0;
        while detections < 64 {
            let msg = ws.next().await.unwrap().unwrap();
            if let WsMessage::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if let Some(frame) = value["frame_number"].as_u64() {
                    detections += 1;
                    let seek = json!({ "type": "seek", "frame": frame }).to_string();
                    ws.send(WsMessage::Text(seek)).await.unwrap();
                }
            }
        }
        assert!(!released.load(Ordering::SeqCst));

        ws.close(None).await.unwrap();

        wait_until(|| state.registry.connection_count() == 0).await;
        assert!(released.load(Ordering::SeqCst));
        assert!(state.payloads.take(&id).await.is_err());
    }
}
