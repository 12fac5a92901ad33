//! People Counter - detection event stream server
//!
//! Main entry point for the server application.

use people_counter::{
    connection_registry::ConnectionRegistry,
    detector::{FrameDetector, HttpDetector},
    state::{AppConfig, AppState},
    stream_session::ErrorReply,
    video_source::FfmpegDecoder,
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "people_counter=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting People Counter v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        detector_url = %config.detector_url,
        target_class = %config.target_class,
        min_confidence = config.min_confidence,
        subsample_factor = config.subsample_factor,
        recent_events = config.recent_events,
        frame_deadline_ms = ?config.frame_deadline.map(|d| d.as_millis()),
        max_upload_bytes = config.max_upload_bytes,
        temp_dir = %config.temp_dir.display(),
        "Configuration loaded"
    );

    // Initialize detector
    let detector = Arc::new(HttpDetector::new(
        config.detector_url.clone(),
        config.target(),
        config.detector_timeout,
    )?);
    if detector.health_check().await {
        tracing::info!(url = %detector.base_url(), "Detector reachable");
    } else {
        tracing::warn!(url = %detector.base_url(), "Detector not reachable, frames will fail until it is up");
    }

    // Initialize decoder
    let decoder = Arc::new(FfmpegDecoder::new(config.ffmpeg()));
    tracing::info!(ffmpeg = %config.ffmpeg_path, ffprobe = %config.ffprobe_path, "FfmpegDecoder initialized");

    let state = AppState::new(config, detector, decoder);

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Report payloads that were uploaded but never processed
    let payloads = state.payloads.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let stats = payloads.stats().await;
            if stats.pending > 0 {
                tracing::info!(
                    pending = stats.pending,
                    total_bytes = stats.total_bytes,
                    "Unprocessed video payloads held in memory"
                );
            }
        }
    });

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.registry.clone()))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(registry: Arc<ConnectionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    let notified = registry
        .broadcast(&ErrorReply {
            error: "Server shutting down".to_string(),
        })
        .await;
    tracing::info!(sessions = notified, "Shutdown signal received");
}
