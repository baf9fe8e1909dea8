// pixpack/src/server/mod.rs
use crate::core::PipelineError;
use crate::processors::BatchPipeline;
use crate::progress::ProgressBroadcaster;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

mod progress;
mod upload;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8081)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Shared by every request. The broadcaster lives as long as the server.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<BatchPipeline>,
    pub broadcaster: ProgressBroadcaster,
}

impl AppState {
    pub fn new(pipeline: BatchPipeline) -> Self {
        let broadcaster = pipeline.broadcaster().clone();
        Self {
            pipeline: Arc::new(pipeline),
            broadcaster,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/progress", get(progress::progress_feed))
        .route("/mix", post(upload::submit_batch))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Serves until `cancel` fires. Open progress feeds are closed on shutdown so
/// the graceful drain does not wait on them forever.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    max_upload_bytes: usize,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let broadcaster = state.broadcaster.clone();
    let app = router(state, max_upload_bytes);

    log::info!("API server started on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel, broadcaster))
        .await?;
    log::info!("API server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken, broadcaster: ProgressBroadcaster) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
    broadcaster.close();
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u8,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// JSON error reply. Only usable before any archive bytes have been sent.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            error: None,
        }
    }

    pub fn processing(error: impl Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "File processing failed!".to_string(),
            error: Some(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.error {
            Some(error) => log::error!("{} ({}): {}", self.message, self.status, error),
            None => log::warn!("{} ({})", self.message, self.status),
        }

        let body = ErrorBody {
            status_code: 0,
            message: self.message,
            error: self.error,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::EmptyBatch => Self::bad_request(err.to_string()),
            other => Self::processing(other),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            message: "Malformed upload".to_string(),
            error: Some(err.body_text()),
        }
    }
}
