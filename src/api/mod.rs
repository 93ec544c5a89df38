//! HTTP server for the robot body
//!
//! Exposes capture control, chunk retrieval and speech output to the brain.

pub mod health;
pub mod listening;
pub mod talk;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::capture::{CaptureBuffer, CaptureController};
use crate::voice::Speaker;

/// Shared state for body handlers
pub struct BodyState {
    pub capture: CaptureController,
    pub speaker: Arc<dyn Speaker>,
    /// Longest a chunk request waits for audio (`None` waits forever)
    pub fetch_timeout: Option<Duration>,
}

impl BodyState {
    /// Create state with no fetch timeout
    #[must_use]
    pub fn new(capture: CaptureController, speaker: Arc<dyn Speaker>) -> Self {
        Self {
            capture,
            speaker,
            fetch_timeout: None,
        }
    }

    /// Set the chunk fetch timeout
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// The capture buffer behind the listening endpoints
    #[must_use]
    pub const fn buffer(&self) -> &Arc<CaptureBuffer> {
        self.capture.buffer()
    }
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    #[must_use]
    pub const fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Render an error body as `{"error": {"code", "message"}}`
pub(crate) fn error_response(status: StatusCode, code: &'static str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail { code, message },
        }),
    )
        .into_response()
}

/// Build the body router with all routes
pub fn router(state: Arc<BodyState>) -> Router {
    Router::new()
        .merge(listening::router(Arc::clone(&state)))
        .merge(talk::router(state))
        .merge(health::router())
        .layer(TraceLayer::new_for_http())
}

/// Body HTTP server
pub struct BodyServer {
    state: Arc<BodyState>,
    host: String,
    port: u16,
}

impl BodyServer {
    #[must_use]
    pub fn new(state: Arc<BodyState>, host: impl Into<String>, port: u16) -> Self {
        Self {
            state,
            host: host.into(),
            port,
        }
    }

    /// Bind the configured address and serve until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind body server: {e}")))?;

        tracing::info!(addr = %addr, "body server listening");

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires
    ///
    /// On shutdown capture is stopped so pending chunk requests drain and
    /// complete with end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let state = Arc::clone(&self.state);
        let app = router(Arc::clone(&self.state));

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("body server shutting down");
                let stopped = tokio::task::spawn_blocking(move || state.capture.stop()).await;
                match stopped {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "failed to stop capture"),
                    Err(e) => tracing::warn!(error = %e, "capture stop task failed"),
                }
            })
            .await
            .map_err(|e| crate::Error::Config(format!("body server error: {e}")))?;

        Ok(())
    }

    /// Run the body server in a background task
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
