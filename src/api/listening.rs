//! Listening endpoints: capture lifecycle, chunk retrieval and backlog depth

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::{BodyState, SuccessResponse, error_response};
use crate::capture::FetchOutcome;

/// Build listening router
pub fn router(state: Arc<BodyState>) -> Router {
    Router::new()
        .route("/start_listening", post(start_listening))
        .route("/stop_listening", post(stop_listening))
        .route("/get_audio_chunk", get(get_audio_chunk))
        .route("/get_server_buffer_length", get(get_server_buffer_length))
        .with_state(state)
}

/// Backlog depth response
#[derive(Debug, Serialize)]
pub struct BufferLengthResponse {
    pub length: usize,
}

/// Subscribe to the capture device and start buffering
async fn start_listening(
    State(state): State<Arc<BodyState>>,
) -> Result<Json<SuccessResponse>, ListeningError> {
    tracing::info!(depth = state.buffer().depth(), "start listening requested");

    let task_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || task_state.capture.start())
        .await
        .map_err(|e| ListeningError::Device(e.to_string()))?
        .map_err(|e| ListeningError::Device(e.to_string()))?;

    Ok(Json(SuccessResponse::ok()))
}

/// Stop buffering; queued chunks remain retrievable
async fn stop_listening(
    State(state): State<Arc<BodyState>>,
) -> Result<Json<SuccessResponse>, ListeningError> {
    tracing::info!(depth = state.buffer().depth(), "stop listening requested");

    let task_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || task_state.capture.stop())
        .await
        .map_err(|e| ListeningError::Device(e.to_string()))?
        .map_err(|e| ListeningError::Device(e.to_string()))?;

    Ok(Json(SuccessResponse::ok()))
}

/// Return the oldest chunk, waiting for one if the buffer is empty
///
/// Responds `204 No Content` once capture is stopped and the buffer is
/// drained, and `408 Request Timeout` if no chunk arrives in time.
async fn get_audio_chunk(State(state): State<Arc<BodyState>>) -> Result<Response, ListeningError> {
    let buffer = state.buffer();
    tracing::trace!(depth = buffer.depth(), "audio chunk requested");

    match buffer.fetch(state.fetch_timeout).await {
        FetchOutcome::Chunk(chunk) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            chunk.into_bytes(),
        )
            .into_response()),
        FetchOutcome::Closed => {
            tracing::debug!("capture stopped and drained, ending stream");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        FetchOutcome::TimedOut => Err(ListeningError::TimedOut),
    }
}

/// Report the number of queued chunks
async fn get_server_buffer_length(State(state): State<Arc<BodyState>>) -> Json<BufferLengthResponse> {
    Json(BufferLengthResponse {
        length: state.buffer().depth(),
    })
}

/// Listening API errors
#[derive(Debug)]
pub enum ListeningError {
    Device(String),
    TimedOut,
}

impl IntoResponse for ListeningError {
    fn into_response(self) -> Response {
        match self {
            Self::Device(msg) => {
                tracing::error!(error = %msg, "capture device failure");
                error_response(StatusCode::SERVICE_UNAVAILABLE, "device_unavailable", msg)
            }
            Self::TimedOut => error_response(
                StatusCode::REQUEST_TIMEOUT,
                "no_audio",
                "no audio captured before the fetch timeout".to_string(),
            ),
        }
    }
}
