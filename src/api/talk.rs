//! Speech endpoint

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;

use super::{BodyState, SuccessResponse, error_response};

/// Build talk router
pub fn router(state: Arc<BodyState>) -> Router {
    Router::new().route("/talk", post(talk)).with_state(state)
}

/// Talk request
#[derive(Debug, Deserialize)]
pub struct TalkRequest {
    pub message: String,
}

/// Say the message out loud
async fn talk(
    State(state): State<Arc<BodyState>>,
    Json(request): Json<TalkRequest>,
) -> Result<Json<SuccessResponse>, TalkError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(TalkError::BadRequest("Empty message"));
    }

    tracing::info!(chars = message.len(), "talk requested");

    state
        .speaker
        .speak(message)
        .await
        .map_err(|e| TalkError::SpeechFailed(e.to_string()))?;

    Ok(Json(SuccessResponse::ok()))
}

/// Talk API errors
#[derive(Debug)]
pub enum TalkError {
    BadRequest(&'static str),
    SpeechFailed(String),
}

impl IntoResponse for TalkError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => {
                error_response(StatusCode::BAD_REQUEST, "bad_request", msg.to_string())
            }
            Self::SpeechFailed(msg) => {
                tracing::error!(error = %msg, "speech failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "speech_failed", msg)
            }
        }
    }
}
