//! Speech-to-text for recorded phrases

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{RecognizerConfig, SpeechConfig};

/// Why a transcription attempt failed
///
/// Network failures are worth retrying with the same audio; an
/// unintelligible phrase or a timeout means the phrase should be recorded
/// again.
#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("speech could not be understood")]
    Unintelligible,

    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),

    #[error("transcription API error {status}: {body}")]
    Api { status: u16, body: String },
}

impl TranscribeError {
    /// Whether the same audio should be submitted again
    #[must_use]
    pub const fn retry_same_audio(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether the phrase should be discarded and recorded again
    #[must_use]
    pub const fn rerecord(&self) -> bool {
        matches!(self, Self::Unintelligible | Self::Timeout(_))
    }
}

/// Turns a WAV recording into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns a classified [`TranscribeError`]
    async fn transcribe(&self, wav: &[u8]) -> Result<String, TranscribeError>;
}

#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes with an OpenAI-compatible `/audio/transcriptions` endpoint
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    operation_timeout: Duration,
}

impl WhisperTranscriber {
    /// Create a transcriber
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(
        api_key: SecretString,
        recognizer: &RecognizerConfig,
        speech: &SpeechConfig,
    ) -> crate::Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(crate::Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: speech.api_base.trim_end_matches('/').to_string(),
            model: recognizer.stt_model.clone(),
            operation_timeout: recognizer.operation_timeout,
        })
    }

    async fn request(&self, wav: &[u8]) -> Result<String, TranscribeError> {
        let part = reqwest::multipart::Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        tracing::debug!(status = %status, "received transcription response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(TranscribeError::Network(format!("{status}: {body}")));
            }
            return Err(TranscribeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let result: WhisperResponse = response.json().await.map_err(|e| self.classify(&e))?;
        Ok(result.text)
    }

    fn classify(&self, e: &reqwest::Error) -> TranscribeError {
        if e.is_timeout() {
            TranscribeError::Timeout(self.operation_timeout)
        } else {
            TranscribeError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, TranscribeError> {
        tracing::debug!(audio_bytes = wav.len(), model = %self.model, "starting transcription");

        let text = tokio::time::timeout(self.operation_timeout, self.request(wav))
            .await
            .map_err(|_| TranscribeError::Timeout(self.operation_timeout))??;

        normalize_transcript(&text)
    }
}

/// Trim a transcript, treating blank output as unintelligible speech
///
/// # Errors
///
/// Returns [`TranscribeError::Unintelligible`] for an empty transcript
pub fn normalize_transcript(text: &str) -> Result<String, TranscribeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TranscribeError::Unintelligible);
    }
    tracing::info!(transcript = %text, "transcription complete");
    Ok(text.to_string())
}
