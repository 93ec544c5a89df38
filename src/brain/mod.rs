//! The robot's brain: listen, transcribe, think, reply
//!
//! Each exchange records one phrase through a [`ListeningSession`],
//! transcribes it, asks the chat model for a reply and sends the reply to
//! the body to be spoken. The conversation is written to a log after every
//! exchange.

mod chat;
mod recorder;
mod stt;
mod transcript;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

pub use chat::{
    ChatClient, ChatContext, ChatMessage, ChatModel, Role, TokenBudget, count_text_tokens,
};
pub use recorder::{Phrase, PhraseRecorder, rms};
pub use stt::{TranscribeError, Transcriber, WhisperTranscriber, normalize_transcript};
pub use transcript::{render_conversation, save_conversation};

use crate::client::{BodyClient, ListeningSession, PullRate};
use crate::config::Config;
use crate::{Error, Result};

/// Conversation loop state
pub struct Conversation {
    body: BodyClient,
    rate: PullRate,
    recorder: PhraseRecorder,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatModel>,
    context: ChatContext,
    budget: TokenBudget,
    retry_delay: Duration,
    recording_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

impl Conversation {
    /// Create a conversation with default budget and retry settings
    #[must_use]
    pub fn new(
        body: BodyClient,
        rate: PullRate,
        recorder: PhraseRecorder,
        transcriber: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatModel>,
        context: ChatContext,
    ) -> Self {
        Self {
            body,
            rate,
            recorder,
            transcriber,
            chat,
            context,
            budget: TokenBudget::default(),
            retry_delay: Duration::from_millis(100),
            recording_path: None,
            log_path: None,
        }
    }

    /// Build the conversation from configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured or the system prompt
    /// cannot be read or leaves no room for a turn within the token limit
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_keys.openai.clone().ok_or_else(|| {
            Error::Config("OPENAI_API_KEY is required to run the brain".to_string())
        })?;

        let transcriber =
            WhisperTranscriber::new(api_key.clone(), &config.recognizer, &config.speech)?;
        let chat = ChatClient::new(api_key, &config.chat, &config.speech)?;
        let context = ChatContext::from_prompt_file(&config.chat.system_prompt_path)?;
        let budget = TokenBudget::from(&config.chat);
        context.check_budget(budget)?;

        Ok(Self::new(
            BodyClient::new(config.stream.body_url.clone())?,
            PullRate::from(&config.stream),
            PhraseRecorder::new(&config.recognizer, config.stream.sample_rate),
            Arc::new(transcriber),
            Arc::new(chat),
            context,
        )
        .with_budget(budget)
        .with_retry_delay(config.recognizer.retry_delay)
        .with_recording_path(config.recognizer.recording_path.clone())
        .with_log_path(Some(config.chat.log_path.clone())))
    }

    #[must_use]
    pub const fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Delay before resubmitting audio after a network failure
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Where to keep the most recent recording as WAV
    #[must_use]
    pub fn with_recording_path(mut self, path: Option<PathBuf>) -> Self {
        self.recording_path = path;
        self
    }

    /// Where to write the conversation log
    #[must_use]
    pub fn with_log_path(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = path;
        self
    }

    #[must_use]
    pub const fn context(&self) -> &ChatContext {
        &self.context
    }

    /// Record phrases until one contains speech
    async fn record_phrase(&self) -> Result<Phrase> {
        loop {
            let mut session = ListeningSession::open(self.body.clone(), self.rate).await?;
            tracing::info!("recording");
            let start = Instant::now();

            let phrase = self.recorder.record(session.stream()).await;
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "failed to stop listening");
            }

            if let Some(phrase) = phrase {
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis(),
                    audio_ms = phrase.duration().as_millis(),
                    "recording complete"
                );
                if let Some(path) = &self.recording_path {
                    if let Err(e) = phrase.save(path).await {
                        tracing::warn!(error = %e, "failed to save recording");
                    }
                }
                return Ok(phrase);
            }

            tracing::warn!("audio stream ended before speech, listening again");
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Record and transcribe until the user says something intelligible
    ///
    /// Network failures resubmit the same audio after the retry delay.
    /// Unintelligible speech and transcription timeouts discard the phrase
    /// and record a new one.
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be reached or the transcription
    /// service rejects the request
    pub async fn get_user_text(&self) -> Result<String> {
        let mut pending: Option<Vec<u8>> = None;

        loop {
            let audio = match pending.take() {
                Some(audio) => audio,
                None => self.record_phrase().await?.to_wav()?,
            };

            tracing::info!("transcribing");
            let start = Instant::now();
            match self.transcriber.transcribe(&audio).await {
                Ok(text) => {
                    tracing::info!(
                        elapsed_ms = start.elapsed().as_millis(),
                        text = %text,
                        "user said"
                    );
                    return Ok(text);
                }
                Err(e) if e.retry_same_audio() => {
                    tracing::warn!(error = %e, "transcription network error, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    pending = Some(audio);
                }
                Err(e) if e.rerecord() => {
                    tracing::warn!(error = %e, "transcription failed, recording again");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run one full exchange and return the reply
    ///
    /// # Errors
    ///
    /// Returns error if listening, transcription or chat fails, or if the
    /// user's turn does not fit the token budget; a failure to speak the
    /// reply is logged and does not fail the exchange
    pub async fn exchange(&mut self) -> Result<String> {
        let user_text = self.get_user_text().await?;

        self.context.push(ChatMessage::user(user_text));
        if let Err(e) = self.context.trim(self.budget) {
            self.context.pop();
            return Err(e);
        }

        let reply = match self.chat.complete(self.context.messages()).await {
            Ok(reply) => reply,
            Err(e) => {
                self.context.pop();
                return Err(e);
            }
        };
        tracing::info!(reply = %reply, "nao replies");

        if let Err(e) = self.body.talk(&reply).await {
            tracing::warn!(error = %e, "failed to send reply to body");
        }

        self.context.push(ChatMessage::assistant(reply.clone()));

        if let Some(path) = &self.log_path {
            if let Err(e) = save_conversation(self.context.messages(), path).await {
                tracing::warn!(error = %e, "failed to save conversation");
            }
        }

        Ok(reply)
    }

    /// Converse until `shutdown` fires
    ///
    /// Transient failures are logged and the exchange is retried.
    ///
    /// # Errors
    ///
    /// Returns error on configuration problems or a rejected transcription
    /// request
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(body = self.body.base_url(), "conversation started");

        loop {
            let result = tokio::select! {
                () = shutdown.cancelled() => None,
                result = self.exchange() => Some(result),
            };

            let Some(result) = result else {
                if let Err(e) = self.body.stop_listening().await {
                    tracing::debug!(error = %e, "stop listening on shutdown failed");
                }
                tracing::info!("conversation stopped");
                return Ok(());
            };

            match result {
                Ok(_) => {}
                Err(e @ (Error::Config(_) | Error::Stt(_))) => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "exchange failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
