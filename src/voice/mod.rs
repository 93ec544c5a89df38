//! Speech output on the body side
//!
//! The body speaks whatever text the brain sends to `/talk`.

mod playback;
mod tts;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Mutex;

pub use playback::AudioPlayback;
pub use tts::TextToSpeech;

use crate::config::SpeechConfig;
use crate::{Error, Result};

/// Something that can say text out loud
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speak `text`, returning once it has been said
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Speaker that only logs the text, for bodies without speech output
#[derive(Debug, Default)]
pub struct LogSpeaker;

#[async_trait]
impl Speaker for LogSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        tracing::info!(text, "speak");
        Ok(())
    }
}

/// Synthesizes speech remotely and plays it on the local output device
///
/// Utterances are serialized so replies never overlap.
pub struct SynthSpeaker {
    tts: TextToSpeech,
    volume: f32,
    speaking: Mutex<()>,
}

impl SynthSpeaker {
    /// Create a speaker from speech settings
    ///
    /// # Errors
    ///
    /// Returns error if the TTS client cannot be configured
    pub fn new(api_key: SecretString, config: &SpeechConfig) -> Result<Self> {
        Ok(Self {
            tts: TextToSpeech::new(api_key, config)?,
            volume: config.volume,
            speaking: Mutex::new(()),
        })
    }
}

#[async_trait]
impl Speaker for SynthSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let _turn = self.speaking.lock().await;

        let audio = self.tts.synthesize(text).await?;
        let volume = self.volume;

        tokio::task::spawn_blocking(move || AudioPlayback::new(volume)?.play_mp3(&audio))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Pick a speaker for the configured API key
#[must_use]
pub fn speaker_from_config(api_key: Option<SecretString>, config: &SpeechConfig) -> Arc<dyn Speaker> {
    match api_key.map(|key| SynthSpeaker::new(key, config)) {
        Some(Ok(speaker)) => Arc::new(speaker),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "speech synthesis unavailable, logging speech instead");
            Arc::new(LogSpeaker)
        }
        None => {
            tracing::info!("no API key configured, logging speech instead");
            Arc::new(LogSpeaker)
        }
    }
}
