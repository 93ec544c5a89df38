//! Error types for the body and brain processes

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture device could not be opened or subscribed
    #[error("capture device error: {0}")]
    Device(String),

    /// Audio encoding, decoding or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// The body returned an unexpected response
    #[error("body error: {0}")]
    Body(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(#[from] crate::brain::TranscribeError),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat completion error
    #[error("chat error: {0}")]
    Chat(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
