//! TOML configuration file loading
//!
//! Supports `~/.config/nao-bridge/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::capture::OverflowPolicy;
use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NaoConfigFile {
    /// Body server settings
    #[serde(default)]
    pub body: BodyFileConfig,

    /// Brain-side audio pull settings
    #[serde(default)]
    pub stream: StreamFileConfig,

    /// Phrase detection and transcription settings
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,

    /// Chat completion settings
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Speech synthesis settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Body server configuration
#[derive(Debug, Default, Deserialize)]
pub struct BodyFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Maximum queued chunks (omit for unbounded)
    pub buffer_capacity: Option<usize>,
    /// "drop-oldest" or "reject-new"
    pub overflow: Option<OverflowPolicy>,
    /// Longest a chunk request may wait, in milliseconds (0 disables)
    pub fetch_timeout_ms: Option<u64>,
    /// WAV file to replay instead of the microphone
    pub replay_file: Option<PathBuf>,
}

/// Audio pull configuration
#[derive(Debug, Default, Deserialize)]
pub struct StreamFileConfig {
    pub body_url: Option<String>,
    pub sample_rate: Option<u32>,
    pub samples_per_chunk: Option<usize>,
    /// Fraction of a chunk's duration to wait between pulls at zero backlog
    pub slack: Option<f64>,
}

/// Phrase detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognizerFileConfig {
    pub energy_threshold: Option<f32>,
    pub pause_threshold_ms: Option<u64>,
    pub phrase_time_limit_ms: Option<u64>,
    pub operation_timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub stt_model: Option<String>,
    pub recording_path: Option<PathBuf>,
}

/// Chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    pub model: Option<String>,
    pub max_response_tokens: Option<usize>,
    pub token_limit: Option<usize>,
    pub system_prompt_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    pub api_base: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
    pub volume: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `NaoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NaoConfigFile {
    let Some(path) = config_file_path() else {
        return NaoConfigFile::default();
    };

    if !path.exists() {
        return NaoConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            NaoConfigFile::default()
        }
    }
}

/// Load a TOML config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file_from(path: &Path) -> Result<NaoConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/nao-bridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("nao-bridge").join("config.toml"))
}
