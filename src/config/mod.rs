//! Configuration management for the body and brain processes
//!
//! Values are layered: environment variables override the TOML file, which
//! overrides built-in defaults. A `.env` file in the working directory is
//! loaded into the environment first.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::capture::{BufferLimits, OverflowPolicy, SAMPLE_RATE};
use crate::{Error, Result};

/// Default port the body listens on
pub const DEFAULT_BODY_PORT: u16 = 5004;

/// Default samples delivered per capture callback
pub const DEFAULT_SAMPLES_PER_CHUNK: usize = 1365;

/// Largest accepted pull slack
pub const MAX_SLACK: f64 = 10.0;

/// Bridge configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Body server configuration
    pub body: BodyConfig,

    /// Brain-side audio pull configuration
    pub stream: StreamConfig,

    /// Phrase detection and transcription configuration
    pub recognizer: RecognizerConfig,

    /// Chat completion configuration
    pub chat: ChatConfig,

    /// Speech synthesis configuration
    pub speech: SpeechConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Body server configuration
#[derive(Debug, Clone)]
pub struct BodyConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Capture buffer capacity and overflow policy
    pub limits: BufferLimits,

    /// Longest a chunk request waits for audio; `None` waits forever
    pub fetch_timeout: Option<Duration>,

    /// WAV file replayed instead of the microphone
    pub replay_file: Option<PathBuf>,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_BODY_PORT,
            limits: BufferLimits::unbounded(),
            fetch_timeout: Some(Duration::from_secs(30)),
            replay_file: None,
        }
    }
}

/// Audio pull configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base URL of the body server
    pub body_url: String,

    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per captured chunk
    pub samples_per_chunk: usize,

    /// Discount applied to a chunk's duration to absorb round-trip overhead
    pub slack: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            body_url: format!("http://localhost:{DEFAULT_BODY_PORT}"),
            sample_rate: SAMPLE_RATE,
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
            slack: 0.8,
        }
    }
}

/// Phrase detection and transcription configuration
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// RMS level (16-bit scale) above which audio counts as speech
    pub energy_threshold: f32,

    /// Silence that ends a phrase
    pub pause_threshold: Duration,

    /// Longest phrase recorded
    pub phrase_time_limit: Duration,

    /// Longest a transcription request may take
    pub operation_timeout: Duration,

    /// Delay before retrying a transcription after a network error
    pub retry_delay: Duration,

    /// Transcription model
    pub stt_model: String,

    /// Where the last recorded phrase is written, if anywhere
    pub recording_path: Option<PathBuf>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 300.0,
            pause_threshold: Duration::from_secs(1),
            phrase_time_limit: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(4),
            retry_delay: Duration::from_millis(100),
            stt_model: "whisper-1".to_string(),
            recording_path: Some(PathBuf::from("input.wav")),
        }
    }
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Chat model identifier
    pub model: String,

    /// Tokens reserved for the model's reply
    pub max_response_tokens: usize,

    /// Context window ceiling
    pub token_limit: usize,

    /// File holding the system prompt
    pub system_prompt_path: PathBuf,

    /// File the conversation is written to after every exchange
    pub log_path: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_response_tokens: 250,
            token_limit: 4096,
            system_prompt_path: PathBuf::from("system_prompt.txt"),
            log_path: PathBuf::from("conversation_context.txt"),
        }
    }
}

/// Speech synthesis configuration, shared by all OpenAI-compatible calls
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// API base URL (e.g. `https://api.openai.com/v1`)
    pub api_base: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Playback volume (0.0 to 1.0)
    pub volume: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            volume: 0.5,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// OpenAI-compatible API key (transcription, chat, speech)
    pub openai: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the default config file
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_file(file::load_config_file())
    }

    /// Load configuration from the environment and an explicit config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the configuration is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_file(file::load_config_file_from(path)?)
    }

    fn from_file(fc: file::NaoConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let capacity = env_parse("NAO_BUFFER_CAPACITY").or(fc.body.buffer_capacity);
        let overflow = std::env::var("NAO_OVERFLOW_POLICY")
            .ok()
            .map(|v| parse_overflow(&v))
            .transpose()?
            .or(fc.body.overflow)
            .unwrap_or_default();
        let limits = capacity.map_or_else(BufferLimits::unbounded, |cap| {
            BufferLimits::bounded(cap, overflow)
        });

        let fetch_timeout = env_parse::<u64>("NAO_FETCH_TIMEOUT_MS")
            .or(fc.body.fetch_timeout_ms)
            .map_or(defaults.body.fetch_timeout, |ms| {
                (ms > 0).then_some(Duration::from_millis(ms))
            });

        let body = BodyConfig {
            host: std::env::var("NAO_BODY_HOST")
                .ok()
                .or(fc.body.host)
                .unwrap_or(defaults.body.host),
            port: env_parse("NAO_BODY_PORT")
                .or(fc.body.port)
                .unwrap_or(defaults.body.port),
            limits,
            fetch_timeout,
            replay_file: std::env::var("NAO_REPLAY_FILE")
                .ok()
                .map(PathBuf::from)
                .or(fc.body.replay_file),
        };

        let stream = StreamConfig {
            body_url: std::env::var("NAO_BODY_URL")
                .ok()
                .or(fc.stream.body_url)
                .unwrap_or(defaults.stream.body_url),
            sample_rate: fc.stream.sample_rate.unwrap_or(defaults.stream.sample_rate),
            samples_per_chunk: fc
                .stream
                .samples_per_chunk
                .unwrap_or(defaults.stream.samples_per_chunk),
            slack: env_parse("NAO_PULL_SLACK")
                .or(fc.stream.slack)
                .unwrap_or(defaults.stream.slack),
        };

        let rd = defaults.recognizer;
        let rf = fc.recognizer;
        let recognizer = RecognizerConfig {
            energy_threshold: rf.energy_threshold.unwrap_or(rd.energy_threshold),
            pause_threshold: rf
                .pause_threshold_ms
                .map_or(rd.pause_threshold, Duration::from_millis),
            phrase_time_limit: rf
                .phrase_time_limit_ms
                .map_or(rd.phrase_time_limit, Duration::from_millis),
            operation_timeout: rf
                .operation_timeout_ms
                .map_or(rd.operation_timeout, Duration::from_millis),
            retry_delay: rf.retry_delay_ms.map_or(rd.retry_delay, Duration::from_millis),
            stt_model: rf.stt_model.unwrap_or(rd.stt_model),
            recording_path: rf.recording_path.or(rd.recording_path),
        };

        let chat = ChatConfig {
            model: std::env::var("NAO_CHAT_MODEL")
                .ok()
                .or(fc.chat.model)
                .unwrap_or(defaults.chat.model),
            max_response_tokens: fc
                .chat
                .max_response_tokens
                .unwrap_or(defaults.chat.max_response_tokens),
            token_limit: fc.chat.token_limit.unwrap_or(defaults.chat.token_limit),
            system_prompt_path: std::env::var("NAO_SYSTEM_PROMPT")
                .ok()
                .map(PathBuf::from)
                .or(fc.chat.system_prompt_path)
                .unwrap_or(defaults.chat.system_prompt_path),
            log_path: fc.chat.log_path.unwrap_or(defaults.chat.log_path),
        };

        let speech = SpeechConfig {
            api_base: std::env::var("OPENAI_API_BASE")
                .ok()
                .or(fc.speech.api_base)
                .unwrap_or(defaults.speech.api_base),
            tts_model: fc.speech.tts_model.unwrap_or(defaults.speech.tts_model),
            tts_voice: fc.speech.tts_voice.unwrap_or(defaults.speech.tts_voice),
            tts_speed: fc.speech.tts_speed.unwrap_or(defaults.speech.tts_speed),
            volume: env_parse("NAO_VOLUME")
                .or(fc.speech.volume)
                .unwrap_or(defaults.speech.volume),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(fc.api_keys.openai)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        let config = Self {
            body,
            stream,
            recognizer,
            chat,
            speech,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would break the pull loop or recorder
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.stream.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if self.stream.samples_per_chunk == 0 {
            return Err(Error::Config("samples_per_chunk must be positive".to_string()));
        }
        if !(self.stream.slack > 0.0 && self.stream.slack <= MAX_SLACK) {
            return Err(Error::Config(format!(
                "slack must be above 0 and at most {MAX_SLACK}, got {}",
                self.stream.slack
            )));
        }
        if !(0.0..=1.0).contains(&self.speech.volume) {
            return Err(Error::Config(format!(
                "volume must be between 0.0 and 1.0, got {}",
                self.speech.volume
            )));
        }
        if self.chat.max_response_tokens >= self.chat.token_limit {
            return Err(Error::Config(
                "max_response_tokens must be below token_limit".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse an overflow policy name
///
/// # Errors
///
/// Returns error for unknown policy names
pub fn parse_overflow(value: &str) -> Result<OverflowPolicy> {
    match value.trim().to_lowercase().as_str() {
        "drop-oldest" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
        "reject-new" | "reject_new" => Ok(OverflowPolicy::RejectNew),
        other => Err(Error::Config(format!("unknown overflow policy: {other}"))),
    }
}

/// Read and parse an environment variable, ignoring unparsable values
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    raw.parse().map_or_else(
        |_| {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable environment variable");
            None
        },
        Some,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn default_pull_cadence_matches_capture() {
        let stream = StreamConfig::default();
        assert_eq!(stream.sample_rate, 16000);
        assert_eq!(stream.samples_per_chunk, 1365);
        assert!((stream.slack - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn file_values_apply() {
        let fc: file::NaoConfigFile = toml::from_str(
            r#"
            [body]
            buffer_capacity = 32
            overflow = "reject-new"
            fetch_timeout_ms = 0

            [chat]
            token_limit = 8192
            "#,
        )
        .unwrap();

        let config = Config::from_file(fc).unwrap();
        assert_eq!(
            config.body.limits,
            BufferLimits::bounded(32, OverflowPolicy::RejectNew)
        );
        assert_eq!(config.body.fetch_timeout, None);
        assert_eq!(config.chat.token_limit, 8192);
    }

    #[test]
    fn rejects_non_positive_slack() {
        let mut config = Config::default();
        config.stream.slack = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_oversized_slack() {
        let mut config = Config::default();
        for slack in [1e300, f64::INFINITY, f64::NAN, MAX_SLACK + 0.1] {
            config.stream.slack = slack;
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{slack}");
        }
        config.stream.slack = MAX_SLACK;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_response_budget_over_limit() {
        let mut config = Config::default();
        config.chat.max_response_tokens = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_overflow_names() {
        assert_eq!(parse_overflow("drop-oldest").unwrap(), OverflowPolicy::DropOldest);
        assert_eq!(parse_overflow("REJECT_NEW").unwrap(), OverflowPolicy::RejectNew);
        assert!(parse_overflow("lifo").is_err());
    }
}
