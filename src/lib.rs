//! NAO bridge - speech and listening loop for a NAO robot
//!
//! The robot side (the *body*) captures microphone audio into a buffer and
//! serves it chunk by chunk over HTTP. The remote side (the *brain*) pulls
//! chunks at a rate steered by the body's backlog, segments phrases,
//! transcribes them, asks a chat model for a reply and sends the reply back
//! to the body to be spoken.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── body ────────────────────────┐
//! │  CaptureDevice ─▶ CaptureController ─▶ CaptureBuffer │
//! │                      HTTP API (axum)     Speaker      │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ /get_audio_chunk, /talk, ...
//! ┌──────────────────────────▼──────── brain ────────────┐
//! │  AdaptivePuller ─▶ AudioStream ─▶ PhraseRecorder      │
//! │  Transcriber ─▶ ChatContext/ChatModel ─▶ BodyClient   │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod brain;
pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
