//! Audio capture on the body side
//!
//! Frames pushed by a [`CaptureDevice`] land in a [`CaptureBuffer`], which
//! the chunk endpoint drains in FIFO order.

mod buffer;
mod controller;
mod device;

pub use buffer::{
    AppendOutcome, AudioChunk, BufferLimits, CaptureBuffer, FetchOutcome, OverflowPolicy,
};
pub use controller::CaptureController;
pub use device::{
    AudioFrame, CaptureDevice, FrameSink, MicrophoneDevice, ReplayDevice, SAMPLE_RATE,
    SAMPLE_WIDTH,
};
