//! Capture devices that push audio frames into a callback
//!
//! A device is subscribed once with a [`FrameSink`] and then invokes it
//! from its own thread every time the hardware delivers a buffer.

use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per captured sample (16-bit little-endian PCM)
pub const SAMPLE_WIDTH: usize = 2;

/// One buffer delivered by the capture hardware
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Number of channels in `data` (always 1 after channel selection)
    pub channels: u16,
    /// Samples per channel in `data`
    pub samples_per_channel: usize,
    /// Wall-clock time the buffer was received
    pub timestamp: DateTime<Utc>,
    /// Raw 16-bit little-endian PCM
    pub data: Bytes,
}

/// Callback invoked by a device for every captured frame
pub type FrameSink = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// A source of captured audio
pub trait CaptureDevice: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Sample rate of delivered frames
    fn sample_rate(&self) -> u32;

    /// Begin delivering frames to `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or started
    fn subscribe(&self, sink: FrameSink) -> Result<()>;

    /// Stop delivering frames
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to stop cleanly
    fn unsubscribe(&self) -> Result<()>;

    /// Whether frames are currently being delivered
    fn is_subscribed(&self) -> bool;
}

/// Handle to a capture thread that runs until its stop channel closes
struct Worker {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn shutdown(self) -> Result<()> {
        // A send error means the thread already exited on its own
        let _ = self.stop.send(());
        self.thread
            .join()
            .map_err(|_| Error::Device("capture thread panicked".to_string()))
    }
}

/// Captures from the default input device via cpal
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
/// that holds it until [`CaptureDevice::unsubscribe`] is called.
pub struct MicrophoneDevice {
    name: String,
    config: StreamConfig,
    worker: Mutex<Option<Worker>>,
}

impl MicrophoneDevice {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports 16kHz capture
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();
        let name = device.name().unwrap_or_default();

        tracing::debug!(
            device = %name,
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            name,
            config,
            worker: Mutex::new(None),
        })
    }

    fn run_stream(
        config: &StreamConfig,
        sink: FrameSink,
        ready: &mpsc::Sender<Result<()>>,
        stop: &mpsc::Receiver<()>,
    ) {
        let stream = match Self::build_stream(config, sink) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let _ = ready.send(Ok(()));
        // Blocks until a stop is requested or the device handle is dropped
        let _ = stop.recv();
        drop(stream);
        tracing::debug!("audio capture stopped");
    }

    fn build_stream(config: &StreamConfig, sink: FrameSink) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device".to_string()))?;

        let channels = usize::from(config.channels.max(1));

        let stream = device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink(frame_from_interleaved(data, channels));
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        Ok(stream)
    }
}

impl CaptureDevice for MicrophoneDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn subscribe(&self, sink: FrameSink) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || Self::run_stream(&config, sink, &ready_tx, &stop_rx))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Device("capture thread exited during start".to_string()))??;

        *worker = Some(Worker {
            stop: stop_tx,
            thread,
        });
        tracing::debug!(device = %self.name, "audio capture started");
        Ok(())
    }

    fn unsubscribe(&self) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        worker.map_or(Ok(()), Worker::shutdown)
    }

    fn is_subscribed(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.is_some())
            .unwrap_or_default()
    }
}

/// Replays a mono 16kHz WAV file at real-time pace, as if captured live
///
/// Useful for running the body without microphone hardware.
pub struct ReplayDevice {
    name: String,
    samples: Arc<Vec<i16>>,
    samples_per_chunk: usize,
    worker: Mutex<Option<Worker>>,
}

impl ReplayDevice {
    /// Load a WAV file for replay
    ///
    /// # Errors
    ///
    /// Returns error if the file is not 16-bit mono PCM at 16kHz
    pub fn from_wav(path: &Path, samples_per_chunk: usize) -> Result<Self> {
        let reader = hound::WavReader::open(path).map_err(|e| Error::Device(e.to_string()))?;
        let spec = reader.spec();

        if spec.channels != 1
            || spec.sample_rate != SAMPLE_RATE
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(Error::Device(format!(
                "replay file must be 16-bit mono at {SAMPLE_RATE} Hz, got {spec:?}"
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self::from_samples(
            path.display().to_string(),
            samples,
            samples_per_chunk,
        ))
    }

    /// Replay in-memory samples
    #[must_use]
    pub fn from_samples(name: String, samples: Vec<i16>, samples_per_chunk: usize) -> Self {
        Self {
            name,
            samples: Arc::new(samples),
            samples_per_chunk: samples_per_chunk.max(1),
            worker: Mutex::new(None),
        }
    }

    fn chunk_duration(&self) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        Duration::from_secs_f64(self.samples_per_chunk as f64 / f64::from(SAMPLE_RATE))
    }
}

impl CaptureDevice for ReplayDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn subscribe(&self, sink: FrameSink) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let samples = Arc::clone(&self.samples);
        let per_chunk = self.samples_per_chunk;
        let pace = self.chunk_duration();

        let thread = std::thread::Builder::new()
            .name("audio-replay".to_string())
            .spawn(move || {
                for chunk in samples.chunks(per_chunk) {
                    if !matches!(stop_rx.recv_timeout(pace), Err(mpsc::RecvTimeoutError::Timeout)) {
                        return;
                    }
                    sink(frame_from_pcm(chunk));
                }
                tracing::debug!("replay finished");
            })?;

        *worker = Some(Worker {
            stop: stop_tx,
            thread,
        });
        Ok(())
    }

    fn unsubscribe(&self) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        worker.map_or(Ok(()), Worker::shutdown)
    }

    fn is_subscribed(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.is_some())
            .unwrap_or_default()
    }
}

/// Build a frame from interleaved f32 samples, keeping only the first channel
fn frame_from_interleaved(data: &[f32], channels: usize) -> AudioFrame {
    let mut bytes = Vec::with_capacity(data.len() / channels * SAMPLE_WIDTH);
    for frame in data.chunks(channels) {
        #[allow(clippy::cast_possible_truncation)]
        let sample = (frame[0] * 32767.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    AudioFrame {
        channels: 1,
        samples_per_channel: bytes.len() / SAMPLE_WIDTH,
        timestamp: Utc::now(),
        data: Bytes::from(bytes),
    }
}

/// Build a frame from mono 16-bit samples
fn frame_from_pcm(samples: &[i16]) -> AudioFrame {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    AudioFrame {
        channels: 1,
        samples_per_channel: samples.len(),
        timestamp: Utc::now(),
        data: Bytes::from(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_frame_keeps_first_channel() {
        let data = [0.5f32, -1.0, -0.5, 1.0, 0.0, 1.0];
        let frame = frame_from_interleaved(&data, 2);

        assert_eq!(frame.channels, 1);
        assert_eq!(frame.samples_per_channel, 3);

        let samples: Vec<i16> = frame
            .data
            .chunks(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![16383, -16383, 0]);
    }

    #[test]
    fn mono_frame_is_little_endian() {
        let frame = frame_from_pcm(&[1, -2]);
        assert_eq!(frame.samples_per_channel, 2);
        assert_eq!(frame.data.as_ref(), &[1, 0, 0xFE, 0xFF]);
    }

    #[test]
    fn replay_delivers_every_sample_in_order() {
        let samples: Vec<i16> = (0..64).collect();
        let device = ReplayDevice::from_samples("test".to_string(), samples.clone(), 16);

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sink: FrameSink = Arc::new(move |frame: AudioFrame| {
            let _ = tx.lock().unwrap().send(frame);
        });

        device.subscribe(sink).unwrap();
        assert!(device.is_subscribed());

        let mut replayed = Vec::new();
        for _ in 0..4 {
            let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(frame.samples_per_channel, 16);
            replayed.extend(
                frame
                    .data
                    .chunks(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]])),
            );
        }

        device.unsubscribe().unwrap();
        assert!(!device.is_subscribed());
        assert_eq!(replayed, samples);
    }

    #[test]
    fn replay_rejects_wrong_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(
            ReplayDevice::from_wav(&path, 1365),
            Err(Error::Device(_))
        ));
    }
}
