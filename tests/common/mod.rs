//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use nao_bridge::api::BodyState;
use nao_bridge::capture::{
    AudioFrame, BufferLimits, CaptureBuffer, CaptureController, CaptureDevice, FrameSink,
};
use nao_bridge::voice::Speaker;
use nao_bridge::{Error, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Capture device driven by the test instead of hardware
#[derive(Default)]
pub struct ManualDevice {
    sink: Mutex<Option<FrameSink>>,
    pub subscriptions: AtomicUsize,
    fail_next: AtomicBool,
}

impl ManualDevice {
    /// Make the next subscription attempt fail
    pub fn fail_next_subscribe(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Deliver a frame if subscribed
    pub fn push(&self, data: impl Into<Bytes>) {
        let data = data.into();
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(AudioFrame {
                channels: 1,
                samples_per_channel: data.len() / 2,
                timestamp: Utc::now(),
                data,
            });
        }
    }

    /// Wait until the device has been subscribed
    pub async fn wait_subscribed(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.is_subscribed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("device was never subscribed");
    }
}

impl CaptureDevice for ManualDevice {
    fn name(&self) -> &str {
        "manual"
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn subscribe(&self, sink: FrameSink) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Device("device busy".to_string()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn unsubscribe(&self) -> Result<()> {
        *self.sink.lock().unwrap() = None;
        Ok(())
    }

    fn is_subscribed(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }
}

/// Speaker that remembers what it was asked to say
#[derive(Default)]
pub struct RecordingSpeaker {
    pub spoken: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Audio("no output device".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Everything a body test needs to drive and inspect the server
pub struct TestBody {
    pub device: Arc<ManualDevice>,
    pub speaker: Arc<RecordingSpeaker>,
    pub state: Arc<BodyState>,
}

impl TestBody {
    pub fn new(limits: BufferLimits, fetch_timeout: Option<Duration>) -> Self {
        let device = Arc::new(ManualDevice::default());
        let speaker = Arc::new(RecordingSpeaker::default());
        let capture = CaptureController::new(
            Arc::clone(&device) as Arc<dyn CaptureDevice>,
            Arc::new(CaptureBuffer::new(limits)),
        );
        let state = Arc::new(
            BodyState::new(capture, Arc::clone(&speaker) as Arc<dyn Speaker>)
                .with_fetch_timeout(fetch_timeout),
        );
        Self {
            device,
            speaker,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        nao_bridge::api::router(Arc::clone(&self.state))
    }

    /// Serve on an ephemeral port, returning the base URL
    pub async fn serve(&self) -> (String, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let server = nao_bridge::api::BodyServer::new(Arc::clone(&self.state), "127.0.0.1", 0);
        let token = shutdown.clone();
        tokio::spawn(async move { server.serve(listener, token).await });

        (format!("http://{addr}"), shutdown)
    }
}

impl Default for TestBody {
    fn default() -> Self {
        Self::new(BufferLimits::unbounded(), Some(Duration::from_secs(5)))
    }
}

/// PCM frame of `samples` copies of `value`
pub fn pcm(value: i16, samples: usize) -> Bytes {
    let mut bytes = Vec::with_capacity(samples * 2);
    for _ in 0..samples {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    Bytes::from(bytes)
}
