//! Ties a capture device to the capture buffer

use std::sync::{Arc, Mutex, PoisonError};

use super::buffer::{AppendOutcome, AudioChunk, CaptureBuffer};
use super::device::{AudioFrame, CaptureDevice, FrameSink};
use crate::Result;

/// Starts and stops capture, routing device frames into the buffer
///
/// Start and stop are serialized so a device is never subscribed twice.
pub struct CaptureController {
    device: Arc<dyn CaptureDevice>,
    buffer: Arc<CaptureBuffer>,
    lifecycle: Mutex<()>,
}

impl CaptureController {
    /// Create a controller; capture starts stopped
    #[must_use]
    pub fn new(device: Arc<dyn CaptureDevice>, buffer: Arc<CaptureBuffer>) -> Self {
        Self {
            device,
            buffer,
            lifecycle: Mutex::new(()),
        }
    }

    /// The buffer frames are routed into
    #[must_use]
    pub const fn buffer(&self) -> &Arc<CaptureBuffer> {
        &self.buffer
    }

    /// The underlying capture device
    #[must_use]
    pub fn device(&self) -> &dyn CaptureDevice {
        self.device.as_ref()
    }

    /// Subscribe to the device and start buffering
    ///
    /// Calling this while already listening is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the device subscription fails; the buffer stays
    /// stopped so the call can be retried.
    pub fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);

        if self.buffer.is_listening() && self.device.is_subscribed() {
            return Ok(());
        }

        if !self.device.is_subscribed() {
            self.device.subscribe(self.sink())?;
        }
        self.buffer.start();

        tracing::info!(
            device = self.device.name(),
            depth = self.buffer.depth(),
            "listening started"
        );
        Ok(())
    }

    /// Stop buffering and unsubscribe from the device
    ///
    /// Queued chunks stay available for retrieval.
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to unsubscribe
    pub fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);

        self.buffer.stop();
        if self.device.is_subscribed() {
            self.device.unsubscribe()?;
        }

        tracing::info!(depth = self.buffer.depth(), "listening stopped");
        Ok(())
    }

    fn sink(&self) -> FrameSink {
        let buffer = Arc::clone(&self.buffer);
        Arc::new(move |frame: AudioFrame| {
            tracing::trace!(
                channels = frame.channels,
                samples = frame.samples_per_channel,
                timestamp = %frame.timestamp,
                bytes = frame.data.len(),
                "received audio frame"
            );
            if buffer.append(AudioChunk::new(frame.data)) == AppendOutcome::EvictedOldest {
                tracing::debug!("capture buffer full, evicted oldest chunk");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Bytes;
    use chrono::Utc;

    use super::*;
    use crate::Error;

    /// Device that hands its sink back to the test for manual pushes
    #[derive(Default)]
    struct ManualDevice {
        sink: Mutex<Option<FrameSink>>,
        subscriptions: AtomicUsize,
        fail_next: Mutex<bool>,
    }

    impl ManualDevice {
        fn push(&self, data: &'static [u8]) {
            let sink = self.sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                sink(AudioFrame {
                    channels: 1,
                    samples_per_channel: data.len() / 2,
                    timestamp: Utc::now(),
                    data: Bytes::from_static(data),
                });
            }
        }
    }

    impl CaptureDevice for ManualDevice {
        fn name(&self) -> &str {
            "manual"
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn subscribe(&self, sink: FrameSink) -> Result<()> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
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

    fn controller() -> (Arc<ManualDevice>, CaptureController) {
        let device = Arc::new(ManualDevice::default());
        let controller = CaptureController::new(
            Arc::clone(&device) as Arc<dyn CaptureDevice>,
            Arc::new(CaptureBuffer::default()),
        );
        (device, controller)
    }

    #[test]
    fn frames_reach_buffer_while_listening() {
        let (device, controller) = controller();
        controller.start().unwrap();

        device.push(b"ab");
        device.push(b"cd");

        assert_eq!(controller.buffer().depth(), 2);
        assert_eq!(
            controller.buffer().pop_oldest(),
            Some(AudioChunk::from(&b"ab"[..]))
        );
    }

    #[test]
    fn repeated_start_subscribes_once() {
        let (device, controller) = controller();
        controller.start().unwrap();
        controller.start().unwrap();

        assert_eq!(device.subscriptions.load(Ordering::SeqCst), 1);
        assert!(controller.buffer().is_listening());
    }

    #[test]
    fn stop_unsubscribes_and_keeps_chunks() {
        let (device, controller) = controller();
        controller.start().unwrap();
        device.push(b"ab");
        controller.stop().unwrap();

        assert!(!device.is_subscribed());
        assert!(!controller.buffer().is_listening());
        assert_eq!(controller.buffer().depth(), 1);
    }

    #[test]
    fn failed_subscription_can_be_retried() {
        let (device, controller) = controller();
        *device.fail_next.lock().unwrap() = true;

        assert!(controller.start().is_err());
        assert!(!controller.buffer().is_listening());

        controller.start().unwrap();
        assert!(controller.buffer().is_listening());
        assert_eq!(device.subscriptions.load(Ordering::SeqCst), 1);
    }
}
