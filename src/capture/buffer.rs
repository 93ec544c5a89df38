//! Process-lifetime FIFO of captured audio chunks
//!
//! The capture callback is the only producer; the chunk endpoint is the
//! only consumer. Appends and pops share one mutex over the queue, and
//! waiting consumers are woken through a [`Notify`] instead of polling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::body::Bytes;
use serde::Deserialize;
use tokio::sync::Notify;

/// One discrete unit of captured audio, as delivered by a single callback
///
/// Cloning is cheap: the bytes are reference counted and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Bytes);

impl AudioChunk {
    /// Wrap raw audio bytes
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take ownership of the underlying bytes
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Number of bytes in the chunk
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the chunk carries no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static [u8]> for AudioChunk {
    fn from(bytes: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(bytes))
    }
}

impl From<Bytes> for AudioChunk {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

/// What to do with an incoming chunk when a bounded buffer is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued chunk to make room
    #[default]
    DropOldest,
    /// Discard the incoming chunk
    RejectNew,
}

/// Capacity limits for a [`CaptureBuffer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferLimits {
    /// Maximum number of queued chunks; `None` means unbounded
    pub capacity: Option<usize>,
    /// Policy applied once `capacity` is reached
    pub overflow: OverflowPolicy,
}

impl BufferLimits {
    /// No capacity limit
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::DropOldest,
        }
    }

    /// Bound the queue to `capacity` chunks (at least one)
    #[must_use]
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            overflow,
        }
    }
}

/// Result of offering a chunk to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Chunk was enqueued at the tail
    Queued,
    /// Capture is stopped; chunk was discarded
    NotListening,
    /// Chunk was enqueued after evicting the oldest one
    EvictedOldest,
    /// Buffer is full; chunk was discarded
    Rejected,
}

/// Result of a blocking fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The oldest queued chunk
    Chunk(AudioChunk),
    /// Capture is stopped and the queue is drained
    Closed,
    /// No chunk arrived within the caller's timeout
    TimedOut,
}

/// Ordered holding area for captured audio
#[derive(Debug)]
pub struct CaptureBuffer {
    queue: Mutex<VecDeque<AudioChunk>>,
    listening: AtomicBool,
    arrivals: Notify,
    limits: BufferLimits,
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(BufferLimits::unbounded())
    }
}

impl CaptureBuffer {
    /// Create an empty, stopped buffer
    #[must_use]
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            listening: AtomicBool::new(false),
            arrivals: Notify::new(),
            limits,
        }
    }

    /// Capacity limits this buffer was built with
    #[must_use]
    pub const fn limits(&self) -> BufferLimits {
        self.limits
    }

    /// Start accepting chunks
    ///
    /// Returns `false` if the buffer was already listening.
    pub fn start(&self) -> bool {
        let was_listening = self.listening.swap(true, Ordering::SeqCst);
        if !was_listening {
            tracing::debug!(depth = self.depth(), "capture buffer listening");
        }
        !was_listening
    }

    /// Stop accepting chunks; queued chunks are kept
    ///
    /// Wakes every waiting fetch so it can observe end of stream once the
    /// queue drains. Returns `false` if the buffer was already stopped.
    pub fn stop(&self) -> bool {
        let was_listening = self.listening.swap(false, Ordering::SeqCst);
        self.arrivals.notify_waiters();
        if was_listening {
            tracing::debug!(depth = self.depth(), "capture buffer stopped");
        }
        was_listening
    }

    /// Whether chunks are currently accepted
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Offer a chunk from the capture callback
    pub fn append(&self, chunk: AudioChunk) -> AppendOutcome {
        if !self.is_listening() {
            return AppendOutcome::NotListening;
        }

        let outcome = {
            let mut queue = self.lock_queue();
            match self.limits.capacity {
                Some(capacity) if queue.len() >= capacity => match self.limits.overflow {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(chunk);
                        AppendOutcome::EvictedOldest
                    }
                    OverflowPolicy::RejectNew => AppendOutcome::Rejected,
                },
                _ => {
                    queue.push_back(chunk);
                    AppendOutcome::Queued
                }
            }
        };

        match outcome {
            AppendOutcome::Queued | AppendOutcome::EvictedOldest => {
                self.arrivals.notify_one();
            }
            AppendOutcome::Rejected => {
                tracing::debug!("capture buffer full, rejected chunk");
            }
            AppendOutcome::NotListening => {}
        }

        outcome
    }

    /// Remove and return the oldest chunk without waiting
    #[must_use]
    pub fn pop_oldest(&self) -> Option<AudioChunk> {
        self.lock_queue().pop_front()
    }

    /// Number of chunks queued and not yet retrieved
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock_queue().len()
    }

    /// Wait for the oldest chunk
    ///
    /// Returns as soon as a chunk is available. Returns
    /// [`FetchOutcome::Closed`] once capture is stopped and the queue is
    /// empty, and [`FetchOutcome::TimedOut`] if `timeout` elapses first.
    pub async fn fetch(&self, timeout: Option<Duration>) -> FetchOutcome {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_for_chunk())
                .await
                .unwrap_or(FetchOutcome::TimedOut),
            None => self.wait_for_chunk().await,
        }
    }

    async fn wait_for_chunk(&self) -> FetchOutcome {
        loop {
            // Register interest before checking the queue so an append
            // between the check and the await is not missed
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(chunk) = self.pop_oldest() {
                return FetchOutcome::Chunk(chunk);
            }
            if !self.is_listening() {
                return FetchOutcome::Closed;
            }

            notified.await;
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<AudioChunk>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn listening_buffer(limits: BufferLimits) -> CaptureBuffer {
        let buffer = CaptureBuffer::new(limits);
        buffer.start();
        buffer
    }

    #[test]
    fn pops_in_append_order() {
        let buffer = listening_buffer(BufferLimits::unbounded());
        for i in 0..10u8 {
            assert_eq!(buffer.append(AudioChunk::from(vec![i])), AppendOutcome::Queued);
        }

        for i in 0..10u8 {
            assert_eq!(buffer.pop_oldest(), Some(AudioChunk::from(vec![i])));
        }
        assert_eq!(buffer.pop_oldest(), None);
    }

    #[test]
    fn discards_while_stopped() {
        let buffer = CaptureBuffer::default();
        assert_eq!(
            buffer.append(AudioChunk::from(&b"early"[..])),
            AppendOutcome::NotListening
        );

        buffer.start();
        buffer.append(AudioChunk::from(&b"kept"[..]));
        buffer.stop();
        buffer.append(AudioChunk::from(&b"late"[..]));

        assert_eq!(buffer.pop_oldest(), Some(AudioChunk::from(&b"kept"[..])));
        assert_eq!(buffer.pop_oldest(), None);
    }

    #[test]
    fn stop_preserves_queued_chunks() {
        let buffer = listening_buffer(BufferLimits::unbounded());
        buffer.append(AudioChunk::from(&b"a"[..]));
        buffer.append(AudioChunk::from(&b"b"[..]));
        buffer.stop();

        assert_eq!(buffer.depth(), 2);
        assert!(!buffer.is_listening());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let buffer = CaptureBuffer::default();
        assert!(buffer.start());
        assert!(!buffer.start());
        assert!(buffer.is_listening());

        assert!(buffer.stop());
        assert!(!buffer.stop());
        assert!(!buffer.is_listening());
    }

    #[test]
    fn depth_tracks_queue_length() {
        let buffer = listening_buffer(BufferLimits::unbounded());
        assert_eq!(buffer.depth(), 0);
        buffer.append(AudioChunk::from(&b"a"[..]));
        buffer.append(AudioChunk::from(&b"b"[..]));
        assert_eq!(buffer.depth(), 2);
        let _ = buffer.pop_oldest();
        assert_eq!(buffer.depth(), 1);
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let buffer = listening_buffer(BufferLimits::bounded(2, OverflowPolicy::DropOldest));
        buffer.append(AudioChunk::from(&b"a"[..]));
        buffer.append(AudioChunk::from(&b"b"[..]));
        assert_eq!(
            buffer.append(AudioChunk::from(&b"c"[..])),
            AppendOutcome::EvictedOldest
        );

        assert_eq!(buffer.depth(), 2);
        assert_eq!(buffer.pop_oldest(), Some(AudioChunk::from(&b"b"[..])));
        assert_eq!(buffer.pop_oldest(), Some(AudioChunk::from(&b"c"[..])));
    }

    #[test]
    fn reject_new_keeps_existing() {
        let buffer = listening_buffer(BufferLimits::bounded(2, OverflowPolicy::RejectNew));
        buffer.append(AudioChunk::from(&b"a"[..]));
        buffer.append(AudioChunk::from(&b"b"[..]));
        assert_eq!(
            buffer.append(AudioChunk::from(&b"c"[..])),
            AppendOutcome::Rejected
        );

        assert_eq!(buffer.pop_oldest(), Some(AudioChunk::from(&b"a"[..])));
        assert_eq!(buffer.pop_oldest(), Some(AudioChunk::from(&b"b"[..])));
        assert_eq!(buffer.pop_oldest(), None);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let limits = BufferLimits::bounded(0, OverflowPolicy::RejectNew);
        assert_eq!(limits.capacity, Some(1));
    }

    #[tokio::test]
    async fn fetch_returns_queued_chunk_immediately() {
        let buffer = listening_buffer(BufferLimits::unbounded());
        buffer.append(AudioChunk::from(&b"ready"[..]));

        let outcome = buffer.fetch(Some(Duration::from_millis(10))).await;
        assert_eq!(outcome, FetchOutcome::Chunk(AudioChunk::from(&b"ready"[..])));
    }

    #[tokio::test]
    async fn fetch_waits_for_concurrent_append() {
        let buffer = Arc::new(listening_buffer(BufferLimits::unbounded()));

        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.fetch(None).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "fetch returned before any append");

        buffer.append(AudioChunk::from(&b"x"[..]));

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("fetch was not woken by append")
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Chunk(AudioChunk::from(&b"x"[..])));
        assert_eq!(buffer.depth(), 0);
    }

    #[tokio::test]
    async fn fetch_times_out_on_empty_buffer() {
        let buffer = listening_buffer(BufferLimits::unbounded());
        let outcome = buffer.fetch(Some(Duration::from_millis(20))).await;
        assert_eq!(outcome, FetchOutcome::TimedOut);
    }

    #[tokio::test]
    async fn fetch_drains_before_reporting_closed() {
        let buffer = listening_buffer(BufferLimits::unbounded());
        buffer.append(AudioChunk::from(&b"last"[..]));
        buffer.stop();

        assert_eq!(
            buffer.fetch(None).await,
            FetchOutcome::Chunk(AudioChunk::from(&b"last"[..]))
        );
        assert_eq!(buffer.fetch(None).await, FetchOutcome::Closed);
    }

    #[tokio::test]
    async fn stop_wakes_blocked_fetch() {
        let buffer = Arc::new(listening_buffer(BufferLimits::unbounded()));

        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.fetch(None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.stop();

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("fetch was not woken by stop")
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Closed);
    }

    #[tokio::test]
    async fn every_chunk_is_delivered_exactly_once() {
        let buffer = Arc::new(listening_buffer(BufferLimits::unbounded()));

        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..200u16 {
                    buffer.append(AudioChunk::from(i.to_le_bytes().to_vec()));
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 200 {
            match buffer.fetch(Some(Duration::from_secs(1))).await {
                FetchOutcome::Chunk(chunk) => {
                    let bytes = chunk.as_bytes();
                    received.push(u16::from_le_bytes([bytes[0], bytes[1]]));
                }
                other => panic!("unexpected fetch outcome: {other:?}"),
            }
        }
        producer.join().unwrap();

        assert_eq!(received, (0..200).collect::<Vec<_>>());
        assert_eq!(buffer.depth(), 0);
    }
}
