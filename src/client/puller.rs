//! Rate-controlled chunk pulling

use std::pin::Pin;

use axum::body::Bytes;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use super::body::BodyClient;
use super::rate::PullRate;

/// Boxed stream of audio chunks in capture order
pub type ChunkStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Pulls chunks from the body one at a time, pacing requests by backlog
///
/// Each iteration fetches one chunk, yields it, probes the body's backlog
/// and sleeps for [`PullRate::delay`]. Requests are strictly sequential.
pub struct AdaptivePuller {
    client: BodyClient,
    rate: PullRate,
    cancel: CancellationToken,
}

impl AdaptivePuller {
    #[must_use]
    pub const fn new(client: BodyClient, rate: PullRate, cancel: CancellationToken) -> Self {
        Self {
            client,
            rate,
            cancel,
        }
    }

    /// Turn the puller into a chunk stream
    ///
    /// The stream ends when the body reports end of stream or the token is
    /// cancelled. Cancellation is checked between iterations, so a fetch
    /// already in flight still completes and its chunk is delivered.
    /// Failed fetches are retried at the current cadence; a failed depth
    /// probe keeps the last known depth.
    #[must_use]
    pub fn into_stream(self) -> ChunkStream {
        let Self {
            client,
            rate,
            cancel,
        } = self;

        Box::pin(async_stream::stream! {
            let mut depth = 0usize;
            let mut pulled = 0u64;

            while !cancel.is_cancelled() {
                match client.fetch_chunk().await {
                    Ok(Some(chunk)) if chunk.is_empty() => {
                        tracing::trace!("skipping empty chunk");
                    }
                    Ok(Some(chunk)) => {
                        pulled += 1;
                        yield chunk;
                    }
                    Ok(None) => {
                        tracing::debug!(pulled, "body reported end of stream");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, depth, "chunk fetch failed, retrying");
                        if !pause(&cancel, rate.delay(depth)).await {
                            break;
                        }
                        continue;
                    }
                }

                match client.buffer_length().await {
                    Ok(d) => depth = d,
                    Err(e) => tracing::warn!(error = %e, depth, "depth probe failed, keeping last depth"),
                }

                let delay = rate.delay(depth);
                tracing::trace!(depth, delay_ms = delay.as_millis(), "next pull scheduled");
                if !pause(&cancel, delay).await {
                    break;
                }
            }

            tracing::debug!(pulled, "puller stopped");
        })
    }
}

/// Sleep for `delay`, returning `false` if cancelled first
async fn pause(cancel: &CancellationToken, delay: std::time::Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
