//! One listening session against the body

use tokio_util::sync::CancellationToken;

use super::body::BodyClient;
use super::puller::AdaptivePuller;
use super::rate::PullRate;
use super::stream::AudioStream;
use crate::Result;

/// Capture session: listening starts on open and stops on close
pub struct ListeningSession {
    client: BodyClient,
    cancel: CancellationToken,
    stream: AudioStream,
}

impl ListeningSession {
    /// Start listening on the body and begin pulling chunks
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot start listening
    pub async fn open(client: BodyClient, rate: PullRate) -> Result<Self> {
        client.start_listening().await?;
        tracing::debug!(body = client.base_url(), "listening session opened");

        let cancel = CancellationToken::new();
        let puller = AdaptivePuller::new(client.clone(), rate, cancel.clone());

        Ok(Self {
            client,
            cancel,
            stream: AudioStream::new(puller.into_stream()),
        })
    }

    /// Audio pulled during this session
    pub const fn stream(&mut self) -> &mut AudioStream {
        &mut self.stream
    }

    /// Stop pulling, then tell the body to stop listening
    ///
    /// # Errors
    ///
    /// Returns error if the stop request fails
    pub async fn close(self) -> Result<()> {
        self.cancel.cancel();
        drop(self.stream);
        self.client.stop_listening().await?;
        tracing::debug!("listening session closed");
        Ok(())
    }
}
