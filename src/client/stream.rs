//! Blocking-read view over a chunk stream

use axum::body::Bytes;
use futures::{Stream, StreamExt};

use super::puller::ChunkStream;

/// Byte reader over pulled chunks
///
/// Each [`read`](Self::read) returns exactly the next chunk. Once the
/// underlying stream ends every read returns empty bytes.
pub struct AudioStream {
    chunks: ChunkStream,
    finished: bool,
}

impl AudioStream {
    #[must_use]
    pub fn new(chunks: ChunkStream) -> Self {
        Self {
            chunks,
            finished: false,
        }
    }

    /// Wrap any chunk stream
    #[must_use]
    pub fn from_stream(chunks: impl Stream<Item = Bytes> + Send + 'static) -> Self {
        Self::new(Box::pin(chunks))
    }

    /// Wait for the next chunk; empty at end of stream
    pub async fn read(&mut self) -> Bytes {
        if self.finished {
            return Bytes::new();
        }

        if let Some(chunk) = self.chunks.next().await {
            chunk
        } else {
            self.finished = true;
            Bytes::new()
        }
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_one_chunk_per_call() {
        let mut stream = AudioStream::from_stream(futures::stream::iter(vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"bc"),
        ]));

        tokio_test::block_on(async {
            assert_eq!(stream.read().await, Bytes::from_static(b"a"));
            assert_eq!(stream.read().await, Bytes::from_static(b"bc"));
            assert!(!stream.is_finished());
        });
    }

    #[test]
    fn empty_forever_after_end() {
        let mut stream = AudioStream::from_stream(futures::stream::iter(vec![Bytes::from_static(
            b"x",
        )]));

        tokio_test::block_on(async {
            assert_eq!(stream.read().await, Bytes::from_static(b"x"));
            assert!(stream.read().await.is_empty());
            assert!(stream.is_finished());
            assert!(stream.read().await.is_empty());
        });
    }
}
