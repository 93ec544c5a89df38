//! HTTP client for the body server

use std::time::Duration;

use axum::body::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Deserialize)]
struct BufferLengthResponse {
    length: usize,
}

#[derive(Serialize)]
struct TalkRequest<'a> {
    message: &'a str,
}

/// Talks to a body server over HTTP
///
/// Chunk requests carry no client-side timeout: a pull legitimately waits
/// until the body captures audio or its own fetch timeout fires.
#[derive(Debug, Clone)]
pub struct BodyClient {
    client: reqwest::Client,
    base_url: String,
}

impl BodyClient {
    /// Create a client for the body at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Ask the body to start capturing
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the device cannot subscribe
    pub async fn start_listening(&self) -> Result<()> {
        self.client
            .post(self.url("start_listening"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Ask the body to stop capturing
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn stop_listening(&self) -> Result<()> {
        self.client
            .post(self.url("stop_listening"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Pull the oldest chunk
    ///
    /// Returns `Ok(None)` once the body reports end of stream.
    ///
    /// # Errors
    ///
    /// Returns error on connection failure or any non-success status,
    /// including the body's fetch timeout
    pub async fn fetch_chunk(&self) -> Result<Option<Bytes>> {
        let response = self
            .client
            .get(self.url("get_audio_chunk"))
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = response.error_for_status()?.bytes().await?;
        Ok(Some(bytes))
    }

    /// Probe the body's backlog depth
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    pub async fn buffer_length(&self) -> Result<usize> {
        let response: BufferLengthResponse = self
            .client
            .get(self.url("get_server_buffer_length"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.length)
    }

    /// Have the body say `message`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body cannot speak
    pub async fn talk(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("talk"))
            .json(&TalkRequest { message })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Body(format!("talk failed ({status}): {body}")));
        }
        Ok(())
    }
}
