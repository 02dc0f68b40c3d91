use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use crate::config::Config;
use crate::feed::parser::{parse_document, FeedDocument, ParseError};

/// Errors that can occur while fetching a feed.
///
/// Everything except [`FetchError::Parse`] means the feed was unreachable
/// for this attempt; the caller logs it and waits for the next scheduled run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level error (DNS, connection, TLS, ...)
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body is not a usable RSS/Atom document
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// HTTP feed fetcher with a per-request timeout and a body size limit.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    /// Builds a fetcher from the application config.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self::new(
            client,
            Duration::from_secs(config.request_timeout_secs),
            config.max_feed_bytes,
        ))
    }

    /// Downloads a feed body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NetworkUnavailable`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - The whole download exceeded the timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::IncompleteResponse`] - Body shorter than `Content-Length`
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tokio::time::timeout(self.timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    /// Downloads and parses a feed document.
    pub async fn fetch_document(&self, url: &str) -> Result<FeedDocument, FetchError> {
        let bytes = self.fetch(url).await?;
        Ok(parse_document(&bytes)?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_bytes).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
