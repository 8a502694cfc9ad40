//! Streamed network retrieval with cooperative cancellation.

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::domain::errors::LoadError;

/// Result of a download attempt.
///
/// Transport failures are captured into `Error` rather than propagated; the
/// fetcher never panics or returns `Err` across the component boundary.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The full body was read.
    Success(Bytes),
    /// Transport or HTTP failure, with the captured cause.
    Error(String),
    /// Cancellation was observed between reads.
    Canceled,
}

/// Downloads image bytes over a shared HTTP client.
///
/// No request timeout is configured: a stuck read is bounded only by
/// cancellation (or the transport's own defaults).
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    /// Creates a downloader with a freshly built client.
    ///
    /// # Errors
    /// Returns [`LoadError::Network`] if the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LoadError::network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Streams the body at `url`, observing `cancel` between chunk reads.
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::Canceled;
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return FetchOutcome::Canceled,
            response = self.client.get(url).send() => match response {
                Ok(response) => response,
                Err(e) => return FetchOutcome::Error(format!("request failed: {e}")),
            },
        };

        if !response.status().is_success() {
            return FetchOutcome::Error(format!("HTTP {}", response.status()));
        }

        let capacity = response
            .content_length()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        let mut body = BytesMut::with_capacity(capacity);
        let mut response = response;

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(url = %url, read = body.len(), "Download canceled mid-stream");
                    return FetchOutcome::Canceled;
                }
                chunk = response.chunk() => match chunk {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => return FetchOutcome::Error(format!("failed to read body: {e}")),
                },
            };
            body.extend_from_slice(&chunk);
        }

        if cancel.is_cancelled() {
            return FetchOutcome::Canceled;
        }
        trace!(url = %url, bytes = body.len(), "Download complete");
        FetchOutcome::Success(body.freeze())
    }
}
