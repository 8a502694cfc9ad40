//! Request-boundary error types.

use thiserror::Error;

/// Errors surfaced to the consumer through the failure callback.
///
/// `Canceled` is deliberately silent at the request boundary: the
/// orchestrator never hands it to `on_failed`, since cancellation means the
/// consumer no longer cares about the result.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Transport or I/O failure while fetching.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed or undecodable image bytes.
    #[error("decode error: {0}")]
    Decode(String),

    /// Cooperative cancellation was observed.
    #[error("load canceled")]
    Canceled,

    /// Invalid per-request configuration, e.g. negative target dimensions.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No bytes are registered for the requested bundled resource.
    #[error("unknown resource id {0}")]
    UnknownResource(u32),
}

impl LoadError {
    /// Creates a network error.
    #[must_use]
    pub fn network(cause: impl Into<String>) -> Self {
        Self::Network(cause.into())
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(cause: impl Into<String>) -> Self {
        Self::Decode(cause.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}
