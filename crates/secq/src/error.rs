//! Error types for the request layer.

use crate::transport::TransportError;
use secq_cache::CacheError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for client construction and other fallible setup.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a [`fetch`](crate::SecClient::fetch) produced no response at all.
///
/// HTTP failures, including exhausted `429` retries, are not errors: they come
/// back as a non-ok [`Response`](crate::Response). This type is `Clone` so a
/// single outcome can be handed to every caller sharing an in-flight request.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The URL could not be parsed
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        /// The rejected input
        url: String,
        /// Parser error
        #[source]
        source: url::ParseError,
    },

    /// Every attempt failed before a response was received
    #[error("Network error for {url} after {attempts} attempts: {source}")]
    Network {
        /// Requested URL
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// Error from the last attempt
        #[source]
        source: Arc<TransportError>,
    },

    /// The request queue reached its configured bound
    #[error("Request queue is full ({capacity} pending)")]
    QueueFull {
        /// Configured maximum queue length
        capacity: usize,
    },

    /// The queued work was dropped without producing a result
    #[error("Request for {url} was abandoned before completing")]
    Abandoned {
        /// Requested URL
        url: String,
    },
}

/// Errors raised while building or administering a client.
#[derive(Debug, Error)]
pub enum Error {
    /// Fetch error
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Cache store error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// HTTP transport could not be built
    #[error(transparent)]
    Transport(#[from] TransportError),
}
