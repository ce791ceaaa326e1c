//! CLI error type.

use thiserror::Error;

/// Everything that can end a command with a non-zero exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// The client could not be built
    #[error(transparent)]
    Client(#[from] secq::Error),

    /// A fetch produced no response
    #[error(transparent)]
    Fetch(#[from] secq::FetchError),

    /// Direct cache access failed
    #[error("Cache error: {0}")]
    Cache(#[from] secq_cache::CacheError),

    /// The server answered with a non-2xx status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// Response status
        status: u16,
    },

    /// `--json` was given but the body is not JSON
    #[error("Response body is not JSON: {0}")]
    Json(#[from] secq::ResponseError),

    /// Writing output or waiting for a signal failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
