#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/secq-rs/secq/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod edgar;
pub mod error;
pub mod prefetch;
pub mod queue;
pub mod response;
pub mod retry;
pub mod scheduler;
pub mod stress;
pub mod throttle;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the cache crate
pub use secq_cache as cache;

pub use client::{DEFAULT_CACHE_TTL, FetchOptions, SecClient, SecClientBuilder};
pub use config::{ClientConfig, ThrottleConfig, Tunables};
pub use error::{Error, FetchError, Result};
pub use prefetch::{PrefetchReport, Prefetcher};
pub use response::{Response, ResponseError, ResponseSource};
pub use retry::RetryPolicy;
pub use scheduler::SchedulerStats;
pub use stress::{LatencyStats, StressConfig, StressReport};
pub use throttle::{ThrottleMode, ThrottleStatus};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
