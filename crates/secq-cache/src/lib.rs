#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/secq-rs/secq/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod entry;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod tiered;

pub use entry::{CacheEntry, CacheKey};
pub use error::{CacheError, Result};
pub use memory::MemoryStore;
pub use sqlite::{DEFAULT_NAMESPACE, SqliteStore};
pub use store::CacheStore;
pub use tiered::TieredCache;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
