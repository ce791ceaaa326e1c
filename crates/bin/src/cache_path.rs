//! Default cache location.

use std::path::PathBuf;

/// Platform cache directory for secq.
///
/// - Linux: `~/.cache/secq/`
/// - macOS: `~/Library/Caches/secq/`
/// - Windows: `%LOCALAPPDATA%\secq\`
pub(crate) fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("secq")
}

/// Default SQLite database path.
pub(crate) fn default_cache_path() -> PathBuf {
    default_cache_dir().join("cache.db")
}
