//! SQLite persistence for cached responses.

use crate::entry::{CacheEntry, CacheKey};
use crate::error::{CacheError, Result};
use crate::store::CacheStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "secq:cache";

/// SQLite-backed [`CacheStore`].
///
/// All rows carry a namespace so several clients can share one database file
/// without clearing each other's entries. Queries run on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    namespace: Arc<str>,
}

impl SqliteStore {
    /// Open (or create) a cache database.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file. Missing parent
    ///   directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: Arc::from(DEFAULT_NAMESPACE),
        })
    }

    /// Use a different key namespace on the same database.
    pub fn with_namespace(mut self, namespace: impl AsRef<str>) -> Self {
        self.namespace = Arc::from(namespace.as_ref());
        self
    }

    /// The namespace this store reads and writes.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS http_cache (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_http_cache_fetched ON http_cache(namespace, fetched_at)",
            [],
        )?;

        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let namespace = Arc::clone(&self.namespace);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| CacheError::Poisoned)?;
            f(&guard, &namespace)
        })
        .await?
    }
}

fn read_entry(conn: &Connection, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let row = conn
        .query_row(
            "SELECT fetched_at, status, headers, body FROM http_cache
             WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u16>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((fetched_at, status, headers, body)) = row else {
        return Ok(None);
    };

    let headers: BTreeMap<String, String> = serde_json::from_str(&headers)?;
    Ok(Some(CacheEntry {
        fetched_at: DateTime::parse_from_rfc3339(&fetched_at)?.with_timezone(&Utc),
        status,
        headers,
        body,
    }))
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let key = key.as_str().to_owned();
        self.with_conn(move |conn, namespace| read_entry(conn, namespace, &key))
            .await
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let key = key.as_str().to_owned();
        let headers = serde_json::to_string(&entry.headers)?;
        let fetched_at = entry.fetched_at.to_rfc3339();
        let status = entry.status;
        let body = entry.body.clone();

        self.with_conn(move |conn, namespace| {
            conn.execute(
                "INSERT OR REPLACE INTO http_cache
                 (namespace, key, fetched_at, status, headers, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![namespace, key, fetched_at, status, headers, body],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        let key = key.as_str().to_owned();
        self.with_conn(move |conn, namespace| {
            conn.execute(
                "DELETE FROM http_cache WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn(|conn, namespace| {
            conn.execute(
                "DELETE FROM http_cache WHERE namespace = ?1",
                params![namespace],
            )?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn, namespace| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM http_cache WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}
