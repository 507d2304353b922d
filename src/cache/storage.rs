//! Cache storage trait with SQLite and in-memory implementations.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CachedResponse, RequestKey};
use crate::http::Response;

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores. Each store maps request keys to responses.
/// Implementations synchronize internally and are safe to share between tasks.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist yet.
  fn open(&self, cache_name: &str) -> Result<()>;

  /// Whether the named store exists.
  fn has(&self, cache_name: &str) -> Result<bool>;

  /// Names of all stores, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and everything in it. Returns false if it did not exist.
  fn delete(&self, cache_name: &str) -> Result<bool>;

  /// Look up a request in one store.
  fn match_request(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up a request in every store, most recently created store first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a response, replacing any previous entry. Fails if the store does not exist.
  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Number of entries in a store.
  fn entry_count(&self, cache_name: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A throwaway database that lives only as long as this value.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named store; id preserves creation order
CREATE TABLE IF NOT EXISTS cache_names (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

-- Stored responses
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_hash ON cache_entries(request_hash);
"#;

const ENTRY_COLUMNS: &str = "status, status_text, headers, body, cached_at";

/// Raw entry columns as read from SQLite.
type EntryRow = (u16, String, String, Option<Vec<u8>>, String);

fn read_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_entry(row: EntryRow) -> Result<CachedResponse> {
  let (status, status_text, headers, body, cached_at) = row;
  let status =
    StatusCode::from_u16(status).map_err(|e| eyre!("Invalid stored status {}: {}", status, e))?;
  let response = Response::new(status, decode_headers(&headers)?, body.map(Bytes::from))
    .with_status_text(status_text);

  Ok(CachedResponse {
    response,
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open(&self, cache_name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_names (name, created_at) VALUES (?, ?)",
        params![cache_name, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;
    Ok(())
  }

  fn has(&self, cache_name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT id FROM cache_names WHERE name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", cache_name, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_names ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache_name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_names WHERE name = ?", params![cache_name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries WHERE cache_name = ? AND request_hash = ?",
          ENTRY_COLUMNS
        ),
        params![cache_name, key.cache_hash()],
        read_entry_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url(), e))?;

    row.map(decode_entry).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries ce
           INNER JOIN cache_names cn ON cn.name = ce.cache_name
           WHERE ce.request_hash = ?
           ORDER BY cn.id DESC
           LIMIT 1",
          ENTRY_COLUMNS
        ),
        params![key.cache_hash()],
        read_entry_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url(), e))?;

    row.map(decode_entry).transpose()
  }

  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;

    let exists: Option<i64> = conn
      .query_row(
        "SELECT id FROM cache_names WHERE name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", cache_name, e))?;
    if exists.is_none() {
      return Err(eyre!("Cache {} does not exist", cache_name));
    }

    let headers = encode_headers(response.headers())?;
    let body = response.body().map(|b| b.to_vec());

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, request_hash, url, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          cache_name,
          key.cache_hash(),
          key.url().as_str(),
          response.status().as_u16(),
          response.status_text(),
          headers,
          body,
          Utc::now().to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key.url(), e))?;

    Ok(())
  }

  fn entry_count(&self, cache_name: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", cache_name, e))?;
    Ok(count as usize)
  }
}

/// Headers are stored as a JSON list of name/value pairs. Values that are not valid
/// UTF-8 are dropped.
fn encode_headers(headers: &HeaderMap) -> Result<String> {
  let pairs: Vec<(&str, &str)> = headers
    .iter()
    .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
    .collect();
  serde_json::to_string(&pairs).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_headers(s: &str) -> Result<HeaderMap> {
  let pairs: Vec<(String, String)> =
    serde_json::from_str(s).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid stored header name '{}': {}", name, e))?;
    let value = HeaderValue::from_str(&value)
      .map_err(|e| eyre!("Invalid stored header value '{}': {}", value, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

/// Parse an RFC 3339 timestamp written by this module.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Storage that keeps everything in process memory.
/// Used for dry runs and as the store behind the unit tests.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<Vec<MemoryCache>>,
}

struct MemoryCache {
  name: String,
  entries: HashMap<String, MemoryEntry>,
}

struct MemoryEntry {
  response: Response,
  cached_at: DateTime<Utc>,
}

impl MemoryEntry {
  fn to_cached(&self) -> CachedResponse {
    CachedResponse {
      response: self.response.duplicate(),
      cached_at: self.cached_at,
    }
  }
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<MemoryCache>>> {
    self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, cache_name: &str) -> Result<()> {
    let mut caches = self.lock()?;
    if !caches.iter().any(|c| c.name == cache_name) {
      caches.push(MemoryCache {
        name: cache_name.to_string(),
        entries: HashMap::new(),
      });
    }
    Ok(())
  }

  fn has(&self, cache_name: &str) -> Result<bool> {
    Ok(self.lock()?.iter().any(|c| c.name == cache_name))
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.iter().map(|c| c.name.clone()).collect())
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let mut caches = self.lock()?;
    let before = caches.len();
    caches.retain(|c| c.name != cache_name);
    Ok(caches.len() != before)
  }

  fn match_request(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let caches = self.lock()?;
    Ok(
      caches
        .iter()
        .find(|c| c.name == cache_name)
        .and_then(|c| c.entries.get(&key.cache_hash()))
        .map(MemoryEntry::to_cached),
    )
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let caches = self.lock()?;
    let hash = key.cache_hash();
    Ok(
      caches
        .iter()
        .rev()
        .find_map(|c| c.entries.get(&hash))
        .map(MemoryEntry::to_cached),
    )
  }

  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut caches = self.lock()?;
    let cache = caches
      .iter_mut()
      .find(|c| c.name == cache_name)
      .ok_or_else(|| eyre!("Cache {} does not exist", cache_name))?;

    cache.entries.insert(
      key.cache_hash(),
      MemoryEntry {
        response: response.duplicate(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn entry_count(&self, cache_name: &str) -> Result<usize> {
    Ok(
      self
        .lock()?
        .iter()
        .find(|c| c.name == cache_name)
        .map(|c| c.entries.len())
        .unwrap_or(0),
    )
  }
}
