//! Cache storage trait and SQLite implementation.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::traits::{CacheEntry, CacheKey};
use crate::db::{format_datetime, parse_datetime, Database};
use crate::remote::Response;

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get a cached entry. Entries older than `max_age` are reported as absent.
  fn get(&self, key: &CacheKey, max_age: Duration) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any previous one with the same key.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Delete an entry. Returns whether one existed.
  fn delete(&self, key: &CacheKey) -> Result<bool>;

  /// Delete every entry not belonging to the current cache version.
  fn purge_other_versions(&self) -> Result<usize>;

  /// Delete every entry.
  fn clear(&self) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &CacheKey, _max_age: Duration) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _key: &CacheKey) -> Result<bool> {
    Ok(false)
  }

  fn purge_other_versions(&self) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based cache storage, namespaced by cache version.
pub struct SqliteStorage {
  db: Arc<Database>,
  version: String,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>, version: impl Into<String>) -> Self {
    Self {
      db,
      version: version.into(),
    }
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &CacheKey, max_age: Duration) -> Result<Option<CacheEntry>> {
    let conn = self.db.lock()?;

    let row: Option<(u16, Option<String>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, content_type, body, written_at FROM cache_entries
         WHERE cache_key = ? AND version = ?",
        params![key.hash, self.version],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    let (status, content_type, body, written_at) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let entry = CacheEntry {
      key: key.clone(),
      response: Response {
        status,
        content_type,
        body,
      },
      written_at: parse_datetime(&written_at)?,
    };

    if entry.is_expired(max_age, Utc::now()) {
      tracing::debug!(key = %key.description, "cache entry expired");
      return Ok(None);
    }

    Ok(Some(entry))
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
         (cache_key, version, description, status, content_type, body, written_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          entry.key.hash,
          self.version,
          entry.key.description,
          entry.response.status,
          entry.response.content_type,
          entry.response.body,
          format_datetime(&entry.written_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn delete(&self, key: &CacheKey) -> Result<bool> {
    let conn = self.db.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_key = ? AND version = ?",
        params![key.hash, self.version],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(deleted > 0)
  }

  fn purge_other_versions(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE version != ?",
        params![self.version],
      )
      .map_err(|e| eyre!("Failed to purge old cache versions: {}", e))
  }

  fn clear(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }
}
