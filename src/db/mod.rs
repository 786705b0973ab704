pub mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "stationsync.db";

/// Shared SQLite connection backing the submission queue and the read cache.
///
/// Every operation takes the lock for its own duration, so access is
/// serialized per operation.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database inside `data_dir`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| eyre!("Failed to create data directory: {}", e))?;

    let path = data_dir.join(DB_FILE);
    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection for one operation.
  pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Stable identifier of this installation, generated on first use.
  pub fn device_id(&self) -> Result<String> {
    if let Some(id) = self.meta_get("device_id")? {
      return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    self
      .lock()?
      .execute(
        "INSERT INTO meta (key, value) VALUES ('device_id', ?)",
        params![id],
      )
      .map_err(|e| eyre!("Failed to store device id: {}", e))?;
    tracing::info!(device_id = %id, "generated device identity");

    Ok(id)
  }

  fn meta_get(&self, key: &str) -> Result<Option<String>> {
    self
      .lock()?
      .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  /// Cache version of the worker currently in control, if any.
  pub fn active_version(&self) -> Result<Option<String>> {
    self.meta_get("active_version")
  }

  /// When the worker in control last reported in.
  pub fn active_heartbeat(&self) -> Result<Option<DateTime<Utc>>> {
    self
      .meta_get("active_heartbeat")?
      .as_deref()
      .map(parse_datetime)
      .transpose()
  }

  /// Record `version` as in control, with a fresh heartbeat.
  pub fn set_active_version(&self, version: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO meta (key, value) VALUES ('active_version', ?)",
      params![version],
    )
    .map_err(|e| eyre!("Failed to store active version: {}", e))?;
    tx.execute(
      "INSERT OR REPLACE INTO meta (key, value) VALUES ('active_heartbeat', ?)",
      params![format_datetime(&Utc::now())],
    )
    .map_err(|e| eyre!("Failed to store heartbeat: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  /// Refresh the heartbeat. Returns false if `version` is no longer in control.
  pub fn touch_active(&self, version: &str) -> Result<bool> {
    let updated = self
      .lock()?
      .execute(
        "UPDATE meta SET value = ?
         WHERE key = 'active_heartbeat'
           AND EXISTS (SELECT 1 FROM meta WHERE key = 'active_version' AND value = ?)",
        params![format_datetime(&Utc::now()), version],
      )
      .map_err(|e| eyre!("Failed to refresh heartbeat: {}", e))?;
    Ok(updated > 0)
  }

  /// Give up control if `version` holds it. Returns whether it did.
  pub fn release_active(&self, version: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let released = tx
      .execute(
        "DELETE FROM meta WHERE key = 'active_version' AND value = ?",
        params![version],
      )
      .map_err(|e| eyre!("Failed to release active version: {}", e))?;
    if released > 0 {
      tx.execute("DELETE FROM meta WHERE key = 'active_heartbeat'", [])
        .map_err(|e| eyre!("Failed to clear heartbeat: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(released > 0)
  }
}

/// Format a timestamp for storage.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339()
}

/// Parse a timestamp written by [`format_datetime`].
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_device_id_is_stable() {
    let db = Database::open_in_memory().unwrap();
    let first = db.device_id().unwrap();
    let second = db.device_id().unwrap();
    assert_eq!(first, second);
    assert!(Uuid::parse_str(&first).is_ok());
  }

  #[test]
  fn test_device_id_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let id = Database::open(dir.path()).unwrap().device_id().unwrap();
    let reopened = Database::open(dir.path()).unwrap();
    assert_eq!(reopened.device_id().unwrap(), id);
  }

  #[test]
  fn test_active_version() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.active_version().unwrap(), None);
    db.set_active_version("v1").unwrap();
    db.set_active_version("v2").unwrap();
    assert_eq!(db.active_version().unwrap().as_deref(), Some("v2"));
    assert!(db.active_heartbeat().unwrap().is_some());
  }

  #[test]
  fn test_only_the_owner_touches_or_releases() {
    let db = Database::open_in_memory().unwrap();
    db.set_active_version("v2").unwrap();

    assert!(!db.touch_active("v1").unwrap());
    assert!(db.touch_active("v2").unwrap());

    assert!(!db.release_active("v1").unwrap());
    assert_eq!(db.active_version().unwrap().as_deref(), Some("v2"));

    assert!(db.release_active("v2").unwrap());
    assert_eq!(db.active_version().unwrap(), None);
    assert_eq!(db.active_heartbeat().unwrap(), None);
    assert!(!db.touch_active("v2").unwrap());
  }

  #[test]
  fn test_datetime_roundtrip() {
    let now = Utc::now();
    assert_eq!(parse_datetime(&format_datetime(&now)).unwrap(), now);
    assert!(parse_datetime("yesterday").is_err());
  }
}
