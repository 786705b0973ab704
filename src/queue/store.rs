//! Durable store of pending submissions.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

use super::types::{ChecklistItem, PendingSubmission, Photo, SubmissionStatus};
use crate::db::{format_datetime, parse_datetime, Database};

const SELECT_COLUMNS: &str = "SELECT id, vehicle_id, template_id, operator_id, submitted_at,
  status, items, attempts, last_attempt_at, last_error FROM submissions";

/// Raw columns of a `submissions` row before parsing.
struct SubmissionRow {
  id: String,
  vehicle_id: String,
  template_id: String,
  operator_id: String,
  submitted_at: String,
  status: String,
  items: String,
  attempts: u32,
  last_attempt_at: Option<String>,
  last_error: Option<String>,
}

impl SubmissionRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      vehicle_id: row.get(1)?,
      template_id: row.get(2)?,
      operator_id: row.get(3)?,
      submitted_at: row.get(4)?,
      status: row.get(5)?,
      items: row.get(6)?,
      attempts: row.get(7)?,
      last_attempt_at: row.get(8)?,
      last_error: row.get(9)?,
    })
  }

  fn into_submission(self, photos: Vec<Photo>) -> Result<PendingSubmission> {
    let items: Vec<ChecklistItem> = serde_json::from_str(&self.items)
      .map_err(|e| eyre!("Failed to decode items of {}: {}", self.id, e))?;

    Ok(PendingSubmission {
      submitted_at: parse_datetime(&self.submitted_at)?,
      status: self.status.parse()?,
      last_attempt_at: self
        .last_attempt_at
        .as_deref()
        .map(parse_datetime)
        .transpose()?,
      id: self.id,
      vehicle_id: self.vehicle_id,
      template_id: self.template_id,
      operator_id: self.operator_id,
      items,
      photos,
      attempts: self.attempts,
      last_error: self.last_error,
    })
  }
}

/// Queue of submissions waiting to reach the backend.
#[derive(Clone)]
pub struct SubmissionStore {
  db: Arc<Database>,
}

impl SubmissionStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Insert or overwrite a submission by id.
  ///
  /// The stored record always starts as `pending_sync` with no attempts,
  /// whatever the state of the passed value.
  pub fn save(&self, submission: &PendingSubmission) -> Result<()> {
    let items = serde_json::to_string(&submission.items)
      .map_err(|e| eyre!("Failed to encode checklist items: {}", e))?;

    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT INTO submissions (id, vehicle_id, template_id, operator_id, submitted_at,
         status, items, attempts, last_attempt_at, last_error)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, NULL)
       ON CONFLICT(id) DO UPDATE SET
         vehicle_id = excluded.vehicle_id,
         template_id = excluded.template_id,
         operator_id = excluded.operator_id,
         submitted_at = excluded.submitted_at,
         status = excluded.status,
         items = excluded.items,
         attempts = 0,
         last_attempt_at = NULL,
         last_error = NULL",
      params![
        submission.id,
        submission.vehicle_id,
        submission.template_id,
        submission.operator_id,
        format_datetime(&submission.submitted_at),
        SubmissionStatus::PendingSync.as_str(),
        items,
      ],
    )
    .map_err(|e| eyre!("Failed to store submission {}: {}", submission.id, e))?;

    tx.execute(
      "DELETE FROM submission_photos WHERE submission_id = ?",
      params![submission.id],
    )
    .map_err(|e| eyre!("Failed to replace photos: {}", e))?;

    for (position, photo) in submission.photos.iter().enumerate() {
      tx.execute(
        "INSERT INTO submission_photos (submission_id, position, content_type, data)
         VALUES (?, ?, ?, ?)",
        params![submission.id, position, photo.content_type, photo.data],
      )
      .map_err(|e| eyre!("Failed to store photo: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    tracing::debug!(id = %submission.id, photos = submission.photos.len(), "submission queued");
    Ok(())
  }

  /// Get one submission with its photos.
  pub fn get(&self, id: &str) -> Result<Option<PendingSubmission>> {
    let conn = self.db.lock()?;

    let row = conn
      .query_row(
        &format!("{} WHERE id = ?", SELECT_COLUMNS),
        params![id],
        SubmissionRow::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read submission {}: {}", id, e))?;

    match row {
      Some(row) => {
        let photos = load_photos(&conn, &row.id)?;
        Ok(Some(row.into_submission(photos)?))
      }
      None => Ok(None),
    }
  }

  /// All submissions that still need to reach the backend (`pending_sync` or `error`).
  pub fn list_to_sync(&self) -> Result<Vec<PendingSubmission>> {
    self.query(
      &format!(
        "{} WHERE status IN ('pending_sync', 'error') ORDER BY submitted_at",
        SELECT_COLUMNS
      ),
    )
  }

  /// Every stored submission, whatever its status.
  pub fn list_all(&self) -> Result<Vec<PendingSubmission>> {
    self.query(&format!("{} ORDER BY submitted_at", SELECT_COLUMNS))
  }

  fn query(&self, sql: &str) -> Result<Vec<PendingSubmission>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<SubmissionRow> = stmt
      .query_map([], SubmissionRow::from_row)
      .map_err(|e| eyre!("Failed to query submissions: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read submission row: {}", e))?;

    rows
      .into_iter()
      .map(|row| {
        let photos = load_photos(&conn, &row.id)?;
        row.into_submission(photos)
      })
      .collect()
  }

  /// Move a submission to `status`, stamping the attempt time.
  ///
  /// Only `error` increments the attempt counter and records `error`.
  /// Transitions outside the submission lifecycle are rejected.
  pub fn set_status(&self, id: &str, status: SubmissionStatus, error: Option<&str>) -> Result<()> {
    let conn = self.db.lock()?;

    let current: Option<String> = conn
      .query_row(
        "SELECT status FROM submissions WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read submission {}: {}", id, e))?;

    let current: SubmissionStatus = current
      .ok_or_else(|| eyre!("Submission {} not found", id))?
      .parse()?;

    if !current.can_transition_to(status) {
      return Err(eyre!(
        "Submission {} cannot move from {} to {}",
        id,
        current,
        status
      ));
    }

    let now = format_datetime(&Utc::now());
    let updated = if status == SubmissionStatus::Error {
      conn.execute(
        "UPDATE submissions
         SET status = ?, last_attempt_at = ?, attempts = attempts + 1, last_error = ?
         WHERE id = ?",
        params![status.as_str(), now, error.unwrap_or("unknown error"), id],
      )
    } else {
      conn.execute(
        "UPDATE submissions SET status = ?, last_attempt_at = ? WHERE id = ?",
        params![status.as_str(), now, id],
      )
    };
    updated.map_err(|e| eyre!("Failed to update submission {}: {}", id, e))?;

    Ok(())
  }

  /// Move submissions left in `syncing` by an interrupted drain to `error`.
  ///
  /// Only safe while no drain is running.
  pub fn recover_interrupted(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "UPDATE submissions
         SET status = 'error', attempts = attempts + 1, last_attempt_at = ?,
             last_error = 'sync interrupted'
         WHERE status = 'syncing'",
        params![format_datetime(&Utc::now())],
      )
      .map_err(|e| eyre!("Failed to recover interrupted submissions: {}", e))
  }

  /// Delete a submission and its photos. Returns whether it existed.
  pub fn remove(&self, id: &str) -> Result<bool> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "DELETE FROM submission_photos WHERE submission_id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to delete photos of {}: {}", id, e))?;
    let deleted = conn
      .execute("DELETE FROM submissions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete submission {}: {}", id, e))?;
    Ok(deleted > 0)
  }

  /// Number of submissions waiting to sync (`pending_sync` plus `error`).
  pub fn count_pending(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM submissions WHERE status IN ('pending_sync', 'error')",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count pending submissions: {}", e))?;
    Ok(count as usize)
  }
}

fn load_photos(conn: &Connection, submission_id: &str) -> Result<Vec<Photo>> {
  let mut stmt = conn
    .prepare(
      "SELECT content_type, data FROM submission_photos
       WHERE submission_id = ? ORDER BY position",
    )
    .map_err(|e| eyre!("Failed to prepare photo query: {}", e))?;

  let photos = stmt
    .query_map(params![submission_id], |row| {
      Ok(Photo {
        content_type: row.get(0)?,
        data: row.get(1)?,
      })
    })
    .map_err(|e| eyre!("Failed to query photos: {}", e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read photo: {}", e))?;

  Ok(photos)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::types::ItemStatus;
  use proptest::prelude::*;

  fn store() -> SubmissionStore {
    SubmissionStore::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn submission(id: &str) -> PendingSubmission {
    PendingSubmission::new(
      id,
      "HLF-20",
      "daily-check",
      "op-1",
      vec![ChecklistItem {
        item_id: "fuel".to_string(),
        status: ItemStatus::Ok,
        value: Some("full".to_string()),
        note: None,
      }],
    )
  }

  fn ids(list: &[PendingSubmission]) -> Vec<&str> {
    let mut ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
    ids.sort();
    ids
  }

  #[test]
  fn test_saved_submission_listed_once_as_pending() {
    let store = store();
    store.save(&submission("a")).unwrap();

    let list = store.list_to_sync().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "a");
    assert_eq!(list[0].status, SubmissionStatus::PendingSync);
    assert_eq!(list[0].attempts, 0);
    assert_eq!(list[0].items[0].value.as_deref(), Some("full"));
  }

  #[test]
  fn test_save_overwrites_and_resets_state() {
    let store = store();
    store.save(&submission("a")).unwrap();
    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();
    store
      .set_status("a", SubmissionStatus::Error, Some("500"))
      .unwrap();

    let mut edited = submission("a");
    edited.vehicle_id = "DLK-23".to_string();
    edited.status = SubmissionStatus::Error;
    edited.attempts = 9;
    store.save(&edited).unwrap();

    let stored = store.get("a").unwrap().unwrap();
    assert_eq!(stored.vehicle_id, "DLK-23");
    assert_eq!(stored.status, SubmissionStatus::PendingSync);
    assert_eq!(stored.attempts, 0);
    assert_eq!(stored.last_error, None);
    assert_eq!(store.list_to_sync().unwrap().len(), 1);
  }

  #[test]
  fn test_synced_leaves_sync_list() {
    let store = store();
    store.save(&submission("a")).unwrap();
    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();
    store.set_status("a", SubmissionStatus::Synced, None).unwrap();

    assert!(store.list_to_sync().unwrap().is_empty());
    assert_eq!(store.count_pending().unwrap(), 0);
    let stored = store.get("a").unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Synced);
    assert!(stored.last_attempt_at.is_some());
  }

  #[test]
  fn test_error_increments_attempts_once() {
    let store = store();
    store.save(&submission("a")).unwrap();
    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();
    store
      .set_status("a", SubmissionStatus::Error, Some("connection reset"))
      .unwrap();

    let list = store.list_to_sync().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].attempts, 1);
    assert_eq!(list[0].last_error.as_deref(), Some("connection reset"));

    // Retry keeps the counter and message until the next failure
    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();
    let retrying = store.get("a").unwrap().unwrap();
    assert_eq!(retrying.attempts, 1);
    assert_eq!(retrying.last_error.as_deref(), Some("connection reset"));

    store
      .set_status("a", SubmissionStatus::Error, Some("timeout"))
      .unwrap();
    assert_eq!(store.get("a").unwrap().unwrap().attempts, 2);
  }

  #[test]
  fn test_illegal_transitions_rejected() {
    let store = store();
    store.save(&submission("a")).unwrap();

    assert!(store.set_status("a", SubmissionStatus::Synced, None).is_err());
    assert!(store
      .set_status("a", SubmissionStatus::Error, Some("x"))
      .is_err());

    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();
    store.set_status("a", SubmissionStatus::Synced, None).unwrap();
    assert!(store.set_status("a", SubmissionStatus::Syncing, None).is_err());

    assert!(store
      .set_status("missing", SubmissionStatus::Syncing, None)
      .is_err());
  }

  #[test]
  fn test_photos_roundtrip_and_removed() {
    let store = store();
    let mut s = submission("a");
    s.photos = vec![
      Photo {
        content_type: "image/jpeg".to_string(),
        data: vec![0xff, 0xd8, 0xff],
      },
      Photo {
        content_type: "image/png".to_string(),
        data: vec![0x89, 0x50],
      },
    ];
    store.save(&s).unwrap();

    let stored = store.get("a").unwrap().unwrap();
    assert_eq!(stored.photos, s.photos);

    assert!(store.remove("a").unwrap());
    assert!(!store.remove("a").unwrap());
    assert!(store.get("a").unwrap().is_none());

    let conn = store.db.lock().unwrap();
    let orphans: i64 = conn
      .query_row("SELECT COUNT(*) FROM submission_photos", [], |row| row.get(0))
      .unwrap();
    assert_eq!(orphans, 0);
  }

  #[test]
  fn test_recover_interrupted() {
    let store = store();
    store.save(&submission("a")).unwrap();
    store.save(&submission("b")).unwrap();
    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();

    assert_eq!(store.recover_interrupted().unwrap(), 1);
    let a = store.get("a").unwrap().unwrap();
    assert_eq!(a.status, SubmissionStatus::Error);
    assert_eq!(a.attempts, 1);
    assert_eq!(a.last_error.as_deref(), Some("sync interrupted"));
    assert_eq!(store.count_pending().unwrap(), 2);
  }

  #[derive(Debug, Clone)]
  enum Op {
    Save(usize),
    SetStatus(usize, SubmissionStatus),
    Remove(usize),
  }

  fn op() -> impl Strategy<Value = Op> {
    let status = prop_oneof![
      Just(SubmissionStatus::PendingSync),
      Just(SubmissionStatus::Syncing),
      Just(SubmissionStatus::Synced),
      Just(SubmissionStatus::Error),
    ];
    prop_oneof![
      (0..4usize).prop_map(Op::Save),
      (0..4usize, status).prop_map(|(i, status)| Op::SetStatus(i, status)),
      (0..4usize).prop_map(Op::Remove),
    ]
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn test_count_pending_matches_listing(ops in proptest::collection::vec(op(), 1..40)) {
      let store = store();
      for op in ops {
        match op {
          Op::Save(i) => store.save(&submission(&format!("s{}", i))).unwrap(),
          Op::SetStatus(i, status) => {
            // Illegal transitions are rejected and leave the record untouched
            let _ = store.set_status(&format!("s{}", i), status, Some("boom"));
          }
          Op::Remove(i) => {
            store.remove(&format!("s{}", i)).unwrap();
          }
        }

        let expected = store
          .list_all()
          .unwrap()
          .iter()
          .filter(|s| s.status.needs_sync())
          .count();
        prop_assert_eq!(store.count_pending().unwrap(), expected);
        prop_assert_eq!(store.list_to_sync().unwrap().len(), expected);
      }
    }
  }

  #[test]
  fn test_count_pending_tracks_union() {
    let store = store();
    for id in ["a", "b", "c", "d"] {
      store.save(&submission(id)).unwrap();
    }
    assert_eq!(store.count_pending().unwrap(), 4);

    // a -> error, b -> synced, c -> syncing, d removed
    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();
    store.set_status("a", SubmissionStatus::Error, Some("x")).unwrap();
    store.set_status("b", SubmissionStatus::Syncing, None).unwrap();
    store.set_status("b", SubmissionStatus::Synced, None).unwrap();
    store.set_status("c", SubmissionStatus::Syncing, None).unwrap();
    store.remove("d").unwrap();

    let expected = store
      .list_all()
      .unwrap()
      .iter()
      .filter(|s| s.status.needs_sync())
      .count();
    assert_eq!(store.count_pending().unwrap(), expected);
    assert_eq!(expected, 1);
    assert_eq!(ids(&store.list_to_sync().unwrap()), vec!["a"]);

    store.save(&submission("e")).unwrap();
    assert_eq!(store.count_pending().unwrap(), 2);
    assert_eq!(ids(&store.list_to_sync().unwrap()), vec!["a", "e"]);
  }
}
