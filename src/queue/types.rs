//! Submission records kept in the offline queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Sync state of a queued submission.
///
/// Allowed transitions: `PendingSync -> Syncing -> {Synced, Error}` and
/// `Error -> Syncing`. `Synced` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
  PendingSync,
  Syncing,
  Synced,
  Error,
}

impl SubmissionStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      SubmissionStatus::PendingSync => "pending_sync",
      SubmissionStatus::Syncing => "syncing",
      SubmissionStatus::Synced => "synced",
      SubmissionStatus::Error => "error",
    }
  }

  pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
    use SubmissionStatus::*;
    matches!(
      (self, next),
      (PendingSync, Syncing) | (Syncing, Synced) | (Syncing, Error) | (Error, Syncing)
    )
  }

  /// Records in these states are retry candidates and count as pending.
  pub fn needs_sync(self) -> bool {
    matches!(self, SubmissionStatus::PendingSync | SubmissionStatus::Error)
  }
}

impl fmt::Display for SubmissionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SubmissionStatus {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending_sync" => Ok(SubmissionStatus::PendingSync),
      "syncing" => Ok(SubmissionStatus::Syncing),
      "synced" => Ok(SubmissionStatus::Synced),
      "error" => Ok(SubmissionStatus::Error),
      other => Err(eyre!("Unknown submission status '{}'", other)),
    }
  }
}

/// Outcome recorded for one checklist line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
  Ok,
  Defect,
  Missing,
  NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
  pub item_id: String,
  pub status: ItemStatus,
  /// Recorded reading, e.g. a fuel level or tyre pressure
  #[serde(default)]
  pub value: Option<String>,
  #[serde(default)]
  pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
  pub content_type: String,
  pub data: Vec<u8>,
}

impl Photo {
  /// Load a photo from disk, deriving its content type from the extension.
  pub fn read(path: &Path) -> Result<Self> {
    let content_type = match path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase())
      .as_deref()
    {
      Some("jpg") | Some("jpeg") => "image/jpeg",
      Some("png") => "image/png",
      Some("webp") => "image/webp",
      _ => return Err(eyre!("Unsupported photo type: {}", path.display())),
    };

    let data = std::fs::read(path)
      .map_err(|e| eyre!("Failed to read photo {}: {}", path.display(), e))?;

    Ok(Self {
      content_type: content_type.to_string(),
      data,
    })
  }

  pub fn extension(&self) -> &'static str {
    match self.content_type.as_str() {
      "image/png" => "png",
      "image/webp" => "webp",
      _ => "jpg",
    }
  }
}

/// A checklist completed while offline, waiting to be pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSubmission {
  pub id: String,
  pub vehicle_id: String,
  pub template_id: String,
  pub operator_id: String,
  pub submitted_at: DateTime<Utc>,
  pub status: SubmissionStatus,
  pub items: Vec<ChecklistItem>,
  pub photos: Vec<Photo>,
  pub attempts: u32,
  pub last_attempt_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

impl PendingSubmission {
  pub fn new(
    id: impl Into<String>,
    vehicle_id: impl Into<String>,
    template_id: impl Into<String>,
    operator_id: impl Into<String>,
    items: Vec<ChecklistItem>,
  ) -> Self {
    Self {
      id: id.into(),
      vehicle_id: vehicle_id.into(),
      template_id: template_id.into(),
      operator_id: operator_id.into(),
      submitted_at: Utc::now(),
      status: SubmissionStatus::PendingSync,
      items,
      photos: Vec::new(),
      attempts: 0,
      last_attempt_at: None,
      last_error: None,
    }
  }

  /// Number of lines reported as defective or missing.
  pub fn defect_count(&self) -> usize {
    self
      .items
      .iter()
      .filter(|i| matches!(i.status, ItemStatus::Defect | ItemStatus::Missing))
      .count()
  }
}

/// A submission as written by the form, before it enters the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionDraft {
  /// Generated when absent
  pub id: Option<String>,
  pub vehicle_id: String,
  pub template_id: String,
  /// Defaults to the configured operator
  pub operator_id: Option<String>,
  pub submitted_at: Option<DateTime<Utc>>,
  pub items: Vec<ChecklistItem>,
  /// Photo files, relative to the draft file
  #[serde(default)]
  pub photos: Vec<PathBuf>,
}

impl SubmissionDraft {
  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Invalid submission: {}", e))
  }

  /// Validate the draft and turn it into a queue record.
  pub fn into_submission(self, default_operator: &str, base_dir: &Path) -> Result<PendingSubmission> {
    if self.vehicle_id.trim().is_empty() {
      return Err(eyre!("Submission has no vehicle"));
    }
    if self.template_id.trim().is_empty() {
      return Err(eyre!("Submission has no checklist template"));
    }
    if self.items.is_empty() {
      return Err(eyre!("Submission has no checklist items"));
    }

    let mut seen = HashSet::new();
    for item in &self.items {
      if !seen.insert(item.item_id.as_str()) {
        return Err(eyre!("Checklist item '{}' appears twice", item.item_id));
      }
    }

    let photos = self
      .photos
      .iter()
      .map(|p| Photo::read(&base_dir.join(p)))
      .collect::<Result<Vec<_>>>()?;

    let id = self
      .id
      .filter(|id| !id.trim().is_empty())
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let operator_id = self
      .operator_id
      .unwrap_or_else(|| default_operator.to_string());

    let mut submission =
      PendingSubmission::new(id, self.vehicle_id, self.template_id, operator_id, self.items);
    if let Some(at) = self.submitted_at {
      submission.submitted_at = at;
    }
    submission.photos = photos;

    Ok(submission)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transitions() {
    use SubmissionStatus::*;
    assert!(PendingSync.can_transition_to(Syncing));
    assert!(Syncing.can_transition_to(Synced));
    assert!(Syncing.can_transition_to(Error));
    assert!(Error.can_transition_to(Syncing));

    assert!(!PendingSync.can_transition_to(Synced));
    assert!(!PendingSync.can_transition_to(Error));
    assert!(!Error.can_transition_to(Synced));
    assert!(!Synced.can_transition_to(Syncing));
    assert!(!Synced.can_transition_to(PendingSync));
  }

  #[test]
  fn test_status_string_roundtrip() {
    for status in [
      SubmissionStatus::PendingSync,
      SubmissionStatus::Syncing,
      SubmissionStatus::Synced,
      SubmissionStatus::Error,
    ] {
      assert_eq!(status.as_str().parse::<SubmissionStatus>().unwrap(), status);
    }
    assert!("done".parse::<SubmissionStatus>().is_err());
  }

  #[test]
  fn test_draft_defaults() {
    let draft = SubmissionDraft::from_json(
      r#"{
        "vehicle_id": "HLF-20",
        "template_id": "daily-check",
        "items": [
          {"item_id": "fuel", "status": "ok", "value": "3/4"},
          {"item_id": "lights", "status": "defect", "note": "left blinker"}
        ]
      }"#,
    )
    .unwrap();

    let submission = draft.into_submission("op-3", Path::new(".")).unwrap();
    assert!(!submission.id.is_empty());
    assert_eq!(submission.operator_id, "op-3");
    assert_eq!(submission.status, SubmissionStatus::PendingSync);
    assert_eq!(submission.attempts, 0);
    assert_eq!(submission.defect_count(), 1);
  }

  #[test]
  fn test_draft_rejects_duplicate_items() {
    let draft = SubmissionDraft::from_json(
      r#"{
        "vehicle_id": "DLK-23",
        "template_id": "weekly",
        "items": [
          {"item_id": "ladder", "status": "ok"},
          {"item_id": "ladder", "status": "missing"}
        ]
      }"#,
    )
    .unwrap();

    let err = draft.into_submission("op", Path::new(".")).unwrap_err();
    assert!(err.to_string().contains("appears twice"));
  }

  #[test]
  fn test_draft_reads_photos() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dent.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let draft = SubmissionDraft::from_json(
      r#"{
        "id": "sub-1",
        "vehicle_id": "TLF-3000",
        "template_id": "daily-check",
        "items": [{"item_id": "body", "status": "defect"}],
        "photos": ["dent.png"]
      }"#,
    )
    .unwrap();

    let submission = draft.into_submission("op", dir.path()).unwrap();
    assert_eq!(submission.id, "sub-1");
    assert_eq!(submission.photos.len(), 1);
    assert_eq!(submission.photos[0].content_type, "image/png");
    assert_eq!(submission.photos[0].extension(), "png");
  }

  #[test]
  fn test_unsupported_photo_type() {
    assert!(Photo::read(Path::new("scan.tiff")).is_err());
  }
}
