//! Wire types of the backend REST API, validated before they reach the rest of the crate.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::queue::{ChecklistItem, PendingSubmission};
use crate::stock::Batch;

/// Row upserted into the submissions table, keyed by the submission id.
#[derive(Debug, Serialize)]
pub struct ApiSubmissionRow<'a> {
  pub id: &'a str,
  pub vehicle_id: &'a str,
  pub template_id: &'a str,
  pub operator_id: &'a str,
  pub device_id: &'a str,
  pub submitted_at: DateTime<Utc>,
  pub items: &'a [ChecklistItem],
  pub photo_paths: Vec<String>,
}

impl<'a> ApiSubmissionRow<'a> {
  pub fn new(submission: &'a PendingSubmission, device_id: &'a str, photo_paths: Vec<String>) -> Self {
    Self {
      id: &submission.id,
      vehicle_id: &submission.vehicle_id,
      template_id: &submission.template_id,
      operator_id: &submission.operator_id,
      device_id,
      submitted_at: submission.submitted_at,
      items: &submission.items,
      photo_paths,
    }
  }
}

/// Object path of a submission photo. Deterministic so re-uploads overwrite.
pub fn photo_object_path(submission_id: &str, position: usize, extension: &str) -> String {
  format!("{}/{}.{}", submission_id, position, extension)
}

/// Stock batch row as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiStockBatch {
  pub id: String,
  pub item_id: String,
  pub quantity: i64,
  pub expires_on: Option<String>,
}

impl TryFrom<ApiStockBatch> for Batch {
  type Error = color_eyre::Report;

  fn try_from(row: ApiStockBatch) -> Result<Self> {
    if row.quantity < 0 {
      return Err(eyre!(
        "Batch {} has negative quantity {}",
        row.id,
        row.quantity
      ));
    }

    let expires_on = row
      .expires_on
      .as_deref()
      .map(|d| {
        NaiveDate::parse_from_str(d, "%Y-%m-%d")
          .map_err(|e| eyre!("Batch {} has invalid expiry '{}': {}", row.id, d, e))
      })
      .transpose()?;

    Ok(Batch {
      id: row.id,
      item_id: row.item_id,
      quantity: row.quantity as u64,
      expires_on,
    })
  }
}

/// Parse a JSON array of stock batch rows.
pub fn parse_stock_batches(body: &[u8]) -> Result<Vec<Batch>> {
  let rows: Vec<ApiStockBatch> =
    serde_json::from_slice(body).map_err(|e| eyre!("Failed to parse stock batches: {}", e))?;
  rows.into_iter().map(Batch::try_from).collect()
}
