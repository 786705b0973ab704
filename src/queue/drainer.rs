//! Replays queued submissions against the backend.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tokio::sync::Mutex;

use super::store::SubmissionStore;
use super::types::{PendingSubmission, SubmissionStatus};
use crate::config::SyncConfig;
use crate::remote::SubmissionSink;

/// When a failed submission may be retried.
///
/// The default retries forever, on every drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: Option<u32>,
  pub backoff_base: Duration,
  pub backoff_max: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: None,
      backoff_base: Duration::zero(),
      backoff_max: Duration::hours(1),
    }
  }
}

/// Whether a submission should be attempted in this drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
  Due,
  /// Failed too often, left in `error` for an operator to look at
  Exhausted,
  BackingOff { until: DateTime<Utc> },
}

impl RetryPolicy {
  pub fn from_config(sync: &SyncConfig) -> Self {
    Self {
      max_attempts: sync.max_attempts,
      backoff_base: Duration::seconds(sync.backoff_base_secs as i64),
      backoff_max: Duration::seconds(sync.backoff_max_secs as i64),
    }
  }

  /// Delay after the `attempts`-th failure: base * 2^(attempts-1), capped.
  pub fn backoff(&self, attempts: u32) -> Duration {
    if attempts == 0 || self.backoff_base.is_zero() {
      return Duration::zero();
    }
    let factor = 1i32 << (attempts - 1).min(20);
    (self.backoff_base * factor).min(self.backoff_max)
  }

  pub fn eligibility(&self, submission: &PendingSubmission, now: DateTime<Utc>) -> Eligibility {
    if submission.status != SubmissionStatus::Error {
      return Eligibility::Due;
    }

    if let Some(max) = self.max_attempts {
      if submission.attempts >= max {
        return Eligibility::Exhausted;
      }
    }

    match submission.last_attempt_at {
      Some(last) => {
        let until = last + self.backoff(submission.attempts);
        if until > now {
          Eligibility::BackingOff { until }
        } else {
          Eligibility::Due
        }
      }
      None => Eligibility::Due,
    }
  }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub synced: usize,
  pub failed: usize,
  /// Not attempted because of the retry policy
  pub skipped: usize,
  /// Still waiting after the drain (`pending_sync` plus `error`)
  pub remaining: usize,
}

/// Sequentially pushes every pending submission to the sink.
pub struct Drainer<S: SubmissionSink> {
  store: SubmissionStore,
  sink: S,
  policy: RetryPolicy,
  running: Mutex<()>,
}

impl<S: SubmissionSink> Drainer<S> {
  pub fn new(store: SubmissionStore, sink: S) -> Self {
    Self {
      store,
      sink,
      policy: RetryPolicy::default(),
      running: Mutex::new(()),
    }
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Push every submission waiting to sync.
  ///
  /// A failing submission is marked `error` and left for the next drain;
  /// it never stops the others. If a drain is already running this returns
  /// an empty report straight away.
  pub async fn drain(&self) -> Result<DrainReport> {
    let _guard = match self.running.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        tracing::debug!("drain already in progress");
        return Ok(DrainReport::default());
      }
    };

    let recovered = self.store.recover_interrupted()?;
    if recovered > 0 {
      tracing::warn!(recovered, "requeued submissions from an interrupted drain");
    }

    let candidates = self.store.list_to_sync()?;
    tracing::info!(count = candidates.len(), "draining submission queue");

    let mut report = DrainReport::default();
    let now = Utc::now();

    for submission in &candidates {
      match self.policy.eligibility(submission, now) {
        Eligibility::Due => {}
        Eligibility::Exhausted => {
          tracing::debug!(id = %submission.id, attempts = submission.attempts, "retries exhausted");
          report.skipped += 1;
          continue;
        }
        Eligibility::BackingOff { until } => {
          tracing::debug!(id = %submission.id, %until, "backing off");
          report.skipped += 1;
          continue;
        }
      }

      if self.replay(submission).await {
        report.synced += 1;
      } else {
        report.failed += 1;
      }
    }

    report.remaining = self.store.count_pending()?;
    tracing::info!(
      synced = report.synced,
      failed = report.failed,
      skipped = report.skipped,
      remaining = report.remaining,
      "drain finished"
    );

    Ok(report)
  }

  /// Replay one submission. Returns true once it is synced and removed.
  async fn replay(&self, submission: &PendingSubmission) -> bool {
    let id = submission.id.as_str();

    if let Err(e) = self.store.set_status(id, SubmissionStatus::Syncing, None) {
      tracing::warn!(id, error = %e, "could not mark submission as syncing");
      return false;
    }

    match self.sink.push_submission(submission).await {
      Ok(()) => {
        if let Err(e) = self.store.set_status(id, SubmissionStatus::Synced, None) {
          tracing::warn!(id, error = %e, "could not mark submission as synced");
          return false;
        }
        if let Err(e) = self.store.remove(id) {
          tracing::warn!(id, error = %e, "could not remove synced submission");
        }
        tracing::info!(id, "submission synced");
        true
      }
      Err(e) => {
        let message = e.to_string();
        tracing::warn!(id, error = %message, "submission sync failed");
        if let Err(e) = self
          .store
          .set_status(id, SubmissionStatus::Error, Some(&message))
        {
          tracing::warn!(id, error = %e, "could not record sync failure");
        }
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::queue::types::{ChecklistItem, ItemStatus};
  use async_trait::async_trait;
  use color_eyre::eyre::eyre;
  use std::collections::HashSet;
  use std::sync::{Arc, Mutex as StdMutex};

  /// Records pushed ids and fails the ones listed in `failing`.
  #[derive(Default)]
  struct FakeSink {
    pushed: StdMutex<Vec<String>>,
    failing: StdMutex<HashSet<String>>,
  }

  impl FakeSink {
    fn failing(ids: &[&str]) -> Self {
      let sink = Self::default();
      sink
        .failing
        .lock()
        .unwrap()
        .extend(ids.iter().map(|s| s.to_string()));
      sink
    }

    fn recover(&self, id: &str) {
      self.failing.lock().unwrap().remove(id);
    }

    fn pushed(&self) -> Vec<String> {
      self.pushed.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl SubmissionSink for FakeSink {
    async fn push_submission(&self, submission: &PendingSubmission) -> Result<()> {
      self.pushed.lock().unwrap().push(submission.id.clone());
      if self.failing.lock().unwrap().contains(&submission.id) {
        return Err(eyre!("503 Service Unavailable"));
      }
      Ok(())
    }
  }

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
        item_id: "pump".to_string(),
        status: ItemStatus::Ok,
        value: None,
        note: None,
      }],
    )
  }

  #[tokio::test]
  async fn test_drain_syncs_and_removes_everything() {
    let store = store();
    for id in ["a", "b", "c"] {
      store.save(&submission(id)).unwrap();
    }

    let drainer = Drainer::new(store.clone(), FakeSink::default());
    let report = drainer.drain().await.unwrap();

    assert_eq!(report.synced, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 0);
    assert!(store.list_all().unwrap().is_empty());
    assert_eq!(drainer.sink.pushed().len(), 3);
  }

  #[tokio::test]
  async fn test_one_failure_does_not_block_others() {
    let store = store();
    for id in ["a", "b", "c"] {
      store.save(&submission(id)).unwrap();
    }

    let drainer = Drainer::new(store.clone(), FakeSink::failing(&["b"]));
    let report = drainer.drain().await.unwrap();

    assert_eq!(report.synced, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 1);

    let left = store.list_to_sync().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, "b");
    assert_eq!(left[0].status, SubmissionStatus::Error);
    assert_eq!(left[0].attempts, 1);
    assert_eq!(left[0].last_error.as_deref(), Some("503 Service Unavailable"));
  }

  #[tokio::test]
  async fn test_failed_submission_retried_on_next_drain() {
    let store = store();
    store.save(&submission("a")).unwrap();

    let drainer = Drainer::new(store.clone(), FakeSink::failing(&["a"]));
    drainer.drain().await.unwrap();
    drainer.drain().await.unwrap();
    assert_eq!(store.get("a").unwrap().unwrap().attempts, 2);

    drainer.sink.recover("a");
    let report = drainer.drain().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(store.get("a").unwrap().is_none());
    assert_eq!(drainer.sink.pushed(), vec!["a", "a", "a"]);
  }

  #[tokio::test]
  async fn test_exhausted_submissions_are_skipped_but_still_pending() {
    let store = store();
    store.save(&submission("a")).unwrap();

    let policy = RetryPolicy {
      max_attempts: Some(2),
      ..RetryPolicy::default()
    };
    let drainer = Drainer::new(store.clone(), FakeSink::failing(&["a"])).with_policy(policy);

    drainer.drain().await.unwrap();
    drainer.drain().await.unwrap();
    let report = drainer.drain().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 1);
    assert_eq!(drainer.sink.pushed().len(), 2);
  }

  #[tokio::test]
  async fn test_backoff_defers_retry() {
    let store = store();
    store.save(&submission("a")).unwrap();

    let policy = RetryPolicy {
      backoff_base: Duration::minutes(10),
      ..RetryPolicy::default()
    };
    let drainer = Drainer::new(store.clone(), FakeSink::failing(&["a"])).with_policy(policy);

    assert_eq!(drainer.drain().await.unwrap().failed, 1);
    let report = drainer.drain().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(drainer.sink.pushed().len(), 1);
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy {
      max_attempts: None,
      backoff_base: Duration::seconds(30),
      backoff_max: Duration::minutes(5),
    };
    assert_eq!(policy.backoff(0), Duration::zero());
    assert_eq!(policy.backoff(1), Duration::seconds(30));
    assert_eq!(policy.backoff(2), Duration::seconds(60));
    assert_eq!(policy.backoff(3), Duration::seconds(120));
    assert_eq!(policy.backoff(10), Duration::minutes(5));
    assert_eq!(RetryPolicy::default().backoff(7), Duration::zero());
  }

  #[test]
  fn test_pending_submissions_always_due() {
    let policy = RetryPolicy {
      max_attempts: Some(0),
      backoff_base: Duration::hours(1),
      backoff_max: Duration::hours(1),
    };
    assert_eq!(
      policy.eligibility(&submission("a"), Utc::now()),
      Eligibility::Due
    );
  }

  #[tokio::test]
  async fn test_interrupted_submission_is_retried() {
    let store = store();
    store.save(&submission("a")).unwrap();
    store.set_status("a", SubmissionStatus::Syncing, None).unwrap();

    let drainer = Drainer::new(store.clone(), FakeSink::default());
    let report = drainer.drain().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(store.get("a").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_empty_queue() {
    let drainer = Drainer::new(store(), FakeSink::default());
    assert_eq!(drainer.drain().await.unwrap(), DrainReport::default());
  }
}
