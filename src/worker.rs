//! Long-running sync worker.
//!
//! Lifecycle: `install` warms the cache with the static assets, then the
//! worker either takes control right away or waits while another live
//! version holds it. `activate` drops cache entries of every other version.
//! The worker in control refreshes a heartbeat in the database and releases
//! control when it stops. A waiting worker takes over on `SkipWaiting`, once
//! the owner releases, or once the owner's heartbeat is older than the lease.
//! While active, the worker drains the submission queue whenever
//! connectivity comes back or a sync is requested. It stops on `Shutdown`.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::db::Database;
use crate::event::{ControlMessage, Event, EventHandler};
use crate::intercept::Interceptor;
use crate::queue::{DrainReport, Drainer};
use crate::remote::{SubmissionSink, Upstream};

/// Heartbeats a version may miss before others treat it as gone.
const LEASE_HEARTBEATS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed, another version still in control
  Waiting,
  Active,
}

pub struct SyncWorker<U: Upstream, S: SubmissionSink> {
  db: Arc<Database>,
  version: String,
  state: WorkerState,
  online: bool,
  heartbeat: Duration,
  interceptor: Interceptor<U>,
  drainer: Drainer<S>,
}

impl<U: Upstream, S: SubmissionSink> SyncWorker<U, S> {
  pub fn new(
    db: Arc<Database>,
    version: impl Into<String>,
    interceptor: Interceptor<U>,
    drainer: Drainer<S>,
  ) -> Self {
    Self {
      db,
      version: version.into(),
      state: WorkerState::Installing,
      online: false,
      heartbeat: Duration::from_secs(30),
      interceptor,
      drainer,
    }
  }

  /// Set how often control is refreshed (or, while waiting, checked).
  pub fn with_heartbeat(mut self, interval: Duration) -> Self {
    self.heartbeat = interval.max(Duration::from_secs(1));
    self
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  fn lease(&self) -> chrono::Duration {
    chrono::Duration::milliseconds((self.heartbeat * LEASE_HEARTBEATS).as_millis() as i64)
  }

  /// The other version in control, if its owner is still reporting in.
  fn live_owner(&self) -> Result<Option<String>> {
    let active = match self.db.active_version()? {
      Some(active) if active != self.version => active,
      _ => return Ok(None),
    };

    let alive = match self.db.active_heartbeat()? {
      Some(at) => Utc::now() - at <= self.lease(),
      None => false,
    };
    if !alive {
      tracing::info!(stale = %active, "active version stopped reporting");
      return Ok(None);
    }

    Ok(Some(active))
  }

  /// Precache static assets and take control if no live version holds it.
  pub async fn install(&mut self) -> Result<WorkerState> {
    let cached = self.interceptor.precache().await;
    tracing::info!(version = %self.version, cached, "worker installed");

    match self.live_owner()? {
      Some(active) => {
        tracing::info!(active = %active, "waiting for the active version to hand over");
        self.state = WorkerState::Waiting;
      }
      None => self.activate()?,
    }

    Ok(self.state)
  }

  /// Take control: purge other cache versions and record this one as active.
  pub fn activate(&mut self) -> Result<()> {
    let purged = self.interceptor.cache().storage().purge_other_versions()?;
    self.db.set_active_version(&self.version)?;
    self.state = WorkerState::Active;
    tracing::info!(version = %self.version, purged, "worker activated");
    Ok(())
  }

  /// Give up control so another version can take over.
  pub fn release(&mut self) -> Result<()> {
    if self.state == WorkerState::Active && self.db.release_active(&self.version)? {
      tracing::info!(version = %self.version, "worker released control");
    }
    Ok(())
  }

  async fn drain(&self) -> Option<DrainReport> {
    if self.state != WorkerState::Active {
      tracing::debug!("not active, drain deferred");
      return None;
    }
    if !self.online {
      tracing::info!("offline, drain deferred");
      return None;
    }

    match self.drainer.drain().await {
      Ok(report) => Some(report),
      Err(e) => {
        tracing::error!(error = %e, "drain failed");
        None
      }
    }
  }

  /// Refresh control while active, look for a vacancy while waiting.
  async fn on_heartbeat(&mut self) -> Result<()> {
    match self.state {
      WorkerState::Active => {
        if !self.db.touch_active(&self.version)? {
          tracing::warn!(version = %self.version, "another version took control");
          self.state = WorkerState::Waiting;
        }
      }
      WorkerState::Waiting => {
        if self.live_owner()?.is_none() {
          self.activate()?;
          self.drain().await;
        }
      }
      WorkerState::Installing => {}
    }
    Ok(())
  }

  /// Apply one event. Returns false when the worker should stop.
  pub async fn handle_event(&mut self, event: Event) -> Result<bool> {
    match event {
      Event::Online => {
        let reconnected = !self.online;
        self.online = true;
        if reconnected {
          self.drain().await;
        }
      }
      Event::Offline => self.online = false,
      Event::SyncNow => {
        self.drain().await;
      }
      Event::Control(ControlMessage::SkipWaiting) => {
        if self.state == WorkerState::Waiting {
          self.activate()?;
          self.drain().await;
        }
      }
      Event::Shutdown => {
        tracing::info!("worker shutting down");
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Process events and heartbeats until shutdown, then release control.
  pub async fn run(mut self, mut events: EventHandler) -> Result<()> {
    let mut heartbeat = tokio::time::interval(self.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
      tokio::select! {
        event = events.next() => {
          let Some(event) = event else { break Ok(()) };
          tracing::debug!(?event, "worker event");
          match self.handle_event(event).await {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(e) => break Err(e),
          }
        }
        _ = heartbeat.tick() => {
          if let Err(e) = self.on_heartbeat().await {
            break Err(e);
          }
        }
      }
    };

    let released = self.release();
    result.and(released)
  }
}
