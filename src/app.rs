use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheLayer, CacheSource, CacheStorage, NoopStorage, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::event::{ControlMessage, Event, EventHandler};
use crate::intercept::{Interceptor, Router};
use crate::queue::{Drainer, RetryPolicy, SubmissionDraft, SubmissionStore};
use crate::remote::{api_types, BackendClient, Request, Response};
use crate::roles::{authorize, Permission};
use crate::stock;
use crate::worker::SyncWorker;

/// Path probed to detect connectivity.
const PROBE_PATH: &str = "/rest/v1/";

/// Process-wide state, created once at startup and handed to every command.
pub struct App {
  config: Config,
  db: Arc<Database>,
  store: SubmissionStore,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Arc::new(Database::open(&config.data_dir()?)?);
    let store = SubmissionStore::new(Arc::clone(&db));
    Ok(Self { config, db, store })
  }

  fn authorize(&self, permission: Permission) -> Result<()> {
    authorize(self.config.operator.role, permission)
  }

  fn cache_storage(&self) -> Arc<dyn CacheStorage> {
    if self.config.cache.enabled {
      Arc::new(SqliteStorage::new(
        Arc::clone(&self.db),
        self.config.cache.version.clone(),
      ))
    } else {
      Arc::new(NoopStorage)
    }
  }

  fn client(&self) -> Result<BackendClient> {
    BackendClient::new(&self.config, self.db.device_id()?)
  }

  fn interceptor(&self, client: Arc<BackendClient>) -> Interceptor<BackendClient> {
    let cache = CacheLayer::new(self.cache_storage()).with_max_age(self.config.cache_max_age());
    Interceptor::new(Router::new(&self.config.routes), cache, client)
      .with_network_timeout(self.config.network_timeout())
  }

  fn drainer(&self, client: BackendClient) -> Drainer<BackendClient> {
    Drainer::new(self.store.clone(), client)
      .with_policy(RetryPolicy::from_config(&self.config.sync))
  }

  /// Print how many submissions are waiting.
  pub fn status(&self) -> Result<()> {
    self.authorize(Permission::DrainQueue)?;
    let pending = self.store.count_pending()?;
    match pending {
      0 => println!("All submissions synced"),
      1 => println!("1 item waiting to sync"),
      n => println!("{} items waiting to sync", n),
    }
    Ok(())
  }

  pub fn list(&self) -> Result<()> {
    self.authorize(Permission::DrainQueue)?;
    let submissions = self.store.list_all()?;
    if submissions.is_empty() {
      println!("Queue is empty");
      return Ok(());
    }

    for s in submissions {
      let error = s
        .last_error
        .as_deref()
        .map(|e| format!("  last error: {}", e))
        .unwrap_or_default();
      println!(
        "{}  {:<12}  vehicle {}  template {}  {} items ({} defects)  {} photos  attempts {}{}",
        s.id,
        s.status,
        s.vehicle_id,
        s.template_id,
        s.items.len(),
        s.defect_count(),
        s.photos.len(),
        s.attempts,
        error
      );
    }
    Ok(())
  }

  /// Queue a submission read from a JSON draft file.
  pub fn save(&self, file: &Path) -> Result<()> {
    self.authorize(Permission::SubmitChecklist)?;

    let json = std::fs::read_to_string(file)
      .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
    let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let submission =
      SubmissionDraft::from_json(&json)?.into_submission(&self.config.operator.id, base_dir)?;

    self.store.save(&submission)?;
    tracing::info!(id = %submission.id, "submission saved for sync");
    println!(
      "Queued {} ({} waiting to sync)",
      submission.id,
      self.store.count_pending()?
    );
    Ok(())
  }

  pub async fn drain(&self) -> Result<()> {
    self.authorize(Permission::DrainQueue)?;
    let report = self.drainer(self.client()?).drain().await?;
    println!(
      "Synced {}, failed {}, skipped {}, {} still waiting",
      report.synced, report.failed, report.skipped, report.remaining
    );
    Ok(())
  }

  pub fn discard(&self, id: &str) -> Result<()> {
    self.authorize(Permission::DiscardSubmission)?;
    if !self.store.remove(id)? {
      return Err(eyre!("No queued submission with id {}", id));
    }
    tracing::info!(id, "submission discarded");
    println!("Discarded {}", id);
    Ok(())
  }

  /// Read a path through the interceptor and print the body.
  pub async fn fetch(&self, path: &str) -> Result<()> {
    self.authorize(Permission::ViewStock)?;
    let interceptor = self.interceptor(Arc::new(self.client()?));
    let result = interceptor.handle(&Request::get(path)).await?;

    print_source(result.source, result.cached_at);
    println!("{}", result.data.text());
    Ok(())
  }

  /// Show the FIFO recommendation for one stock item.
  pub async fn stock(&self, item_id: &str, quantity: Option<u64>) -> Result<()> {
    self.authorize(Permission::ViewStock)?;
    let interceptor = self.interceptor(Arc::new(self.client()?));

    let item: String = url::form_urlencoded::byte_serialize(item_id.as_bytes()).collect();
    let path = format!(
      "/rest/v1/stock_batches?item_id=eq.{}&select=id,item_id,quantity,expires_on",
      item
    );
    let result = interceptor.handle(&Request::get(path)).await?;
    print_source(result.source, result.cached_at);
    let batches = api_types::parse_stock_batches(&expect_success(result.data)?.body)?;

    let today = Local::now().date_naive();
    match stock::recommend(&batches, today) {
      Some(b) => println!(
        "Use batch {} ({} left, expires {})",
        b.id,
        b.quantity,
        b.expires_on
          .map(|d| d.to_string())
          .unwrap_or_else(|| "never".to_string())
      ),
      None => println!("No usable stock for {}", item_id),
    }

    for b in stock::expired(&batches, today) {
      if let Some(d) = b.expires_on {
        println!("Expired: batch {} ({} left, expired {})", b.id, b.quantity, d);
      }
    }

    if let Some(quantity) = quantity {
      let plan = stock::plan_withdrawal(&batches, quantity, today);
      for w in &plan.withdrawals {
        println!("Take {} from batch {}", w.quantity, w.batch.id);
      }
      if plan.shortfall > 0 {
        println!("Short by {}", plan.shortfall);
      }
    }
    Ok(())
  }

  pub fn purge_cache(&self) -> Result<()> {
    self.authorize(Permission::PurgeCache)?;
    let removed = self.cache_storage().clear()?;
    println!("Removed {} cached responses", removed);
    Ok(())
  }

  /// Run the sync worker until Ctrl-C.
  pub async fn watch(&self, skip_waiting: bool) -> Result<()> {
    self.authorize(Permission::DrainQueue)?;

    let client = self.client()?;
    let upstream = Arc::new(client.clone());
    let mut worker = SyncWorker::new(
      Arc::clone(&self.db),
      self.config.cache.version.clone(),
      self.interceptor(Arc::clone(&upstream)),
      self.drainer(client),
    )
    .with_heartbeat(Duration::from_secs(self.config.sync.probe_interval_secs));
    worker.install().await?;

    let events = EventHandler::new();
    let probe = events.spawn_probe(
      upstream,
      Duration::from_secs(self.config.sync.probe_interval_secs),
      PROBE_PATH.to_string(),
    );
    let signals = events.spawn_signal_listener();
    if skip_waiting {
      events
        .sender()
        .send(Event::Control(ControlMessage::SkipWaiting))
        .map_err(|e| eyre!("Failed to post control message: {}", e))?;
    }

    tracing::info!(pending = self.store.count_pending()?, "watching for connectivity");
    let result = worker.run(events).await;

    probe.abort();
    signals.abort();
    result
  }
}

fn expect_success(response: Response) -> Result<Response> {
  if response.is_success() {
    Ok(response)
  } else {
    Err(eyre!(
      "Backend returned {}: {}",
      response.status,
      response.text()
    ))
  }
}

fn print_source(source: CacheSource, cached_at: Option<chrono::DateTime<chrono::Utc>>) {
  let when = cached_at
    .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
    .unwrap_or_default();
  match source {
    CacheSource::Network => {}
    CacheSource::Cache => eprintln!("(cached {})", when),
    CacheSource::Offline => eprintln!("(offline, showing copy from {})", when),
    CacheSource::Placeholder => eprintln!("(offline, nothing cached)"),
  }
}
