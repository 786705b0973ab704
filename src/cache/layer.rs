//! Cache layer that orchestrates caching policies with network fetching.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheKey, CacheResult};
use crate::remote::Response;

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the interceptor and the network client. Every
/// successful fetch refreshes the cache, whichever policy performed it.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  /// Entries older than this are treated as absent
  max_age: Duration,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      storage,
      max_age: Duration::hours(24),
    }
  }

  /// Set the max age of cached entries.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  /// Look up a live entry. Storage failures count as a miss.
  fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
    match self.storage.get(key, self.max_age) {
      Ok(entry) => entry,
      Err(e) => {
        tracing::warn!(key = %key.description, error = %e, "cache read failed");
        None
      }
    }
  }

  /// Store a copy of a successful response. Failures are logged, not returned.
  fn remember(&self, key: &CacheKey, response: &Response) {
    if !response.is_success() {
      return;
    }
    let entry = CacheEntry::new(key.clone(), response.clone());
    if let Err(e) = self.storage.put(&entry) {
      tracing::warn!(key = %key.description, error = %e, "cache write failed");
    }
  }

  /// Fetch with the cache-first policy.
  ///
  /// 1. Cached copy present - return it, network untouched
  /// 2. Otherwise fetch and store a copy
  /// 3. On fetch failure, return the fixed offline placeholder
  ///
  /// Never fails.
  pub async fn cache_first<F, Fut>(&self, key: &CacheKey, fetcher: F) -> CacheResult<Response>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.lookup(key) {
      return CacheResult::from_cache(cached.response, cached.written_at);
    }

    match fetcher().await {
      Ok(response) => {
        self.remember(key, &response);
        CacheResult::from_network(response)
      }
      Err(e) => {
        tracing::warn!(key = %key.description, error = %e, "offline with no cached copy");
        CacheResult::placeholder(Response::offline_placeholder())
      }
    }
  }

  /// Fetch with the network-first policy.
  ///
  /// The live fetch is bounded by `timeout` and dropped (cancelled) when it
  /// elapses. On timeout or failure the cached copy is returned if present,
  /// otherwise the failure propagates.
  pub async fn network_first<F, Fut>(
    &self,
    key: &CacheKey,
    timeout: std::time::Duration,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let error = match tokio::time::timeout(timeout, fetcher()).await {
      Ok(Ok(response)) => {
        self.remember(key, &response);
        return Ok(CacheResult::from_network(response));
      }
      Ok(Err(e)) => e,
      Err(_) => eyre!("Request timed out after {}s", timeout.as_secs_f32()),
    };

    match self.lookup(key) {
      Some(cached) => {
        tracing::info!(key = %key.description, error = %error, "serving cached copy");
        Ok(CacheResult::offline(cached.response, cached.written_at))
      }
      None => Err(error),
    }
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      max_age: self.max_age,
    }
  }
}
