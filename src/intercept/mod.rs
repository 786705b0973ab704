//! Network interception: routes every outbound request through its caching policy.

mod route;

pub use route::{Policy, Router};

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKey, CacheLayer, CacheResult, CacheSource};
use crate::remote::{Request, Response, Upstream};

/// Front door for all backend traffic.
pub struct Interceptor<U: Upstream> {
  router: Router,
  cache: CacheLayer,
  upstream: Arc<U>,
  network_timeout: Duration,
}

impl<U: Upstream> Interceptor<U> {
  pub fn new(router: Router, cache: CacheLayer, upstream: Arc<U>) -> Self {
    Self {
      router,
      cache,
      upstream,
      network_timeout: Duration::from_secs(5),
    }
  }

  /// Set the bound on live fetches of network-first routes.
  pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
    self.network_timeout = timeout;
    self
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  /// Handle a request according to its route.
  ///
  /// Cache-first routes never fail. Network-first routes fail only when the
  /// backend is unreachable and nothing is cached. Passthrough requests
  /// surface the raw outcome so callers can queue mutations themselves.
  pub async fn handle(&self, request: &Request) -> Result<CacheResult<Response>> {
    let policy = self.router.classify(request);
    tracing::debug!(method = %request.method, path = %request.path, ?policy, "intercepted");

    match policy {
      Policy::Passthrough => {
        let response = self.upstream.send(request).await?;
        Ok(CacheResult::from_network(response))
      }
      Policy::CacheFirst => {
        let key = CacheKey::for_request(request);
        Ok(
          self
            .cache
            .cache_first(&key, || self.upstream.send(request))
            .await,
        )
      }
      Policy::NetworkFirst => {
        let key = CacheKey::for_request(request);
        self
          .cache
          .network_first(&key, self.network_timeout, || self.upstream.send(request))
          .await
      }
    }
  }

  /// Warm the cache with every configured static asset.
  ///
  /// Returns how many assets are now cached.
  pub async fn precache(&self) -> usize {
    let mut cached = 0;
    let paths: Vec<String> = self.router.static_assets().map(String::from).collect();

    for path in paths {
      match self.handle(&Request::get(path.as_str())).await {
        Ok(r) if r.source != CacheSource::Placeholder && r.data.is_success() => cached += 1,
        _ => tracing::warn!(path = %path, "could not precache asset"),
      }
    }

    cached
  }
}
