use std::collections::HashSet;

use crate::config::RoutesConfig;
use crate::remote::Request;

/// Caching policy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
  CacheFirst,
  NetworkFirst,
  /// Not intercepted; sent as is and never cached
  Passthrough,
}

/// Classifies requests by path.
#[derive(Debug, Clone)]
pub struct Router {
  static_assets: HashSet<String>,
  api_segments: Vec<String>,
}

impl Router {
  pub fn new(routes: &RoutesConfig) -> Self {
    Self {
      static_assets: routes.static_assets.iter().cloned().collect(),
      api_segments: routes.api_segments.clone(),
    }
  }

  /// Mutating requests always pass through. Reads of a listed static asset
  /// (exact path) are cache-first, reads whose path contains an API segment
  /// are network-first, anything else passes through.
  pub fn classify(&self, request: &Request) -> Policy {
    if !request.method.is_read() {
      return Policy::Passthrough;
    }

    let route = request.route();
    if self.static_assets.contains(route) {
      Policy::CacheFirst
    } else if self.api_segments.iter().any(|s| route.contains(s.as_str())) {
      Policy::NetworkFirst
    } else {
      Policy::Passthrough
    }
  }

  pub fn static_assets(&self) -> impl Iterator<Item = &str> {
    self.static_assets.iter().map(String::as_str)
  }
}
