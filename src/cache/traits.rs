//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::remote::{Request, Response};

/// Stable key of a cached read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
  /// SHA256 of the normalized request line
  pub hash: String,
  /// Human-readable form, kept for inspection
  pub description: String,
}

impl CacheKey {
  /// Build the key of a request from its method and path (including query).
  pub fn for_request(request: &Request) -> Self {
    let description = format!("{} {}", request.method, request.path.trim());

    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { hash, description }
  }
}

/// A cached response and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub response: Response,
  pub written_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(key: CacheKey, response: Response) -> Self {
    Self {
      key,
      response,
      written_at: Utc::now(),
    }
  }

  /// True if the entry was written more than `max_age` ago.
  pub fn is_expired(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
    now - self.written_at > max_age
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a cache hit.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result served because the network failed.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Create a result carrying the fixed offline placeholder.
  pub fn placeholder(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Placeholder,
      cached_at: None,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit, network not consulted
  Cache,
  /// Network unavailable, serving cached data
  Offline,
  /// Network unavailable and nothing cached
  Placeholder,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::Method;

  #[test]
  fn test_key_depends_on_method_and_path() {
    let get = CacheKey::for_request(&Request::get("/rest/v1/vehicles?select=*"));
    let same = CacheKey::for_request(&Request::get("/rest/v1/vehicles?select=*"));
    let other = CacheKey::for_request(&Request::get("/rest/v1/vehicles?select=id"));
    let head = CacheKey::for_request(&Request::new(Method::Head, "/rest/v1/vehicles?select=*"));

    assert_eq!(get, same);
    assert_ne!(get.hash, other.hash);
    assert_ne!(get.hash, head.hash);
    assert_eq!(get.hash.len(), 64);
    assert_eq!(get.description, "GET /rest/v1/vehicles?select=*");
  }

  #[test]
  fn test_expiry() {
    let key = CacheKey::for_request(&Request::get("/"));
    let mut entry = CacheEntry::new(key, Response::ok(b"x".to_vec()));
    let now = Utc::now();
    assert!(!entry.is_expired(chrono::Duration::hours(24), now));

    entry.written_at = now - chrono::Duration::hours(25);
    assert!(entry.is_expired(chrono::Duration::hours(24), now));
  }
}
