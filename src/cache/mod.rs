//! Read cache for offline support.
//!
//! This module stores the responses of intercepted reads and implements the
//! two caching policies applied to them:
//! - cache-first: serve a cached copy when present, fetch and store otherwise
//! - network-first: fetch with a timeout, fall back to the cached copy
//!
//! Entries older than the configured max age are treated as absent.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource};
