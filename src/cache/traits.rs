//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use futures::future::BoxFuture;

use crate::http::Response;

/// Future returned by store operations.
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// A stored response together with when it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Persistent storage for cache generations.
///
/// Writes are overwrites (last write wins) and deletes are idempotent, so
/// implementations can be shared by concurrent tasks without extra locking.
pub trait CacheStore: Send + Sync {
  /// Register a generation so it shows up in listings even while empty.
  fn create_generation<'a>(&'a self, generation: &'a str) -> StoreFuture<'a, ()>;

  /// Look up the response stored under `key` in `generation`.
  fn get<'a>(&'a self, generation: &'a str, key: &'a str) -> StoreFuture<'a, Option<CachedResponse>>;

  /// Store `response` under `key`, replacing any previous entry.
  fn put<'a>(&'a self, generation: &'a str, key: &'a str, response: &'a Response)
    -> StoreFuture<'a, ()>;

  /// All generation identifiers currently present.
  fn list_generations(&self) -> StoreFuture<'_, Vec<String>>;

  /// Drop a generation and all its entries. Returns false if it did not exist.
  fn delete_generation<'a>(&'a self, generation: &'a str) -> StoreFuture<'a, bool>;
}

/// Result from a routed request, including data and metadata about the source.
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

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// The stored offline document, served when a navigation has nothing better.
  pub fn offline_page(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::OfflinePage,
      cached_at: Some(cached_at),
    }
  }

  /// A response built by the worker itself.
  pub fn synthetic(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthetic,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live response from the network
  Network,
  /// Stored entry for the same request
  Cache,
  /// Network and cache both missed; the stored offline document was used
  OfflinePage,
  /// Nothing stored at all; minimal generated response
  Synthetic,
}
