//! Generation-aware access to a cache store.

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use super::traits::{CacheStore, CachedResponse};
use crate::http::{Request, Response};

/// Entry point to all cache generations held by a store.
#[derive(Clone)]
pub struct Caches {
  store: Arc<dyn CacheStore>,
}

impl Caches {
  pub fn new(store: Arc<dyn CacheStore>) -> Self {
    Self { store }
  }

  /// Open (creating if needed) the named generation.
  pub async fn open(&self, generation: &str) -> Result<CacheHandle> {
    self.store.create_generation(generation).await?;
    Ok(self.handle(generation))
  }

  /// Handle on a generation without touching the store.
  ///
  /// Reads from a generation that was never opened simply miss; the first
  /// write creates it.
  pub fn handle(&self, generation: &str) -> CacheHandle {
    CacheHandle {
      store: Arc::clone(&self.store),
      generation: generation.to_string(),
    }
  }

  pub async fn list_generations(&self) -> Result<Vec<String>> {
    self.store.list_generations().await
  }

  /// Delete every generation except `current`, returning the ones removed.
  ///
  /// Safe to repeat: a second run finds nothing to delete.
  pub async fn delete_all_except(&self, current: &str) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for generation in self.store.list_generations().await? {
      if generation == current {
        continue;
      }
      if self.store.delete_generation(&generation).await? {
        info!("Deleting old cache: {}", generation);
        deleted.push(generation);
      }
    }
    Ok(deleted)
  }
}

/// Handle on a single opened generation.
#[derive(Clone)]
pub struct CacheHandle {
  store: Arc<dyn CacheStore>,
  generation: String,
}

impl CacheHandle {
  pub async fn get(&self, request: &Request) -> Result<Option<CachedResponse>> {
    self.store.get(&self.generation, &request.cache_key()).await
  }

  pub async fn put(&self, request: &Request, response: &Response) -> Result<()> {
    self
      .store
      .put(&self.generation, &request.cache_key(), response)
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteCacheStore;
  use crate::db::Database;
  use url::Url;

  fn caches() -> Caches {
    let store = SqliteCacheStore::new(Database::open_in_memory().unwrap());
    Caches::new(Arc::new(store))
  }

  #[tokio::test]
  async fn test_delete_all_except_keeps_current() {
    let caches = caches();
    for generation in ["v1", "v2", "v3"] {
      caches.open(generation).await.unwrap();
    }

    let mut deleted = caches.delete_all_except("v3").await.unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["v1".to_string(), "v2".to_string()]);
    assert_eq!(caches.list_generations().await.unwrap(), vec!["v3".to_string()]);

    // Second run is a no-op
    assert!(caches.delete_all_except("v3").await.unwrap().is_empty());
    assert_eq!(caches.list_generations().await.unwrap(), vec!["v3".to_string()]);
  }

  #[tokio::test]
  async fn test_handle_keys_by_request() {
    let caches = caches();
    let handle = caches.open("v1").await.unwrap();
    let request = Request::get(Url::parse("https://example.com/js/main.js").unwrap());

    assert!(handle.get(&request).await.unwrap().is_none());
    handle
      .put(&request, &Response::text(200, "console.log(1)"))
      .await
      .unwrap();

    // Accept headers do not change the identity
    let navigation = request.clone().with_header("Accept", "text/html");
    let cached = handle.get(&navigation).await.unwrap().unwrap();
    assert_eq!(cached.response.body_text(), "console.log(1)");
  }
}
