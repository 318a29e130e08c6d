//! Install/activate lifecycle of a cache generation.
//!
//! Install pre-populates the current generation and skips the waiting phase;
//! activate drops every other generation and claims open pages immediately.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheHandle, Caches};
use crate::clients::Clients;
use crate::config::Config;
use crate::http::Request;
use crate::network::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Not yet installed
  New,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  Active,
  /// A generation other than the current one
  Superseded,
}

/// Outcome of pre-populating the cache.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  /// Manifest paths that were stored
  pub cached: Vec<String>,
  /// Manifest paths that could not be stored, with the reason
  pub failed: Vec<(String, String)>,
  /// Activation should follow immediately instead of waiting
  pub skip_waiting: bool,
}

pub struct LifecycleManager {
  caches: Caches,
  fetcher: Arc<dyn Fetcher>,
  clients: Arc<dyn Clients>,
  generation: String,
  origin: Url,
  manifest: Vec<String>,
  state: Mutex<LifecycleState>,
}

impl LifecycleManager {
  pub fn new(
    caches: Caches,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    generation: &str,
    origin: Url,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      caches,
      fetcher,
      clients,
      generation: generation.to_string(),
      origin,
      manifest,
      state: Mutex::new(LifecycleState::New),
    }
  }

  pub fn from_config(
    config: &Config,
    caches: Caches,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
  ) -> Result<Self> {
    Ok(Self::new(
      caches,
      fetcher,
      clients,
      &config.cache.current_generation,
      config.origin_url()?,
      config.cache.precache_manifest.clone(),
    ))
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn state(&self) -> LifecycleState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(LifecycleState::New)
  }

  /// State of an arbitrary generation from this worker's point of view.
  pub fn generation_state(&self, generation: &str) -> LifecycleState {
    if generation == self.generation {
      self.state()
    } else {
      LifecycleState::Superseded
    }
  }

  fn set_state(&self, state: LifecycleState) {
    if let Ok(mut current) = self.state.lock() {
      info!("Generation {}: {:?} -> {:?}", self.generation, *current, state);
      *current = state;
    }
  }

  /// Pre-populate the current generation from the manifest.
  ///
  /// A manifest entry that fails is logged and skipped, as is a store that
  /// cannot open the generation; installation always completes.
  pub async fn install(&self) -> InstallReport {
    self.set_state(LifecycleState::Installing);
    let cache = match self.caches.open(&self.generation).await {
      Ok(cache) => cache,
      Err(e) => {
        warn!("Failed to open cache {}: {}", self.generation, e);
        self.caches.handle(&self.generation)
      }
    };
    let mut report = InstallReport::default();

    info!("Pre-caching {} resources", self.manifest.len());
    for path in &self.manifest {
      match self.precache(&cache, path).await {
        Ok(()) => report.cached.push(path.clone()),
        Err(e) => {
          warn!("Pre-caching {} failed: {}", path, e);
          report.failed.push((path.clone(), e.to_string()));
        }
      }
    }

    self.set_state(LifecycleState::Installed);
    report.skip_waiting = true;
    report
  }

  async fn precache(&self, cache: &CacheHandle, path: &str) -> Result<()> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid manifest path: {}", e))?;
    let request = Request::get(url);
    let response = self.fetcher.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!("status {}", response.status));
    }
    cache.put(&request, &response).await
  }

  /// Delete every other generation and take control of open pages.
  ///
  /// Returns the generations that were removed. Running it again is a no-op.
  /// Pages are claimed even when cleanup fails.
  pub async fn activate(&self) -> Vec<String> {
    self.set_state(LifecycleState::Activating);

    let deleted = match self.caches.delete_all_except(&self.generation).await {
      Ok(deleted) => deleted,
      Err(e) => {
        warn!("Failed to delete old caches: {}", e);
        Vec::new()
      }
    };

    match self.clients.claim().await {
      Ok(claimed) => info!("Claimed {} open pages", claimed),
      Err(e) => warn!("Failed to claim open pages: {}", e),
    }

    self.set_state(LifecycleState::Active);
    deleted
  }
}
