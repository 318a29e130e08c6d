//! Request interception and cache strategy selection.
//!
//! Every request the host intercepts goes through [`Router::route`]:
//!
//! - HTML navigations are network-first, falling back to the cached copy,
//!   then the offline document, then a generated "offline" page.
//! - Static assets (configured path prefixes, allow-listed hosts) are
//!   cache-first and only 200 responses are stored.
//! - Anything else is network-first with a best-effort cache fallback.
//!
//! Cache writes go to the current generation only and run as detached tasks,
//! so a response is returned before its copy is persisted.

use color_eyre::Result;
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheHandle, CacheResult, Caches, CachedResponse};
use crate::config::Config;
use crate::http::{Request, Response};
use crate::network::Fetcher;

/// Body of the generated response when nothing else is available.
pub const OFFLINE_TEXT: &str = "You are offline";

/// Outcome of routing one request.
#[derive(Debug, Clone)]
pub enum Handled {
  /// Not intercepted; the host should perform the request itself.
  Bypass,
  /// Intercepted and answered.
  Respond(CacheResult<Response>),
  /// Intercepted, but neither network nor cache produced anything.
  Absent,
}

impl Handled {
  pub fn response(&self) -> Option<&Response> {
    match self {
      Handled::Respond(result) => Some(&result.data),
      _ => None,
    }
  }
}

/// Something the host's interception hook can hand requests to.
pub trait RequestHandler: Send + Sync {
  fn handle(&self, request: Request) -> BoxFuture<'_, Handled>;
}

/// Caching strategy chosen for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Network-first with offline document fallback
  Navigation,
  /// Cache-first, store 200s on miss
  CacheFirst,
  /// Network-first, cache 200s, fall back to whatever is stored
  NetworkFirst,
}

/// Decides which requests are intercepted and how.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
  origin: Url,
  dynamic_path_prefixes: Vec<String>,
  allow_listed_hosts: BTreeSet<String>,
}

impl RoutingPolicy {
  pub fn new(
    origin: Url,
    dynamic_path_prefixes: Vec<String>,
    allow_listed_hosts: BTreeSet<String>,
  ) -> Self {
    Self {
      origin,
      dynamic_path_prefixes,
      allow_listed_hosts,
    }
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self::new(
      config.origin_url()?,
      config.cache.dynamic_path_prefixes.clone(),
      config.cache.allow_listed_hosts.clone(),
    ))
  }

  fn is_allow_listed(&self, url: &Url) -> bool {
    url
      .host_str()
      .map(|host| self.allow_listed_hosts.contains(&host.to_lowercase()))
      .unwrap_or(false)
  }

  /// Pick a strategy, or `None` if the request must not be intercepted.
  pub fn classify(&self, request: &Request) -> Option<Strategy> {
    if !request.method.is_retrieval() {
      return None;
    }

    let same_origin = request.url.origin() == self.origin.origin();
    let allow_listed = !same_origin && self.is_allow_listed(&request.url);
    if !same_origin && !allow_listed {
      return None;
    }

    if request.accepts_html() {
      return Some(Strategy::Navigation);
    }

    let path = request.url.path();
    let is_asset = allow_listed
      || self
        .dynamic_path_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()));

    if is_asset {
      Some(Strategy::CacheFirst)
    } else {
      Some(Strategy::NetworkFirst)
    }
  }
}

/// The request handler: routing policy plus the current cache generation.
pub struct Router {
  policy: RoutingPolicy,
  cache: CacheHandle,
  offline_page: Url,
  fetcher: Arc<dyn Fetcher>,
  writes: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Router {
  pub fn new(
    policy: RoutingPolicy,
    caches: &Caches,
    current_generation: &str,
    offline_page: Url,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      policy,
      cache: caches.handle(current_generation),
      offline_page,
      fetcher,
      writes: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn from_config(config: &Config, caches: &Caches, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
    let offline_page = config
      .origin_url()?
      .join(&config.cache.offline_page)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid offline page: {}", e))?;

    Ok(Self::new(
      RoutingPolicy::from_config(config)?,
      caches,
      &config.cache.current_generation,
      offline_page,
      fetcher,
    ))
  }

  /// Route a single intercepted request. Never fails: every error path has
  /// a fallback.
  pub async fn route(&self, request: Request) -> Handled {
    match self.policy.classify(&request) {
      None => Handled::Bypass,
      Some(Strategy::Navigation) => self.navigation(request).await,
      Some(Strategy::CacheFirst) => self.cache_first(request).await,
      Some(Strategy::NetworkFirst) => self.network_first(request).await,
    }
  }

  /// Wait for every cache write started so far.
  pub async fn flush_writes(&self) {
    let pending: Vec<JoinHandle<()>> = match self.writes.lock() {
      Ok(mut writes) => writes.drain(..).collect(),
      Err(_) => return,
    };
    for handle in pending {
      let _ = handle.await;
    }
  }

  async fn navigation(&self, request: Request) -> Handled {
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store_detached(&request, &response);
        Handled::Respond(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!("Navigation to {} failed, trying cache: {}", request.url, e);

        if let Some(cached) = self.lookup(&request).await {
          return Handled::Respond(CacheResult::from_cache(cached.response, cached.stored_at));
        }

        let offline = Request::get(self.offline_page.clone());
        if let Some(cached) = self.lookup(&offline).await {
          return Handled::Respond(CacheResult::offline_page(
            cached.response,
            cached.stored_at,
          ));
        }

        Handled::Respond(CacheResult::synthetic(Response::text(200, OFFLINE_TEXT)))
      }
    }
  }

  async fn cache_first(&self, request: Request) -> Handled {
    if let Some(cached) = self.lookup(&request).await {
      return Handled::Respond(CacheResult::from_cache(cached.response, cached.stored_at));
    }

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_detached(&request, &response);
        }
        Handled::Respond(CacheResult::from_network(response))
      }
      Err(e) => {
        warn!("Failed to fetch asset {}: {}", request.url, e);
        Handled::Absent
      }
    }
  }

  async fn network_first(&self, request: Request) -> Handled {
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_detached(&request, &response);
        }
        Handled::Respond(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!("Fetch of {} failed, trying cache: {}", request.url, e);
        match self.lookup(&request).await {
          Some(cached) => {
            Handled::Respond(CacheResult::from_cache(cached.response, cached.stored_at))
          }
          None => Handled::Absent,
        }
      }
    }
  }

  /// Cache read where a store failure counts as a miss.
  async fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    match self.cache.get(request).await {
      Ok(cached) => cached,
      Err(e) => {
        warn!("Cache lookup for {} failed: {}", request.url, e);
        None
      }
    }
  }

  fn store_detached(&self, request: &Request, response: &Response) {
    let cache = self.cache.clone();
    let request = request.clone();
    let response = response.clone();

    let handle = tokio::spawn(async move {
      if let Err(e) = cache.put(&request, &response).await {
        warn!("Failed to cache {}: {}", request.url, e);
      }
    });

    if let Ok(mut writes) = self.writes.lock() {
      writes.retain(|h| !h.is_finished());
      writes.push(handle);
    }
  }
}

impl RequestHandler for Router {
  fn handle(&self, request: Request) -> BoxFuture<'_, Handled> {
    Box::pin(self.route(request))
  }
}
