//! Test doubles shared by module tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheStore, CachedResponse, Caches, SqliteCacheStore, StoreFuture};
use crate::db::Database;
use crate::http::{Request, Response};
use crate::network::Fetcher;
use crate::push::{Notification, Notifier};
use crate::queue::PendingAction;
use crate::sync::LikeEndpoint;

pub const ORIGIN: &str = "https://games.example";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn memory_caches() -> Caches {
  let store = SqliteCacheStore::new(Database::open_in_memory().unwrap());
  Caches::new(Arc::new(store))
}

/// Cache store whose every operation fails, as with a missing disk.
pub struct BrokenCacheStore;

impl CacheStore for BrokenCacheStore {
  fn create_generation<'a>(&'a self, _generation: &'a str) -> StoreFuture<'a, ()> {
    Box::pin(async { Err(eyre!("disk gone")) })
  }

  fn get<'a>(&'a self, _generation: &'a str, _key: &'a str) -> StoreFuture<'a, Option<CachedResponse>> {
    Box::pin(async { Err(eyre!("disk gone")) })
  }

  fn put<'a>(&'a self, _generation: &'a str, _key: &'a str, _response: &'a Response)
    -> StoreFuture<'a, ()> {
    Box::pin(async { Err(eyre!("disk gone")) })
  }

  fn list_generations(&self) -> StoreFuture<'_, Vec<String>> {
    Box::pin(async { Err(eyre!("disk gone")) })
  }

  fn delete_generation<'a>(&'a self, _generation: &'a str) -> StoreFuture<'a, bool> {
    Box::pin(async { Err(eyre!("disk gone")) })
  }
}

/// Fetcher serving canned responses by URL. Unknown URLs get a 404; when
/// offline every fetch fails.
#[derive(Default)]
pub struct FakeFetcher {
  responses: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(self, path: &str, response: Response) -> Self {
    self.set(path, response);
    self
  }

  pub fn set(&self, path: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for FakeFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }
      let responses = self.responses.lock().unwrap();
      Ok(
        responses
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::text(404, "not found")),
      )
    })
  }
}

/// Like endpoint that records attempts and fails on demand.
#[derive(Default)]
pub struct FakeEndpoint {
  attempts: Mutex<Vec<String>>,
  failing_games: Mutex<HashSet<String>>,
  fail_next: AtomicUsize,
  delay: Option<Duration>,
}

impl FakeEndpoint {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Always reject actions for this game.
  pub fn fail_game(&self, game_id: &str) {
    self.failing_games.lock().unwrap().insert(game_id.to_string());
  }

  /// Reject the next `n` deliveries regardless of game.
  pub fn fail_next(&self, n: usize) {
    self.fail_next.store(n, Ordering::SeqCst);
  }

  /// Ids of every attempted delivery, in attempt order.
  pub fn attempts(&self) -> Vec<String> {
    self.attempts.lock().unwrap().clone()
  }
}

impl LikeEndpoint for FakeEndpoint {
  fn deliver<'a>(&'a self, action: &'a PendingAction) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      self.attempts.lock().unwrap().push(action.id.clone());

      let forced = self
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if forced || self.failing_games.lock().unwrap().contains(&action.game_id) {
        return Err(eyre!("503 Service Unavailable"));
      }
      Ok(())
    })
  }
}

/// Notifier that keeps every notification it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
  closed: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }

  pub fn closed(&self) -> Vec<Notification> {
    self.closed.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.shown.lock().unwrap().push(notification.clone());
      Ok(())
    })
  }

  fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.closed.lock().unwrap().push(notification.clone());
      Ok(())
    })
  }
}
