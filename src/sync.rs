//! Delivery of queued likes when connectivity comes back.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, BoxFuture};
use reqwest::header::CONTENT_TYPE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::queue::{DurableQueue, LikeAction, PendingAction};

/// Tag of the connectivity-restored signal that triggers a drain.
pub const SYNC_LIKES_TAG: &str = "sync-likes";

/// Remote endpoint that accepts like actions.
pub trait LikeEndpoint: Send + Sync {
  /// Ok only when the server acknowledged the action with a 2xx.
  fn deliver<'a>(&'a self, action: &'a PendingAction) -> BoxFuture<'a, Result<()>>;
}

/// POSTs actions as JSON.
#[derive(Clone)]
pub struct HttpLikeEndpoint {
  client: reqwest::Client,
  url: Url,
}

impl HttpLikeEndpoint {
  pub fn new(client: reqwest::Client, url: Url) -> Self {
    Self { client, url }
  }

  async fn post(&self, action: &PendingAction) -> Result<()> {
    let body =
      serde_json::to_vec(action).map_err(|e| eyre!("Failed to serialize action: {}", e))?;

    let response = self
      .client
      .post(self.url.clone())
      .header(CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await
      .map_err(|e| eyre!("Failed to send like {}: {}", action.id, e))?;

    if response.status().is_success() {
      Ok(())
    } else {
      Err(eyre!(
        "Like {} rejected with status {}",
        action.id,
        response.status()
      ))
    }
  }
}

impl LikeEndpoint for HttpLikeEndpoint {
  fn deliver<'a>(&'a self, action: &'a PendingAction) -> BoxFuture<'a, Result<()>> {
    Box::pin(self.post(action))
  }
}

/// What a drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub delivered: usize,
  pub failed: usize,
  /// Another drain was already running, so this one did nothing
  pub skipped: bool,
}

impl DrainReport {
  pub fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Drains the durable queue against the like endpoint.
pub struct SyncCoordinator {
  queue: DurableQueue,
  endpoint: Arc<dyn LikeEndpoint>,
  draining: AtomicBool,
}

/// Clears the single-flight flag when a drain finishes, even on early return.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

impl SyncCoordinator {
  pub fn new(queue: DurableQueue, endpoint: Arc<dyn LikeEndpoint>) -> Self {
    Self {
      queue,
      endpoint,
      draining: AtomicBool::new(false),
    }
  }

  pub fn queue(&self) -> &DurableQueue {
    &self.queue
  }

  /// Attempt delivery of every action pending right now.
  ///
  /// Each action is tried independently; failures stay queued for the next
  /// drain. Overlapping calls are collapsed: while one drain runs, others
  /// return a skipped report.
  pub async fn drain(&self) -> DrainReport {
    if self
      .draining
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      info!("Like sync already running, skipping");
      return DrainReport::skipped();
    }
    let _guard = DrainGuard(&self.draining);

    let pending = match self.queue.pending().await {
      Ok(pending) => pending,
      Err(e) => {
        warn!("Failed to read pending likes: {}", e);
        return DrainReport::default();
      }
    };

    let outcomes = join_all(pending.iter().map(|action| self.deliver_one(action))).await;
    let delivered = outcomes.iter().filter(|ok| **ok).count();

    let report = DrainReport {
      attempted: pending.len(),
      delivered,
      failed: pending.len() - delivered,
      skipped: false,
    };
    info!(
      "Like sync finished: {} attempted, {} delivered, {} failed",
      report.attempted, report.delivered, report.failed
    );
    report
  }

  async fn deliver_one(&self, action: &PendingAction) -> bool {
    if let Err(e) = self.endpoint.deliver(action).await {
      warn!("Failed to sync like {}: {}", action.id, e);
      return false;
    }
    // Delivered; a failed removal only means a duplicate on the next drain
    if let Err(e) = self.queue.remove(&action.id).await {
      warn!("Failed to remove delivered like {}: {}", action.id, e);
    }
    true
  }
}

/// Result of toggling a like from a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeOutcome {
  Delivered,
  /// Could not reach the server; the action waits in the queue.
  Queued(PendingAction),
}

/// Page-side like button behaviour: send now, queue if that fails.
pub struct LikeClient {
  queue: DurableQueue,
  endpoint: Arc<dyn LikeEndpoint>,
}

impl LikeClient {
  pub fn new(queue: DurableQueue, endpoint: Arc<dyn LikeEndpoint>) -> Self {
    Self { queue, endpoint }
  }

  pub async fn toggle(&self, game_id: &str, liked: bool) -> Result<LikeOutcome> {
    let action = if liked {
      LikeAction::Like
    } else {
      LikeAction::Unlike
    };
    let action = PendingAction::new(game_id, action);

    match self.endpoint.deliver(&action).await {
      Ok(()) => Ok(LikeOutcome::Delivered),
      Err(e) => {
        info!("Queueing {} of {} for later: {}", action.action, game_id, e);
        self.queue.enqueue(&action).await?;
        Ok(LikeOutcome::Queued(action))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::queue::{SqliteKvStore, PENDING_LIKES};
  use crate::testing::FakeEndpoint;
  use std::time::Duration;

  fn queue() -> DurableQueue {
    let store = SqliteKvStore::new(Database::open_in_memory().unwrap(), PENDING_LIKES);
    DurableQueue::new(Arc::new(store))
  }

  async fn enqueue_games(queue: &DurableQueue, games: &[&str]) -> Vec<PendingAction> {
    let mut actions = Vec::new();
    for game in games {
      let action = PendingAction::new(game, LikeAction::Like);
      queue.enqueue(&action).await.unwrap();
      actions.push(action);
    }
    actions
  }

  #[tokio::test]
  async fn test_drain_keeps_only_failed_action() {
    let queue = queue();
    let actions = enqueue_games(&queue, &["a", "b", "c", "d"]).await;
    let endpoint = Arc::new(FakeEndpoint::new());
    endpoint.fail_game("c");

    let sync = SyncCoordinator::new(queue.clone(), endpoint.clone());
    let report = sync.drain().await;

    assert_eq!(report.attempted, 4);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(endpoint.attempts().len(), 4);
    assert_eq!(queue.pending().await.unwrap(), vec![actions[2].clone()]);
  }

  #[tokio::test]
  async fn test_failing_twice_then_succeeding() {
    let queue = queue();
    let actions = enqueue_games(&queue, &["monster-dash"]).await;
    let endpoint = Arc::new(FakeEndpoint::new());
    endpoint.fail_next(2);
    let sync = SyncCoordinator::new(queue.clone(), endpoint.clone());

    sync.drain().await;
    assert_eq!(queue.pending().await.unwrap(), actions);
    sync.drain().await;
    assert_eq!(queue.pending().await.unwrap(), actions);
    let report = sync.drain().await;
    assert_eq!(report.delivered, 1);
    assert!(queue.pending().await.unwrap().is_empty());
    assert_eq!(endpoint.attempts().len(), 3);
  }

  #[tokio::test]
  async fn test_drain_of_empty_queue() {
    let sync = SyncCoordinator::new(queue(), Arc::new(FakeEndpoint::new()));
    assert_eq!(sync.drain().await, DrainReport::default());
  }

  #[tokio::test]
  async fn test_overlapping_drain_is_skipped() {
    let queue = queue();
    enqueue_games(&queue, &["a"]).await;
    let endpoint = Arc::new(FakeEndpoint::new().with_delay(Duration::from_millis(100)));
    let sync = Arc::new(SyncCoordinator::new(queue.clone(), endpoint.clone()));

    let first = tokio::spawn({
      let sync = Arc::clone(&sync);
      async move { sync.drain().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(sync.drain().await.skipped);
    assert_eq!(first.await.unwrap().delivered, 1);
    assert_eq!(endpoint.attempts().len(), 1);

    // Flag is released afterwards
    assert!(!sync.drain().await.skipped);
  }

  #[tokio::test]
  async fn test_toggle_delivers_or_queues() {
    let queue = queue();
    let endpoint = Arc::new(FakeEndpoint::new());
    let client = LikeClient::new(queue.clone(), endpoint.clone());

    assert_eq!(
      client.toggle("monster-dash", true).await.unwrap(),
      LikeOutcome::Delivered
    );
    assert_eq!(queue.len().await.unwrap(), 0);

    endpoint.fail_game("slime-jump");
    let outcome = client.toggle("slime-jump", false).await.unwrap();
    let LikeOutcome::Queued(action) = outcome else {
      panic!("expected the like to be queued");
    };
    assert_eq!(action.action, LikeAction::Unlike);
    assert_eq!(queue.pending().await.unwrap(), vec![action]);
  }
}
