//! Durable queue of like actions that have not reached the server yet.
//!
//! Actions are stored one record per id and only removed once the server has
//! acknowledged them, giving at-least-once delivery.

mod store;

pub use store::{KeyValueStore, SqliteKvStore};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Store namespace holding pending likes.
pub const PENDING_LIKES: &str = "pending-likes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeAction {
  Like,
  Unlike,
}

impl fmt::Display for LikeAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LikeAction::Like => f.pad("like"),
      LikeAction::Unlike => f.pad("unlike"),
    }
  }
}

/// One like toggle awaiting delivery. Serialized as the POST body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
  pub id: String,
  pub game_id: String,
  pub action: LikeAction,
  pub created_at: DateTime<Utc>,
}

impl PendingAction {
  pub fn new(game_id: &str, action: LikeAction) -> Self {
    let created_at = Utc::now();

    let mut hasher = Sha256::new();
    hasher.update(game_id.as_bytes());
    hasher.update(action.to_string().as_bytes());
    hasher.update(
      created_at
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_be_bytes(),
    );
    let id = hex::encode(&hasher.finalize()[..8]);

    Self {
      id,
      game_id: game_id.to_string(),
      action,
      created_at,
    }
  }
}

/// Persistent list of pending actions.
#[derive(Clone)]
pub struct DurableQueue {
  store: Arc<dyn KeyValueStore>,
}

impl DurableQueue {
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    Self { store }
  }

  /// Persist an action. Returns once it is durably stored.
  pub async fn enqueue(&self, action: &PendingAction) -> Result<()> {
    let data =
      serde_json::to_vec(action).map_err(|e| eyre!("Failed to serialize action: {}", e))?;
    self.store.put(&action.id, &data).await?;
    debug!("Queued {} of {} as {}", action.action, action.game_id, action.id);
    Ok(())
  }

  /// Snapshot of every pending action, oldest first.
  ///
  /// Records that no longer decode are skipped and left in place.
  pub async fn pending(&self) -> Result<Vec<PendingAction>> {
    let mut actions = Vec::new();
    for key in self.store.list_keys().await? {
      let Some(data) = self.store.get(&key).await? else {
        // Removed since listing
        continue;
      };
      match serde_json::from_slice(&data) {
        Ok(action) => actions.push(action),
        Err(e) => warn!("Skipping unreadable pending action {}: {}", key, e),
      }
    }
    Ok(actions)
  }

  /// Remove an action by id. Removing an unknown id is a no-op.
  pub async fn remove(&self, id: &str) -> Result<()> {
    self.store.delete(id).await?;
    Ok(())
  }

  pub async fn len(&self) -> Result<usize> {
    Ok(self.store.list_keys().await?.len())
  }
}
