//! Async key-value storage used by the pending-like queue.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use crate::cache::StoreFuture;
use crate::db::Database;

/// Minimal persistent key-value interface.
///
/// `put` overwrites and `delete` of a missing key succeeds, so callers never
/// need to coordinate with each other.
pub trait KeyValueStore: Send + Sync {
  fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

  fn put<'a>(&'a self, key: &'a str, value: &'a [u8]) -> StoreFuture<'a, ()>;

  /// Returns whether a record was removed.
  fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

  /// Keys in insertion order.
  fn list_keys(&self) -> StoreFuture<'_, Vec<String>>;
}

/// A namespace of the `kv_store` table.
#[derive(Clone)]
pub struct SqliteKvStore {
  db: Database,
  namespace: String,
}

impl SqliteKvStore {
  pub fn new(db: Database, namespace: &str) -> Self {
    Self {
      db,
      namespace: namespace.to_string(),
    }
  }

  fn get_sync(&self, key: &str) -> Result<Option<Vec<u8>>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT value FROM kv_store WHERE namespace = ? AND key = ?",
        params![self.namespace, key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}/{}: {}", self.namespace, key, e))
  }

  fn put_sync(&self, key: &str, value: &[u8]) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO kv_store (namespace, key, value) VALUES (?, ?, ?)",
        params![self.namespace, key, value],
      )
      .map_err(|e| eyre!("Failed to write {}/{}: {}", self.namespace, key, e))?;
    Ok(())
  }

  fn delete_sync(&self, key: &str) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM kv_store WHERE namespace = ? AND key = ?",
        params![self.namespace, key],
      )
      .map_err(|e| eyre!("Failed to delete {}/{}: {}", self.namespace, key, e))?;
    Ok(removed > 0)
  }

  fn list_keys_sync(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv_store WHERE namespace = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![self.namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list {}: {}", self.namespace, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key in {}: {}", self.namespace, e))?;

    Ok(keys)
  }
}

impl KeyValueStore for SqliteKvStore {
  fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
    Box::pin(async move { self.get_sync(key) })
  }

  fn put<'a>(&'a self, key: &'a str, value: &'a [u8]) -> StoreFuture<'a, ()> {
    Box::pin(async move { self.put_sync(key, value) })
  }

  fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
    Box::pin(async move { self.delete_sync(key) })
  }

  fn list_keys(&self) -> StoreFuture<'_, Vec<String>> {
    Box::pin(async move { self.list_keys_sync() })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_namespaces_are_isolated() {
    let db = Database::open_in_memory().unwrap();
    let likes = SqliteKvStore::new(db.clone(), "likes");
    let other = SqliteKvStore::new(db, "other");

    likes.put("a", b"1").await.unwrap();
    assert_eq!(likes.get("a").await.unwrap(), Some(b"1".to_vec()));
    assert_eq!(other.get("a").await.unwrap(), None);
    assert!(other.list_keys().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_list_keys_in_insertion_order() {
    let store = SqliteKvStore::new(Database::open_in_memory().unwrap(), "likes");
    for key in ["c", "a", "b"] {
      store.put(key, b"x").await.unwrap();
    }
    assert_eq!(store.list_keys().await.unwrap(), vec!["c", "a", "b"]);
  }

  #[tokio::test]
  async fn test_delete_missing_key_is_not_an_error() {
    let store = SqliteKvStore::new(Database::open_in_memory().unwrap(), "likes");
    store.put("a", b"x").await.unwrap();
    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());
  }
}
