//! SQLite implementation of the cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::traits::{CacheStore, CachedResponse, StoreFuture};
use crate::db::Database;
use crate::http::Response;

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteCacheStore {
  db: Database,
}

impl SqliteCacheStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  fn create_generation_sync(&self, generation: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to create cache generation {}: {}", generation, e))?;
    Ok(())
  }

  fn get_sync(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE generation = ? AND request_hash = ?",
        params![generation, request_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_sync(&self, generation: &str, key: &str, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let (method, url) = key.split_once(' ').unwrap_or(("GET", key));

    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create cache generation {}: {}", generation, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (generation, request_hash, method, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        request_hash(key),
        method,
        url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn list_generations_sync(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(names)
  }

  fn delete_generation_sync(&self, generation: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete cache entries: {}", e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete cache generation: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

impl CacheStore for SqliteCacheStore {
  fn create_generation<'a>(&'a self, generation: &'a str) -> StoreFuture<'a, ()> {
    Box::pin(async move { self.create_generation_sync(generation) })
  }

  fn get<'a>(&'a self, generation: &'a str, key: &'a str) -> StoreFuture<'a, Option<CachedResponse>> {
    Box::pin(async move { self.get_sync(generation, key) })
  }

  fn put<'a>(
    &'a self,
    generation: &'a str,
    key: &'a str,
    response: &'a Response,
  ) -> StoreFuture<'a, ()> {
    Box::pin(async move { self.put_sync(generation, key, response) })
  }

  fn list_generations(&self) -> StoreFuture<'_, Vec<String>> {
    Box::pin(async move { self.list_generations_sync() })
  }

  fn delete_generation<'a>(&'a self, generation: &'a str) -> StoreFuture<'a, bool> {
    Box::pin(async move { self.delete_generation_sync(generation) })
  }
}

/// SHA256 of the request identity for stable, fixed-length keys.
fn request_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> SqliteCacheStore {
    SqliteCacheStore::new(Database::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_put_then_get() {
    let store = store();
    let response = Response::text(200, "body { color: red }");

    store
      .put("v1", "GET https://example.com/css/main.css", &response)
      .await
      .unwrap();

    let cached = store
      .get("v1", "GET https://example.com/css/main.css")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, response);
  }

  #[tokio::test]
  async fn test_get_is_scoped_to_generation() {
    let store = store();
    store
      .put("v1", "GET https://example.com/", &Response::text(200, "old"))
      .await
      .unwrap();

    assert!(store
      .get("v2", "GET https://example.com/")
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_put_overwrites() {
    let store = store();
    let key = "GET https://example.com/";
    store.put("v1", key, &Response::text(200, "first")).await.unwrap();
    store.put("v1", key, &Response::text(200, "second")).await.unwrap();

    let cached = store.get("v1", key).await.unwrap().unwrap();
    assert_eq!(cached.response.body_text(), "second");
  }

  #[tokio::test]
  async fn test_empty_generation_is_listed() {
    let store = store();
    store.create_generation("v1").await.unwrap();
    store.create_generation("v1").await.unwrap();

    assert_eq!(store.list_generations().await.unwrap(), vec!["v1".to_string()]);
  }

  #[tokio::test]
  async fn test_delete_generation_removes_entries() {
    let store = store();
    let key = "GET https://example.com/";
    store.put("v1", key, &Response::text(200, "x")).await.unwrap();

    assert!(store.delete_generation("v1").await.unwrap());
    assert!(!store.delete_generation("v1").await.unwrap());
    assert!(store.get("v1", key).await.unwrap().is_none());
    assert!(store.list_generations().await.unwrap().is_empty());
  }
}
