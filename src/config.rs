use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Site origin the worker serves, e.g. "https://monster-running.example"
  pub origin: String,
  /// Database location (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// Network timeout in seconds
  pub timeout_secs: u64,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Version tag of the current cache generation
  pub current_generation: String,
  /// Paths fetched and stored at install time
  pub precache_manifest: Vec<String>,
  /// Same-origin path prefixes served cache-first
  pub dynamic_path_prefixes: Vec<String>,
  /// External hosts allowed to be intercepted and served cache-first
  #[serde(deserialize_with = "deserialize_lowercase_set")]
  pub allow_listed_hosts: BTreeSet<String>,
  /// Document served to navigations when both network and cache miss
  pub offline_page: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Path (or absolute URL) that pending likes are POSTed to
  pub endpoint: String,
}

/// Fallback values for push notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub url: String,
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      database: None,
      timeout_secs: 15,
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      current_generation: "monster-running-cache-v1".to_string(),
      precache_manifest: [
        "/",
        "/index.html",
        "/css/main.css",
        "/js/main.js",
        "/images/favicon.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      dynamic_path_prefixes: ["/css/", "/js/", "/images/"]
        .into_iter()
        .map(String::from)
        .collect(),
      allow_listed_hosts: BTreeSet::from(["cdn.jsdelivr.net".to_string()]),
      offline_page: "/offline.html".to_string(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      endpoint: "/api/likes".to_string(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Monster Running Update".to_string(),
      body: "New content available!".to_string(),
      icon: "/images/favicon.png".to_string(),
      badge: "/images/badge.png".to_string(),
      url: "/".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  ///
  /// Built-in defaults are used when no file is found. OFFLINE_WORKER_ORIGIN
  /// overrides the origin in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        debug!("No configuration file found, using defaults");
        Self::default()
      }
    };

    if let Some(origin) = Self::origin_override() {
      config.origin = origin;
    }

    config.origin_url()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn origin_override() -> Option<String> {
    std::env::var("OFFLINE_WORKER_ORIGIN")
      .ok()
      .filter(|s| !s.trim().is_empty())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve the like-sync endpoint against the origin.
  pub fn sync_endpoint_url(&self) -> Result<Url> {
    self
      .origin_url()?
      .join(&self.sync.endpoint)
      .map_err(|e| eyre!("Invalid sync endpoint '{}': {}", self.sync.endpoint, e))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => crate::db::Database::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_yaml_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.cache.current_generation, "monster-running-cache-v1");
    assert_eq!(config.cache.precache_manifest.len(), 5);
    assert!(config.cache.allow_listed_hosts.contains("cdn.jsdelivr.net"));
    assert_eq!(config.sync.endpoint, "/api/likes");
  }

  #[test]
  fn test_partial_yaml_overrides() {
    let yaml = r#"
origin: https://games.example
cache:
  current_generation: v7
  allow_listed_hosts: [CDN.Example.COM]
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.cache.current_generation, "v7");
    assert!(config.cache.allow_listed_hosts.contains("cdn.example.com"));
    // Untouched fields keep their defaults
    assert_eq!(config.cache.offline_page, "/offline.html");
    assert_eq!(
      config.sync_endpoint_url().unwrap().as_str(),
      "https://games.example/api/likes"
    );
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    let config = Config::from_yaml("origin: not a url").unwrap();
    assert!(config.origin_url().is_err());
  }
}
