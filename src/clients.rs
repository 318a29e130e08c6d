//! Open pages of the site, as seen by the worker.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
  pub focused: bool,
  /// Whether the current worker version controls this page
  pub controlled: bool,
}

/// Host access to open windows.
pub trait Clients: Send + Sync {
  /// Take control of every open page without waiting for a reload.
  /// Returns how many pages were newly claimed.
  fn claim(&self) -> BoxFuture<'_, Result<usize>>;

  fn windows(&self) -> BoxFuture<'_, Result<Vec<ClientWindow>>>;

  fn focus(&self, id: u64) -> BoxFuture<'_, Result<ClientWindow>>;

  fn open_window<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ClientWindow>>;
}

/// In-process window registry.
#[derive(Default)]
pub struct WindowRegistry {
  windows: Mutex<Vec<ClientWindow>>,
  next_id: AtomicU64,
}

impl WindowRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a page that loaded before the worker took control.
  #[cfg(test)]
  pub fn attach(&self, url: &str) -> Result<ClientWindow> {
    let window = ClientWindow {
      id: self.next_id.fetch_add(1, Ordering::SeqCst),
      url: url.to_string(),
      focused: false,
      controlled: false,
    };
    self.lock()?.push(window.clone());
    Ok(window)
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ClientWindow>>> {
    self
      .windows
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn claim_sync(&self) -> Result<usize> {
    let mut windows = self.lock()?;
    let mut claimed = 0;
    for window in windows.iter_mut().filter(|w| !w.controlled) {
      window.controlled = true;
      claimed += 1;
    }
    Ok(claimed)
  }

  fn focus_sync(&self, id: u64) -> Result<ClientWindow> {
    let mut windows = self.lock()?;
    let mut focused = None;
    for window in windows.iter_mut() {
      window.focused = window.id == id;
      if window.focused {
        focused = Some(window.clone());
      }
    }
    let window = focused.ok_or_else(|| eyre!("No window with id {}", id))?;
    info!("Focused window {} at {}", window.id, window.url);
    Ok(window)
  }

  fn open_sync(&self, url: &str) -> Result<ClientWindow> {
    let mut windows = self.lock()?;
    for window in windows.iter_mut() {
      window.focused = false;
    }
    let window = ClientWindow {
      id: self.next_id.fetch_add(1, Ordering::SeqCst),
      url: url.to_string(),
      focused: true,
      controlled: true,
    };
    windows.push(window.clone());
    info!("Opened window {} at {}", window.id, window.url);
    Ok(window)
  }
}

impl Clients for WindowRegistry {
  fn claim(&self) -> BoxFuture<'_, Result<usize>> {
    Box::pin(async move { self.claim_sync() })
  }

  fn windows(&self) -> BoxFuture<'_, Result<Vec<ClientWindow>>> {
    Box::pin(async move { Ok(self.lock()?.clone()) })
  }

  fn focus(&self, id: u64) -> BoxFuture<'_, Result<ClientWindow>> {
    Box::pin(async move { self.focus_sync(id) })
  }

  fn open_window<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ClientWindow>> {
    Box::pin(async move { self.open_sync(url) })
  }
}
