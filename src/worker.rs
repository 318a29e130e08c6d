//! Host event dispatch.
//!
//! The host delivers lifecycle, fetch, sync and push events; each one is
//! handled on its own task so a slow drain never holds up request routing.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::clients::{ClientWindow, Clients};
use crate::config::NotificationConfig;
use crate::http::Request;
use crate::lifecycle::{InstallReport, LifecycleManager};
use crate::push::{self, Notification, Notifier};
use crate::router::{Handled, RequestHandler, Router};
use crate::sync::{DrainReport, SyncCoordinator, SYNC_LIKES_TAG};

/// Events delivered by the host environment
#[derive(Debug)]
pub enum WorkerEvent {
  Install,
  Activate,
  /// Intercepted request; the answer goes back on `respond_to`
  Fetch {
    request: Request,
    respond_to: oneshot::Sender<Handled>,
  },
  /// Connectivity restored
  Sync { tag: String },
  /// Push message, possibly without data
  Push(Option<Vec<u8>>),
  NotificationClick(Notification),
}

pub struct Worker {
  router: Router,
  lifecycle: LifecycleManager,
  sync: SyncCoordinator,
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn Clients>,
  origin: Url,
  notifications: NotificationConfig,
}

impl Worker {
  pub fn new(
    router: Router,
    lifecycle: LifecycleManager,
    sync: SyncCoordinator,
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn Clients>,
    origin: Url,
    notifications: NotificationConfig,
  ) -> Self {
    Self {
      router,
      lifecycle,
      sync,
      notifier,
      clients,
      origin,
      notifications,
    }
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  pub fn lifecycle(&self) -> &LifecycleManager {
    &self.lifecycle
  }

  pub fn sync(&self) -> &SyncCoordinator {
    &self.sync
  }

  /// Install, then activate right away when install asks to skip waiting.
  pub async fn on_install(&self) -> InstallReport {
    let report = self.lifecycle.install().await;
    if report.skip_waiting {
      self.lifecycle.activate().await;
    }
    report
  }

  pub async fn on_activate(&self) -> Vec<String> {
    self.lifecycle.activate().await
  }

  /// Drain pending likes if the signal is ours. Other tags are ignored.
  pub async fn on_sync(&self, tag: &str) -> Option<DrainReport> {
    if tag != SYNC_LIKES_TAG {
      info!("Ignoring sync event with tag {}", tag);
      return None;
    }
    Some(self.sync.drain().await)
  }

  pub async fn on_push(&self, payload: Option<&[u8]>) -> Option<Notification> {
    push::handle_push(self.notifier.as_ref(), payload, &self.notifications).await
  }

  pub async fn on_notification_click(&self, notification: &Notification) -> Result<ClientWindow> {
    push::activate_notification(
      self.notifier.as_ref(),
      self.clients.as_ref(),
      &self.origin,
      notification,
    )
    .await
  }

  /// Handle one event. Failures are logged, never returned to the host.
  pub async fn dispatch(&self, event: WorkerEvent) {
    match event {
      WorkerEvent::Install => {
        self.on_install().await;
      }
      WorkerEvent::Activate => {
        self.on_activate().await;
      }
      WorkerEvent::Fetch {
        request,
        respond_to,
      } => {
        let handled = self.router.route(request).await;
        // Ignore send errors - the page may have gone away
        let _ = respond_to.send(handled);
      }
      WorkerEvent::Sync { tag } => {
        self.on_sync(&tag).await;
      }
      WorkerEvent::Push(payload) => {
        self.on_push(payload.as_deref()).await;
      }
      WorkerEvent::NotificationClick(notification) => {
        if let Err(e) = self.on_notification_click(&notification).await {
          warn!("Failed to open notification target: {}", e);
        }
      }
    }
  }

  /// Start the event loop. Events sent through the returned handle are each
  /// dispatched on their own task.
  pub fn spawn(self: Arc<Self>) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();

    let task = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        let worker = Arc::clone(&self);
        tokio::spawn(async move { worker.dispatch(event).await });
      }
    });

    (WorkerHandle { tx }, task)
  }
}

impl RequestHandler for Worker {
  fn handle(&self, request: Request) -> BoxFuture<'_, Handled> {
    self.router.handle(request)
  }
}

/// Sending side of a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  pub fn send(&self, event: WorkerEvent) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Worker has stopped"))
  }

  /// Route a request through the running worker and wait for the answer.
  pub async fn fetch(&self, request: Request) -> Result<Handled> {
    let (respond_to, rx) = oneshot::channel();
    self.send(WorkerEvent::Fetch {
      request,
      respond_to,
    })?;
    rx.await.map_err(|_| eyre!("Worker dropped the request"))
  }
}
