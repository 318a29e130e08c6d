//! Push messages and the notifications they produce.

use color_eyre::Result;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use url::Url;

use crate::clients::{ClientWindow, Clients};
use crate::config::NotificationConfig;

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  /// Page to show when the notification is activated
  pub url: String,
}

/// Displays notifications on the host.
pub trait Notifier: Send + Sync {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>>;

  fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>>;
}

/// Build the notification for a push payload.
///
/// JSON objects fill in fields over the defaults; anything else is shown as
/// plain text under the default title.
pub fn parse_push(payload: &[u8], defaults: &NotificationConfig) -> Notification {
  match serde_json::from_slice::<Value>(payload) {
    Ok(Value::Object(fields)) => {
      let field =
        |name: &str, default: &str| text_field(&fields, name).unwrap_or_else(|| default.to_string());
      Notification {
        title: field("title", &defaults.title),
        body: field("body", &defaults.body),
        icon: Some(field("icon", &defaults.icon)),
        badge: Some(field("badge", &defaults.badge)),
        url: field("url", &defaults.url),
      }
    }
    parsed => {
      match parsed {
        Ok(_) => warn!("Push payload is not a JSON object, showing as text"),
        Err(e) => warn!("Push payload is not JSON, showing as text: {}", e),
      }
      Notification {
        title: defaults.title.clone(),
        body: String::from_utf8_lossy(payload).into_owned(),
        icon: Some(defaults.icon.clone()),
        badge: None,
        url: defaults.url.clone(),
      }
    }
  }
}

/// Strings are taken as-is, other scalars by their JSON text. Null counts as absent.
fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
  match fields.get(name)? {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

/// Show the notification for an incoming push. Empty pushes show nothing.
pub async fn handle_push(
  notifier: &dyn Notifier,
  payload: Option<&[u8]>,
  defaults: &NotificationConfig,
) -> Option<Notification> {
  let payload = payload.filter(|p| !p.is_empty())?;
  let notification = parse_push(payload, defaults);

  if let Err(e) = notifier.show(&notification).await {
    warn!("Failed to show notification '{}': {}", notification.title, e);
  }
  Some(notification)
}

/// React to the user activating a notification: close it, then focus the
/// window already showing its page or open a new one.
pub async fn activate_notification(
  notifier: &dyn Notifier,
  clients: &dyn Clients,
  origin: &Url,
  notification: &Notification,
) -> Result<ClientWindow> {
  if let Err(e) = notifier.close(notification).await {
    warn!("Failed to close notification: {}", e);
  }

  let target = origin
    .join(&notification.url)
    .map(String::from)
    .unwrap_or_else(|_| notification.url.clone());

  let existing = clients
    .windows()
    .await?
    .into_iter()
    .find(|w| w.url == target);

  match existing {
    Some(window) => clients.focus(window.id).await,
    None => {
      info!("No open window for {}, opening one", target);
      clients.open_window(&target).await
    }
  }
}

/// Prints notifications to stdout.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn show<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      info!("Showing notification '{}'", notification.title);
      println!("{}\n{}", notification.title, notification.body);
      if let Some(icon) = &notification.icon {
        println!("  icon:  {}", icon);
      }
      if let Some(badge) = &notification.badge {
        println!("  badge: {}", badge);
      }
      println!("  opens: {}", notification.url);
      Ok(())
    })
  }

  fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      info!("Closing notification '{}'", notification.title);
      Ok(())
    })
  }
}
