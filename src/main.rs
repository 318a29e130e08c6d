mod cache;
mod clients;
mod config;
mod db;
mod http;
mod lifecycle;
mod logging;
mod network;
mod push;
mod queue;
mod router;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cache::{CacheSource, CacheStore, Caches, SqliteCacheStore};
use clients::WindowRegistry;
use config::Config;
use db::Database;
use http::{Method, Request};
use lifecycle::LifecycleManager;
use network::{Fetcher, HttpFetcher};
use push::{ConsoleNotifier, Notification};
use queue::{DurableQueue, SqliteKvStore, PENDING_LIKES};
use router::{Handled, Router};
use sync::{HttpLikeEndpoint, LikeClient, LikeOutcome, SyncCoordinator, SYNC_LIKES_TAG};
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline caching and like sync for the Monster Running game site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also print logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the manifest and activate the current generation
  Install,
  /// Delete every cache generation except the current one
  Activate,
  /// Route a request through the worker and print the response
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    /// Send as an HTML navigation
    #[arg(long)]
    html: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
  },
  /// Like a game, queueing the action if the server is unreachable
  Like {
    game_id: String,
    /// Remove the like instead
    #[arg(long)]
    unlike: bool,
  },
  /// Signal that connectivity is back and deliver queued likes
  Sync {
    #[arg(long, default_value = SYNC_LIKES_TAG)]
    tag: String,
  },
  /// List likes waiting for delivery
  Pending,
  /// List cache generations
  Generations,
  /// Show the notification for a push payload
  Push { payload: Option<String> },
  /// Activate a notification pointing at the given page
  Click {
    #[arg(default_value = "/")]
    url: String,
  },
}

/// Everything the commands need, wired from config.
struct Host {
  config: Config,
  caches: Caches,
  fetcher: Arc<HttpFetcher>,
  worker: Worker,
  likes: LikeClient,
}

impl Host {
  fn new(config: Config, db: Database) -> Result<Self> {
    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(db.clone()));
    let caches = Caches::new(store);
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(config.timeout_secs))?);
    let clients = Arc::new(WindowRegistry::new());
    let queue = DurableQueue::new(Arc::new(SqliteKvStore::new(db, PENDING_LIKES)));
    let endpoint = Arc::new(HttpLikeEndpoint::new(
      fetcher.client().clone(),
      config.sync_endpoint_url()?,
    ));

    let router = Router::from_config(&config, &caches, fetcher.clone())?;
    let lifecycle =
      LifecycleManager::from_config(&config, caches.clone(), fetcher.clone(), clients.clone())?;
    let sync = SyncCoordinator::new(queue.clone(), endpoint.clone());
    let worker = Worker::new(
      router,
      lifecycle,
      sync,
      Arc::new(ConsoleNotifier),
      clients,
      config.origin_url()?,
      config.notifications.clone(),
    );
    let likes = LikeClient::new(queue, endpoint);

    Ok(Self {
      config,
      caches,
      fetcher,
      worker,
      likes,
    })
  }

  async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Install => {
        let report = self.worker.on_install().await;
        println!(
          "Installed {}: {} cached, {} failed",
          self.worker.lifecycle().generation(),
          report.cached.len(),
          report.failed.len()
        );
        for (path, reason) in &report.failed {
          println!("  {} ({})", path, reason);
        }
      }
      Command::Activate => {
        let deleted = self.worker.on_activate().await;
        if deleted.is_empty() {
          println!("No old generations");
        }
        for generation in deleted {
          println!("Deleted {}", generation);
        }
      }
      Command::Fetch { url, html, method } => self.fetch(&url, html, &method).await?,
      Command::Like { game_id, unlike } => match self.likes.toggle(&game_id, !unlike).await? {
        LikeOutcome::Delivered => println!("Delivered"),
        LikeOutcome::Queued(action) => println!(
          "Offline, queued as {} ({} pending)",
          action.id,
          self.worker.sync().queue().len().await?
        ),
      },
      Command::Sync { tag } => match self.worker.on_sync(&tag).await {
        Some(report) if report.skipped => println!("Sync already running"),
        Some(report) => println!(
          "{} attempted, {} delivered, {} still pending",
          report.attempted, report.delivered, report.failed
        ),
        None => println!("Nothing registered for tag {}", tag),
      },
      Command::Pending => {
        for action in self.worker.sync().queue().pending().await? {
          println!(
            "{}  {:<6} {}  {}",
            action.id,
            action.action,
            action.game_id,
            action.created_at.to_rfc3339()
          );
        }
      }
      Command::Generations => {
        let current = self.worker.lifecycle();
        for generation in self.caches.list_generations().await? {
          println!("{}  {:?}", generation, current.generation_state(&generation));
        }
      }
      Command::Push { payload } => {
        let payload = payload.map(String::into_bytes);
        if self.worker.on_push(payload.as_deref()).await.is_none() {
          println!("Empty push, nothing shown");
        }
      }
      Command::Click { url } => {
        let notification = Notification {
          title: self.config.notifications.title.clone(),
          body: String::new(),
          icon: None,
          badge: None,
          url,
        };
        let window = self.worker.on_notification_click(&notification).await?;
        println!("{}", window.url);
      }
    }
    Ok(())
  }

  async fn fetch(&self, url: &str, html: bool, method: &str) -> Result<()> {
    let url = self
      .config
      .origin_url()?
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
    let method: Method = method.parse()?;
    let mut request = if html { Request::navigate(url) } else { Request::get(url) };
    request.method = method;

    let router = self.worker.router();
    let (response, source, cached_at) = match router.route(request.clone()).await {
      Handled::Respond(result) => (result.data, Some(result.source), result.cached_at),
      Handled::Absent => return Err(eyre!("No response: offline and not cached")),
      // Not ours to handle; go straight to the network
      Handled::Bypass => (self.fetcher.fetch(&request).await?, None, None),
    };
    router.flush_writes().await;

    match (source, cached_at) {
      (Some(CacheSource::Network), _) => eprintln!("{} (network)", response.status),
      (Some(source), Some(at)) => {
        eprintln!("{} ({:?}, stored {})", response.status, source, at.to_rfc3339())
      }
      (Some(source), None) => eprintln!("{} ({:?})", response.status, source),
      (None, _) => eprintln!("{} (not intercepted)", response.status),
    }
    println!("{}", response.body_text());
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let db_path = config.database_path()?;

  let log_dir = db_path
    .parent()
    .map(|p| p.join("logs"))
    .unwrap_or_else(|| PathBuf::from("logs"));
  let _log_guard = logging::init(&log_dir, args.verbose)?;

  let db = Database::open(&db_path)?;
  let host = Host::new(config, db)?;
  host.run(args.command).await?;

  Ok(())
}
