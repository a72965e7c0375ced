mod cache;
mod commands;
mod config;
mod controller;
mod db;
mod fetch;
mod http;
mod lifecycle;
mod router;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cache::SqliteStorage;
use commands::Controller;
use controller::{CacheController, ControllerSettings};
use db::Database;
use fetch::HttpFetcher;
use http::Destination;
use sync::{BackgroundSync, ContactSubmission, SqliteQueue};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline asset cache controller with cache-first and network-first strategies")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// More logging (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset manifest, then activate
  Install {
    /// Install even for localhost origins
    #[arg(long)]
    force: bool,
  },
  /// Activate an installed controller and prune stale partitions
  Activate,
  /// Fetch a URL through the controller
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short, long, value_enum, default_value_t = Destination::Other)]
    destination: Destination,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Print response headers before the body
    #[arg(short, long)]
    include: bool,
  },
  /// Queue a contact form submission for background sync
  Enqueue {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, default_value = "")]
    subject: String,
    #[arg(long)]
    message: String,
  },
  /// List queued submissions
  Pending,
  /// Fire a background sync event
  Sync {
    /// Sync tag (defaults to the configured one)
    #[arg(long)]
    tag: Option<String>,
  },
  /// List cache partitions and their entries
  Partitions,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _guard = init_logging(&config, args.verbose)?;

  let db = Arc::new(Database::open(&config.database_path()?)?);
  let settings = ControllerSettings::from_config(&config)?;
  let storage = SqliteStorage::new(Arc::clone(&db));
  let fetcher = HttpFetcher::new(config.fetch_timeout())?;
  let background_sync = BackgroundSync::from_config(SqliteQueue::new(db), &config)?;

  match args.command {
    Command::Install { force } => {
      let controller: Controller = CacheController::new(settings, storage, fetcher)?;
      commands::install(&controller, &config, force).await
    }
    Command::Activate => {
      let controller: Controller = CacheController::new(settings, storage, fetcher)?;
      commands::activate(&controller)
    }
    Command::Fetch {
      url,
      destination,
      method,
      include,
    } => {
      let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let mut request = http::Request::get(config.resolve(&url)?, destination);
      request.method = method;
      let controller: Controller = CacheController::serving(settings, storage, fetcher)?;
      commands::fetch(&controller, &request, include).await
    }
    Command::Enqueue {
      name,
      email,
      subject,
      message,
    } => commands::enqueue(
      &background_sync,
      &ContactSubmission {
        name,
        email,
        subject,
        message,
      },
    ),
    Command::Pending => commands::pending(&background_sync),
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| background_sync.tag().to_string());
      commands::sync(&background_sync, &fetcher, &tag).await
    }
    Command::Partitions => {
      let controller: Controller = CacheController::serving(settings, storage, fetcher)?;
      commands::partitions(&controller)
    }
  }
}

/// Log to stderr, or to `log_file` when configured. `RUST_LOG` wins over `-v`.
fn init_logging(config: &config::Config, verbose: u8) -> Result<Option<WorkerGuard>> {
  let default = match verbose {
    0 => "swcache=info",
    1 => "swcache=debug",
    _ => "swcache=trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  match &config.log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
      Ok(None)
    }
  }
}
