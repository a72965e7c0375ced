//! CLI subcommand handlers.

use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use tracing::info;

use crate::cache::{CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::controller::CacheController;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::http::Request;
use crate::sync::{BackgroundSync, ContactSubmission, SqliteQueue, SubmissionQueue};

pub type Controller = CacheController<SqliteStorage, HttpFetcher>;

pub async fn install<S: CacheStorage, F: Fetcher>(
  controller: &CacheController<S, F>,
  config: &Config,
  force: bool,
) -> Result<()> {
  if config.is_local_origin() && !force {
    info!(origin = %config.origin, "Local origin, not installing");
    println!(
      "Not installing for local origin {} (use --force to override)",
      config.origin
    );
    return Ok(());
  }

  let report = controller.on_install().await?;
  println!(
    "Cached {} assets into '{}'",
    report.cached.len(),
    controller.settings().static_partition
  );
  for failure in &report.failed {
    println!("  skipped {} ({})", failure.url, failure.reason);
  }

  activate(controller)
}

pub fn activate<S: CacheStorage, F: Fetcher>(controller: &CacheController<S, F>) -> Result<()> {
  let report = controller.on_activate()?;
  if report.already_active {
    println!("Controller {} already active", controller.settings().version);
    return Ok(());
  }

  for name in &report.deleted {
    println!("Deleted stale partition '{}'", name);
  }
  println!("Controller {} active", controller.settings().version);
  Ok(())
}

/// Run a request through the controller, or straight to the network when the
/// controller passes it through. Status goes to stderr so the body can be piped.
pub async fn fetch(
  controller: &Controller,
  request: &Request,
  include_headers: bool,
) -> Result<()> {
  let (response, how) = match controller.handle_fetch(request).await {
    Some(outcome) => {
      let kind = if outcome.strategy.is_cache_first() {
        "cache-first"
      } else {
        "network-first"
      };
      let how = format!("{} {}, from {:?}", outcome.strategy, kind, outcome.source);
      (outcome.response, how)
    }
    None => {
      let response = controller.fetcher().fetch(request).await?;
      (response, "passthrough".to_string())
    }
  };

  eprintln!("{} {} {} ({})", response.status, request.method, request.url, how);

  let mut out = std::io::stdout().lock();
  if include_headers {
    for (name, value) in &response.headers {
      writeln!(out, "{}: {}", name, value)?;
    }
    writeln!(out)?;
  }
  out
    .write_all(&response.body)
    .map_err(|e| eyre!("Failed to write response body: {}", e))?;
  out.flush()?;

  Ok(())
}

pub fn enqueue(sync: &BackgroundSync<SqliteQueue>, submission: &ContactSubmission) -> Result<()> {
  let id = sync.enqueue(submission)?;
  println!("Queued submission #{} for '{}'", id, sync.tag());
  Ok(())
}

pub fn pending(sync: &BackgroundSync<SqliteQueue>) -> Result<()> {
  let pending = sync.queue().list_pending()?;
  if pending.is_empty() {
    println!("No pending submissions");
    return Ok(());
  }

  for submission in pending {
    print!(
      "#{} queued {} attempts {}",
      submission.id,
      submission.created_at.format("%Y-%m-%d %H:%M:%S"),
      submission.attempts
    );
    if let Some(error) = &submission.last_error {
      print!(" last error: {}", error);
    }
    println!();
    println!("  {}", submission.payload);
  }
  Ok(())
}

pub async fn sync<F: Fetcher>(
  sync: &BackgroundSync<SqliteQueue>,
  fetcher: &F,
  tag: &str,
) -> Result<()> {
  match sync.on_sync(tag, fetcher).await? {
    Some(report) => println!(
      "Synced '{}': {} attempted, {} delivered, {} still queued",
      tag, report.attempted, report.delivered, report.failed
    ),
    None => println!("No queue registered for sync tag '{}'", tag),
  }
  Ok(())
}

pub fn partitions(controller: &Controller) -> Result<()> {
  let storage = controller.storage();
  let names = storage.partition_names()?;
  if names.is_empty() {
    println!("No cache partitions");
    return Ok(());
  }

  let settings = controller.settings();
  for name in names {
    let entries = storage.entries(&name)?;
    let stale = if settings.is_allowed(&name) { "" } else { " (stale)" };
    println!("{}{}: {} entries", name, stale, entries.len());
    for entry in entries {
      println!(
        "  {} {} {} {}B cached {}",
        entry.status,
        entry.method,
        entry.url,
        entry.size,
        entry.cached_at.format("%Y-%m-%d %H:%M:%S")
      );
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::controller::ControllerSettings;
  use crate::db::Database;
  use crate::fetch::testing::FakeFetcher;
  use crate::http::Response;
  use crate::lifecycle::LifecycleState;
  use std::sync::Arc;

  fn controller(config: &Config) -> CacheController<SqliteStorage, FakeFetcher> {
    let fetcher = FakeFetcher::new();
    for path in &config.manifest {
      fetcher.respond(path, Response::new(200).with_body(path.as_str()));
    }
    CacheController::new(
      ControllerSettings::from_config(config).unwrap(),
      SqliteStorage::new(Arc::new(Database::open_in_memory().unwrap())),
      fetcher,
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_install_skips_local_origin() {
    let config = Config::default();
    assert!(config.is_local_origin());
    let controller = controller(&config);

    install(&controller, &config, false).await.unwrap();

    assert!(controller.fetcher().seen().is_empty());
    assert_eq!(controller.state(), LifecycleState::Parsed);
    assert!(controller.storage().partition_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_local_origin_with_force() {
    let config = Config::default();
    let controller = controller(&config);

    install(&controller, &config, true).await.unwrap();

    assert_eq!(controller.state(), LifecycleState::Active);
    assert_eq!(
      controller.storage().entries("static").unwrap().len(),
      config.manifest.len()
    );
  }

  #[tokio::test]
  async fn test_install_activates_remote_origin() {
    let config = Config {
      origin: "https://thedoable.com".to_string(),
      manifest: vec!["/".to_string(), "/about".to_string()],
      ..Config::default()
    };
    let controller = controller(&config);

    install(&controller, &config, false).await.unwrap();

    assert_eq!(controller.state(), LifecycleState::Active);
    assert_eq!(controller.fetcher().seen().len(), 2);
  }
}
