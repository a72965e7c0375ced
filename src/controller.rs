//! Cache controller: install/activate lifecycle and per-request strategies.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, Registration};
use crate::config::{Config, InstallPolicy};
use crate::fetch::Fetcher;
use crate::http::{Destination, Request, Response};
use crate::lifecycle::LifecycleState;
use crate::router::{self, Strategy};

/// Everything a controller version is built from.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
  pub version: String,
  pub static_partition: String,
  pub dynamic_partition: String,
  pub manifest: Vec<Url>,
  pub offline_page: Url,
  pub install_policy: InstallPolicy,
}

impl ControllerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let manifest = config
      .manifest
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      version: config.version.clone(),
      static_partition: config.partitions.static_name.clone(),
      dynamic_partition: config.partitions.dynamic_name.clone(),
      manifest,
      offline_page: config.resolve(&config.offline_page)?,
      install_policy: config.install.policy,
    })
  }

  /// Partitions that survive activation.
  pub fn is_allowed(&self, partition: &str) -> bool {
    partition == self.static_partition || partition == self.dynamic_partition
  }
}

/// Where a handled response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Stored response for the same request
  Cache,
  /// Offline document or a synthesized response
  Fallback,
}

/// Result of intercepting a request.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
  pub response: Response,
  pub strategy: Strategy,
  pub source: ResponseSource,
}

impl FetchOutcome {
  fn new(response: Response, strategy: Strategy, source: ResponseSource) -> Self {
    Self {
      response,
      strategy,
      source,
    }
  }
}

/// An asset that could not be pre-populated.
#[derive(Debug, Clone)]
pub struct AssetFailure {
  pub url: Url,
  pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub cached: Vec<Url>,
  pub failed: Vec<AssetFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  /// Partitions removed because they belong to an older version
  pub deleted: Vec<String>,
  pub already_active: bool,
}

/// Offline cache controller.
///
/// Owns the static and dynamic partitions, runs the install/activate
/// lifecycle and answers intercepted fetches. Cheap to clone; clones share
/// storage, fetcher and lifecycle state.
pub struct CacheController<S: CacheStorage, F: Fetcher> {
  settings: Arc<ControllerSettings>,
  storage: Arc<S>,
  fetcher: Arc<F>,
  state: Arc<Mutex<LifecycleState>>,
}

impl<S: CacheStorage, F: Fetcher> CacheController<S, F> {
  /// Create a controller, picking up the persisted state for its version.
  pub fn new(settings: ControllerSettings, storage: S, fetcher: F) -> Result<Self> {
    let state = storage
      .registration(&settings.version)?
      .map(|registration| registration.state)
      .unwrap_or(LifecycleState::Parsed);
    debug!(version = %settings.version, %state, "Controller loaded");

    Ok(Self {
      settings: Arc::new(settings),
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      state: Arc::new(Mutex::new(state)),
    })
  }

  /// Create the controller that should answer requests right now.
  ///
  /// That is the configured version once it is active. Until then the
  /// previously activated version keeps serving from its own partitions, so
  /// a failed or pending upgrade doesn't take the offline fallbacks away.
  pub fn serving(settings: ControllerSettings, storage: S, fetcher: F) -> Result<Self> {
    let configured = storage
      .registration(&settings.version)?
      .map(|registration| registration.state);
    if configured == Some(LifecycleState::Active) {
      return Self::new(settings, storage, fetcher);
    }

    match storage.active_registration()? {
      Some(active) => {
        info!(
          configured = %settings.version,
          serving = %active.version,
          "Configured version not active, serving previous version"
        );
        let settings = ControllerSettings {
          version: active.version,
          static_partition: active.static_partition,
          dynamic_partition: active.dynamic_partition,
          ..settings
        };
        Self::new(settings, storage, fetcher)
      }
      None => Self::new(settings, storage, fetcher),
    }
  }

  pub fn settings(&self) -> &ControllerSettings {
    &self.settings
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  pub fn state(&self) -> LifecycleState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(LifecycleState::Redundant)
  }

  fn transition(&self, next: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !state.can_transition_to(next) {
      return Err(eyre!(
        "Controller {} cannot go from {} to {}",
        self.settings.version,
        *state,
        next
      ));
    }

    self.save_state(next)?;
    debug!(version = %self.settings.version, from = %*state, to = %next, "Lifecycle transition");
    *state = next;

    Ok(())
  }

  fn save_state(&self, state: LifecycleState) -> Result<()> {
    self.storage.save_registration(&Registration {
      version: self.settings.version.clone(),
      state,
      static_partition: self.settings.static_partition.clone(),
      dynamic_partition: self.settings.dynamic_partition.clone(),
    })
  }

  /// Settle a failed install. A version that was already serving goes back
  /// to `Active` with its partitions as they were; anything else becomes
  /// `Redundant`.
  fn abandon_install(&self, previous: LifecycleState) -> Result<()> {
    if previous != LifecycleState::Active {
      return self.transition(LifecycleState::Redundant);
    }

    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    self.save_state(LifecycleState::Active)?;
    *state = LifecycleState::Active;
    warn!(version = %self.settings.version, "Reinstall failed, still serving previous install");

    Ok(())
  }

  /// Pre-populate the static partition from the asset manifest.
  ///
  /// Assets are fetched concurrently. Under [`InstallPolicy::FailFast`] any
  /// fetch error or non-2xx status fails the install and nothing is written.
  /// Under [`InstallPolicy::BestEffort`] failures are reported and skipped.
  /// A successful install skips waiting and is ready to activate.
  ///
  /// A failed install leaves whatever was serving before in place.
  pub async fn on_install(&self) -> Result<InstallReport> {
    let previous = self.state();
    self.transition(LifecycleState::Installing)?;
    info!(
      version = %self.settings.version,
      assets = self.settings.manifest.len(),
      "Installing controller"
    );

    let requests: Vec<Request> = self
      .settings
      .manifest
      .iter()
      .map(|url| Request::get(url.clone(), Destination::Other))
      .collect();
    let results = join_all(requests.iter().map(|request| self.fetcher.fetch(request))).await;

    let mut fetched = Vec::new();
    let mut failed = Vec::new();
    for (request, result) in requests.into_iter().zip(results) {
      match result {
        Ok(response) if response.ok() => fetched.push((request, response)),
        Ok(response) => failed.push(AssetFailure {
          url: request.url,
          reason: format!("HTTP {}", response.status),
        }),
        Err(e) => failed.push(AssetFailure {
          url: request.url,
          reason: e.to_string(),
        }),
      }
    }

    for failure in &failed {
      warn!(url = %failure.url, "Asset not cached: {}", failure.reason);
    }

    if let Some(first) = failed.first() {
      if self.settings.install_policy == InstallPolicy::FailFast {
        self.abandon_install(previous)?;
        return Err(eyre!(
          "Install failed: {} of {} assets could not be cached (first: {}: {})",
          failed.len(),
          self.settings.manifest.len(),
          first.url,
          first.reason
        ));
      }
    }

    let partition = &self.settings.static_partition;
    let stored = self
      .storage
      .open_partition(partition)
      .and_then(|_| self.storage.put_all(partition, &fetched));
    if let Err(e) = stored {
      self.abandon_install(previous)?;
      return Err(eyre!("Install failed: {}", e));
    }

    self.transition(LifecycleState::Installed)?;
    info!(
      cached = fetched.len(),
      failed = failed.len(),
      "Controller installed"
    );

    Ok(InstallReport {
      cached: fetched.into_iter().map(|(request, _)| request.url).collect(),
      failed,
    })
  }

  /// Delete every partition outside the allow-list and take control.
  pub fn on_activate(&self) -> Result<ActivateReport> {
    if self.state() == LifecycleState::Active {
      return Ok(ActivateReport {
        deleted: Vec::new(),
        already_active: true,
      });
    }

    self.transition(LifecycleState::Activating)?;
    info!(version = %self.settings.version, "Activating controller");

    let deleted = match self.prune_partitions() {
      Ok(deleted) => deleted,
      Err(e) => {
        self.transition(LifecycleState::Redundant)?;
        return Err(e);
      }
    };

    self.transition(LifecycleState::Active)?;
    info!(deleted = deleted.len(), "Controller active");

    Ok(ActivateReport {
      deleted,
      already_active: false,
    })
  }

  fn prune_partitions(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.partition_names()? {
      if self.settings.is_allowed(&name) {
        continue;
      }
      self.storage.delete_partition(&name)?;
      info!(partition = %name, "Deleted stale partition");
      deleted.push(name);
    }
    Ok(deleted)
  }

  /// Answer an intercepted request.
  ///
  /// Returns `None` when the request should go to the network untouched:
  /// non-GET requests, and anything seen before the controller is active.
  /// Otherwise always produces a response; network and cache errors degrade
  /// to a fallback instead of surfacing.
  pub async fn handle_fetch(&self, request: &Request) -> Option<FetchOutcome> {
    if self.state() != LifecycleState::Active {
      debug!(url = %request.url, "Controller not active, passing through");
      return None;
    }

    let strategy = router::route(request)?;
    debug!(url = %request.url, %strategy, "Handling fetch");

    let outcome = match strategy {
      Strategy::Image => {
        self
          .cache_first(request, strategy, &self.settings.dynamic_partition)
          .await
      }
      Strategy::Static => {
        self
          .cache_first(request, strategy, &self.settings.static_partition)
          .await
      }
      Strategy::Api | Strategy::Page => self.network_first(request, strategy).await,
    };

    Some(outcome)
  }

  async fn cache_first(
    &self,
    request: &Request,
    strategy: Strategy,
    partition: &str,
  ) -> FetchOutcome {
    if let Some(cached) = self.lookup(request, partition) {
      return FetchOutcome::new(cached, strategy, ResponseSource::Cache);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(partition, request, &response);
        }
        FetchOutcome::new(response, strategy, ResponseSource::Network)
      }
      Err(e) => {
        error!(url = %request.url, %strategy, "Fetch failed: {}", e);
        FetchOutcome::new(Response::not_found(), strategy, ResponseSource::Fallback)
      }
    }
  }

  async fn network_first(&self, request: &Request, strategy: Strategy) -> FetchOutcome {
    let partition = &self.settings.dynamic_partition;

    let error = match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(partition, request, &response);
        }
        return FetchOutcome::new(response, strategy, ResponseSource::Network);
      }
      Err(e) => e,
    };
    error!(url = %request.url, %strategy, "Fetch failed: {}", error);

    if let Some(cached) = self.lookup(request, partition) {
      return FetchOutcome::new(cached, strategy, ResponseSource::Cache);
    }

    let fallback = match strategy {
      Strategy::Api => Response::network_unavailable(),
      Strategy::Page => {
        let offline = Request::get(self.settings.offline_page.clone(), Destination::Document);
        self
          .lookup(&offline, &self.settings.static_partition)
          .unwrap_or_else(Response::offline)
      }
      Strategy::Image | Strategy::Static => Response::not_found(),
    };
    FetchOutcome::new(fallback, strategy, ResponseSource::Fallback)
  }

  /// Find a stored response, trying `preferred` first and then the other
  /// partition. Read errors count as a miss.
  fn lookup(&self, request: &Request, preferred: &str) -> Option<Response> {
    let other = if preferred == self.settings.static_partition {
      &self.settings.dynamic_partition
    } else {
      &self.settings.static_partition
    };

    for partition in [preferred, other.as_str()] {
      match self.storage.get(partition, request) {
        Ok(Some(cached)) => {
          debug!(url = %request.url, partition, cached_at = %cached.cached_at, "Cache hit");
          return Some(cached.response);
        }
        Ok(None) => {}
        Err(e) => warn!(url = %request.url, partition, "Cache read failed: {}", e),
      }
    }

    None
  }

  /// Write-through that never fails the request.
  fn store(&self, partition: &str, request: &Request, response: &Response) {
    if let Err(e) = self.storage.put(partition, request, response) {
      warn!(url = %request.url, partition, "Cache write failed, serving uncached: {}", e);
    }
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for CacheController<S, F> {
  fn clone(&self) -> Self {
    Self {
      settings: Arc::clone(&self.settings),
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      state: Arc::clone(&self.state),
    }
  }
}
