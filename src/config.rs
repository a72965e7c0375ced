use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::db::Database;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Site origin that root-relative URLs resolve against
  pub origin: String,
  /// Controller version; bumping it re-runs install/activate
  pub version: String,
  /// SQLite file (defaults to $XDG_DATA_HOME/swcache/cache.db)
  pub database: Option<PathBuf>,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
  pub partitions: PartitionsConfig,
  /// Assets pre-populated into the static partition at install
  pub manifest: Vec<String>,
  /// Document served to navigations when offline and uncached
  pub offline_page: String,
  pub install: InstallConfig,
  pub fetch: FetchConfig,
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartitionsConfig {
  pub static_name: String,
  pub dynamic_name: String,
}

impl Default for PartitionsConfig {
  fn default() -> Self {
    Self {
      static_name: "static".to_string(),
      dynamic_name: "dynamic".to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstallPolicy {
  /// Any asset failure aborts the install and nothing is written
  #[default]
  FailFast,
  /// Cache whatever succeeded, log the rest
  BestEffort,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
  pub policy: InstallPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  /// Per-request network timeout. Unset means wait indefinitely.
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Sync tag that triggers a replay
  pub tag: String,
  /// Endpoint queued submissions are POSTed to
  pub endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "contact-form".to_string(),
      endpoint: "/api/contact".to_string(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      version: "v1".to_string(),
      database: None,
      log_file: None,
      partitions: PartitionsConfig::default(),
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      offline_page: "/offline.html".to_string(),
      install: InstallConfig::default(),
      fetch: FetchConfig::default(),
      sync: SyncConfig::default(),
    }
  }
}

/// Navigation shell, fonts and key images.
const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/about",
  "/services",
  "/projects",
  "/team",
  "/blog",
  "/contact",
  "/fonts/Stinger-Regular.ttf",
  "/fonts/Stinger-Bold.ttf",
  "/company.jpg",
  "/next.svg",
  "/vercel.svg",
];

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Falls back to defaults when no file is found. `SWCACHE_ORIGIN`
  /// overrides the configured origin.
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
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("SWCACHE_ORIGIN") {
      config.origin = origin;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Check everything that would otherwise fail halfway through an install.
  pub fn validate(&self) -> Result<()> {
    let origin = self.origin_url()?;
    if origin.cannot_be_a_base() {
      return Err(eyre!("Origin '{}' cannot be used as a base URL", self.origin));
    }

    let PartitionsConfig {
      static_name,
      dynamic_name,
    } = &self.partitions;
    if static_name.is_empty() || dynamic_name.is_empty() {
      return Err(eyre!("Partition names must not be empty"));
    }
    if static_name == dynamic_name {
      return Err(eyre!(
        "Static and dynamic partitions must have different names (both '{}')",
        static_name
      ));
    }

    for path in self.manifest.iter().chain([&self.offline_page, &self.sync.endpoint]) {
      self.resolve(path)?;
    }

    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a root-relative (or absolute) URL against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  /// Controllers are not registered for local development origins.
  pub fn is_local_origin(&self) -> bool {
    self
      .origin_url()
      .ok()
      .and_then(|url| url.host_str().map(|h| h == "localhost" || h == "127.0.0.1"))
      .unwrap_or(false)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Database::default_path(),
    }
  }

  pub fn fetch_timeout(&self) -> Option<Duration> {
    self.fetch.timeout_secs.map(Duration::from_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.version, "v1");
    assert_eq!(config.partitions.static_name, "static");
    assert_eq!(config.partitions.dynamic_name, "dynamic");
    assert_eq!(config.manifest.len(), 12);
    assert_eq!(config.offline_page, "/offline.html");
    assert_eq!(config.install.policy, InstallPolicy::FailFast);
    assert_eq!(config.sync.tag, "contact-form");
    assert_eq!(config.sync.endpoint, "/api/contact");
    assert_eq!(config.fetch_timeout(), None);
    config.validate().unwrap();
  }

  #[test]
  fn test_parse_full_config() {
    let yaml = r#"
origin: https://thedoable.com
version: v2
partitions:
  static_name: static-v2
  dynamic_name: dynamic-v2
manifest:
  - /
  - /offline.html
install:
  policy: best-effort
fetch:
  timeout_secs: 10
sync:
  tag: newsletter
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.version, "v2");
    assert_eq!(config.partitions.static_name, "static-v2");
    assert_eq!(config.manifest, vec!["/", "/offline.html"]);
    assert_eq!(config.install.policy, InstallPolicy::BestEffort);
    assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(10)));
    assert_eq!(config.sync.tag, "newsletter");
    // Unset fields in a section keep their defaults
    assert_eq!(config.sync.endpoint, "/api/contact");
    assert!(!config.is_local_origin());
  }

  #[test]
  fn test_example_config_parses() {
    let config = Config::from_yaml(include_str!("../config.example.yaml")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.manifest, Config::default().manifest);
    assert!(!config.is_local_origin());
  }

  #[test]
  fn test_resolve_against_origin() {
    let config = Config {
      origin: "https://thedoable.com".to_string(),
      ..Config::default()
    };
    assert_eq!(
      config.resolve("/fonts/Stinger-Bold.ttf").unwrap().as_str(),
      "https://thedoable.com/fonts/Stinger-Bold.ttf"
    );
    assert_eq!(
      config.resolve("https://cdn.example.com/a.png").unwrap().as_str(),
      "https://cdn.example.com/a.png"
    );
  }

  #[test]
  fn test_local_origins() {
    let mut config = Config::default();
    assert!(config.is_local_origin());

    config.origin = "http://127.0.0.1:8080".to_string();
    assert!(config.is_local_origin());

    config.origin = "https://thedoable.com".to_string();
    assert!(!config.is_local_origin());
  }

  #[test]
  fn test_rejects_same_partition_names() {
    let mut config = Config::default();
    config.partitions.dynamic_name = "static".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_rejects_bad_origin() {
    let config = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_unknown_policy_is_an_error() {
    assert!(Config::from_yaml("install:\n  policy: sometimes\n").is_err());
  }

  #[test]
  fn test_load_explicit_missing_file() {
    let err = Config::load(Some(Path::new("/nonexistent/swcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
