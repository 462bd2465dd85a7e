use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ClientOptions;
use crate::error::{Error, Result};
use crate::store::SqliteStore;

/// Overrides the API base URL from the config file.
pub const API_URL_ENV: &str = "LEADSYNC_API_URL";
/// Bearer token used when none has been stored by `login`.
pub const TOKEN_ENV: &str = "LEADSYNC_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub storage: StorageConfig,
  pub sync: SyncConfig,
  /// Token from the environment, never read from the file
  #[serde(skip)]
  pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_ms: u64,
  pub max_attempts: u32,
  pub backoff_base_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:5000/api".to_string(),
      timeout_ms: 10_000,
      max_attempts: 3,
      backoff_base_ms: 1_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Age up to which a cached response is served without a network call
  pub max_age_ms: u64,
  /// Age after which a cached response is deleted
  pub ttl_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age_ms: 5 * 60 * 1000,
      ttl_ms: 24 * 60 * 60 * 1000,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file; defaults to the platform data directory
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Drop a queued write after this many failed sync passes; unset keeps it forever
  pub max_item_attempts: Option<u32>,
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./leadsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/leadsync/config.yaml
  ///
  /// Without a file every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => Some(p.to_path_buf()),
      Some(p) => {
        return Err(Error::Config(format!(
          "config file not found: {}",
          p.display()
        )))
      }
      None => Self::find_config_file(),
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("leadsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("leadsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!(
        "failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::parse(&contents)
      .map_err(|e| Error::Config(format!("failed to parse config file {}: {}", path.display(), e)))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }

  fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
      self.api.base_url = url;
    }
    self.token = var(TOKEN_ENV).filter(|v| !v.trim().is_empty());
  }

  /// Database location, falling back to `<data_dir>/leadsync/store.db`.
  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path(),
    }
  }

  pub fn client_options(&self) -> ClientOptions {
    ClientOptions {
      timeout: Duration::from_millis(self.api.timeout_ms),
      max_attempts: self.api.max_attempts.max(1),
      backoff_base: Duration::from_millis(self.api.backoff_base_ms),
      cache_max_age: Duration::from_millis(self.cache.max_age_ms),
      cache_ttl: Duration::from_millis(self.cache.ttl_ms),
      max_item_attempts: self.sync.max_item_attempts,
      token: self.token.clone(),
    }
  }
}
