use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::intercept::AssetSettings;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub realtime: RealtimeConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Root of the versioned API, e.g. http://localhost:8081/api/v1
  #[serde(default = "default_api_url")]
  pub api_url: String,
  /// Origin the static assets are served from (defaults to the API origin)
  pub origin: Option<String>,
  #[serde(default = "default_ws_url")]
  pub ws_url: String,
  /// Path prefix that marks a request as an API call
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_cache_prefix")]
  pub prefix: String,
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Assets fetched at install time
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Name of the server-assigned id field in entity payloads
  #[serde(default = "default_identifier_field")]
  pub identifier_field: String,
  #[serde(default = "default_health_interval_secs")]
  pub health_interval_secs: u64,
  #[serde(default = "default_backoff_initial_ms")]
  pub backoff_initial_ms: u64,
  #[serde(default = "default_backoff_max_secs")]
  pub backoff_max_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Organization whose requisition topics to follow
  pub organization_id: Option<String>,
  #[serde(default = "default_reconnect_delay_secs")]
  pub reconnect_delay_secs: u64,
  #[serde(default = "default_heartbeat_secs")]
  pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// SQLite file (default: $XDG_DATA_HOME/reqsync/store.db)
  pub path: Option<PathBuf>,
}

fn default_api_url() -> String {
  "http://localhost:8081/api/v1".to_string()
}

fn default_ws_url() -> String {
  "ws://localhost:8081/ws".to_string()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_cache_prefix() -> String {
  "requisition-app".to_string()
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_manifest() -> Vec<String> {
  vec![
    "/".to_string(),
    "/index.html".to_string(),
    "/manifest.json".to_string(),
  ]
}

fn default_identifier_field() -> String {
  "id".to_string()
}

fn default_health_interval_secs() -> u64 {
  15
}

fn default_backoff_initial_ms() -> u64 {
  1000
}

fn default_backoff_max_secs() -> u64 {
  60
}

fn default_true() -> bool {
  true
}

fn default_reconnect_delay_secs() -> u64 {
  5
}

fn default_heartbeat_secs() -> u64 {
  4
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
      origin: None,
      ws_url: default_ws_url(),
      api_prefix: default_api_prefix(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_cache_prefix(),
      version: default_cache_version(),
      manifest: default_manifest(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      identifier_field: default_identifier_field(),
      health_interval_secs: default_health_interval_secs(),
      backoff_initial_ms: default_backoff_initial_ms(),
      backoff_max_secs: default_backoff_max_secs(),
    }
  }
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      organization_id: None,
      reconnect_delay_secs: default_reconnect_delay_secs(),
      heartbeat_secs: default_heartbeat_secs(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./reqsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/reqsync/config.yaml
  ///
  /// With no file anywhere the built-in defaults (a local development server) apply.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("reqsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("reqsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.api_url()?;
    self.origin()?;
    self.ws_url()?;
    if self.sync.identifier_field.is_empty() {
      return Err(eyre!("sync.identifier_field must not be empty"));
    }
    if self.server.timeout_secs == 0 {
      return Err(eyre!("server.timeout_secs must be at least 1"));
    }
    if self.sync.backoff_initial_ms == 0 {
      return Err(eyre!("sync.backoff_initial_ms must be at least 1"));
    }
    if self.sync.backoff_max_secs == 0 {
      return Err(eyre!("sync.backoff_max_secs must be at least 1"));
    }
    Ok(())
  }

  pub fn api_url(&self) -> Result<Url> {
    Url::parse(&self.server.api_url)
      .map_err(|e| eyre!("Invalid server.api_url {:?}: {}", self.server.api_url, e))
  }

  /// Asset origin; falls back to the scheme, host and port of the API url.
  pub fn origin(&self) -> Result<Url> {
    match &self.server.origin {
      Some(origin) => {
        Url::parse(origin).map_err(|e| eyre!("Invalid server.origin {:?}: {}", origin, e))
      }
      None => {
        let api = self.api_url()?;
        api
          .join("/")
          .map_err(|e| eyre!("Cannot derive origin from {}: {}", api, e))
      }
    }
  }

  pub fn ws_url(&self) -> Result<Url> {
    Url::parse(&self.server.ws_url)
      .map_err(|e| eyre!("Invalid server.ws_url {:?}: {}", self.server.ws_url, e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.server.timeout_secs)
  }

  pub fn asset_settings(&self) -> AssetSettings {
    AssetSettings {
      prefix: self.cache.prefix.clone(),
      version: self.cache.version.clone(),
      manifest: self.cache.manifest.clone(),
    }
  }

  pub fn health_interval(&self) -> Duration {
    Duration::from_secs(self.sync.health_interval_secs.max(1))
  }

  pub fn backoff(&self) -> (Duration, Duration) {
    (
      Duration::from_millis(self.sync.backoff_initial_ms),
      Duration::from_secs(self.sync.backoff_max_secs),
    )
  }

  /// Get the API bearer token from the environment, if any.
  ///
  /// Checks REQSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("REQSYNC_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}
