use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::roles::Role;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  pub operator: OperatorConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
  /// Overrides the directory holding the database and log files
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  pub url: String,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false, reads are never cached
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_max_age_hours")]
  pub max_age_hours: u64,
  /// Bound on the live fetch of network-first routes
  #[serde(default = "default_network_timeout_secs")]
  pub network_timeout_secs: u64,
  /// Cache namespace; entries of other versions are purged on activation
  #[serde(default = "default_cache_version")]
  pub version: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_age_hours: default_max_age_hours(),
      network_timeout_secs: default_network_timeout_secs(),
      version: default_cache_version(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Exact paths served cache-first
  #[serde(default = "default_static_assets")]
  pub static_assets: Vec<String>,
  /// Path segments (substring match) served network-first
  #[serde(default = "default_api_segments")]
  pub api_segments: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      static_assets: default_static_assets(),
      api_segments: default_api_segments(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Give up on a submission after this many failed attempts (unbounded if unset)
  pub max_attempts: Option<u32>,
  /// Base delay between retries of a failed submission, 0 disables backoff
  #[serde(default)]
  pub backoff_base_secs: u64,
  #[serde(default = "default_backoff_max_secs")]
  pub backoff_max_secs: u64,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
  #[serde(default = "default_submissions_table")]
  pub submissions_table: String,
  #[serde(default = "default_photos_bucket")]
  pub photos_bucket: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: None,
      backoff_base_secs: 0,
      backoff_max_secs: default_backoff_max_secs(),
      probe_interval_secs: default_probe_interval_secs(),
      submissions_table: default_submissions_table(),
      photos_bucket: default_photos_bucket(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
  pub id: String,
  #[serde(default)]
  pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Also write logs to a daily-rotated file in the data directory
  #[serde(default)]
  pub file: bool,
}

fn default_true() -> bool {
  true
}

fn default_request_timeout_secs() -> u64 {
  30
}

fn default_max_age_hours() -> u64 {
  24
}

fn default_network_timeout_secs() -> u64 {
  5
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_static_assets() -> Vec<String> {
  vec![
    "/".to_string(),
    "/index.html".to_string(),
    "/manifest.json".to_string(),
  ]
}

fn default_api_segments() -> Vec<String> {
  vec!["/rest/v1/".to_string(), "/storage/v1/".to_string()]
}

fn default_backoff_max_secs() -> u64 {
  3600
}

fn default_probe_interval_secs() -> u64 {
  30
}

fn default_submissions_table() -> String {
  "checklist_submissions".to_string()
}

fn default_photos_bucket() -> String {
  "checklist-photos".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stationsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stationsync/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/stationsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("stationsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stationsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    url::Url::parse(&config.backend.url)
      .map_err(|e| eyre!("Invalid backend url '{}': {}", config.backend.url, e))?;
    Ok(config)
  }

  /// Directory holding the database and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("stationsync"))
  }

  pub fn cache_max_age(&self) -> chrono::Duration {
    chrono::Duration::hours(self.cache.max_age_hours as i64)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.cache.network_timeout_secs)
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks STATIONSYNC_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("STATIONSYNC_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set STATIONSYNC_API_KEY or SUPABASE_ANON_KEY.")
      })
  }

  /// Session token of the signed-in operator, if any.
  pub fn get_access_token() -> Option<String> {
    std::env::var("STATIONSYNC_ACCESS_TOKEN").ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
backend:
  url: https://station.example.supabase.co
operator:
  id: op-17
"#;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse(MINIMAL).unwrap();
    assert_eq!(config.backend.request_timeout_secs, 30);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.max_age_hours, 24);
    assert_eq!(config.network_timeout(), Duration::from_secs(5));
    assert_eq!(config.routes.api_segments, vec!["/rest/v1/", "/storage/v1/"]);
    assert_eq!(config.sync.max_attempts, None);
    assert_eq!(config.operator.role, Role::Member);
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
backend:
  url: https://station.example.supabase.co
cache:
  enabled: false
  max_age_hours: 2
  version: v7
routes:
  static_assets: ["/app.js"]
  api_segments: ["/api/"]
sync:
  max_attempts: 4
  backoff_base_secs: 10
operator:
  id: op-1
  role: chief
data_dir: /tmp/stationsync-test
"#;
    let config = Config::parse(yaml).unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.cache_max_age(), chrono::Duration::hours(2));
    assert_eq!(config.cache.version, "v7");
    assert_eq!(config.routes.static_assets, vec!["/app.js"]);
    assert_eq!(config.sync.max_attempts, Some(4));
    assert_eq!(config.sync.backoff_max_secs, 3600);
    assert_eq!(config.operator.role, Role::Chief);
    assert_eq!(
      config.data_dir().unwrap(),
      PathBuf::from("/tmp/stationsync-test")
    );
  }

  #[test]
  fn test_invalid_backend_url_rejected() {
    let yaml = "backend:\n  url: not a url\noperator:\n  id: x\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/stationsync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
