use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the game server (e.g. "http://localhost:8000")
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
  /// CSRF token sent as X-CSRF-Token. SKOOL_CSRF_TOKEN overrides it.
  pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Name of the active cache generation
  pub generation: String,
  pub api_prefix: String,
  pub static_prefix: String,
  /// Page served when a navigation fails and nothing is cached for it
  pub offline_page: String,
  /// Paths fetched eagerly at install time
  pub precache: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      generation: "skool-v1".to_string(),
      api_prefix: "/api/".to_string(),
      static_prefix: "/static/".to_string(),
      offline_page: "/offline".to_string(),
      precache: vec![
        "/static/css/common.css".to_string(),
        "/static/manifest.json".to_string(),
        "/static/icons/icon-192.png".to_string(),
        "/static/icons/icon-512.png".to_string(),
        "/offline".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag of the connectivity-restored signal that triggers a drain
  pub tag: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-answers".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file holding the mutation queue and the response cache
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
  /// Per-request timeout. Unset means the request may wait indefinitely.
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is not set
  pub level: String,
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./skool-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/skool-sync/config.yaml
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
        "No configuration file found. Create one at ~/.config/skool-sync/config.yaml\n\
                 with at least an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("skool-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("skool-sync").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Path of the SQLite database, defaulting to the user data directory.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage.path {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("skool.db"))
  }

  pub fn log_directory(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.logging.directory {
      return Ok(dir.clone());
    }
    Ok(data_dir()?.join("logs"))
  }

  /// CSRF token from SKOOL_CSRF_TOKEN, falling back to the config file.
  pub fn csrf_token(&self) -> Option<String> {
    std::env::var("SKOOL_CSRF_TOKEN")
      .ok()
      .or_else(|| self.csrf_token.clone())
  }

  /// Session cookie string from SKOOL_SESSION_COOKIE.
  pub fn session_cookie() -> Option<String> {
    std::env::var("SKOOL_SESSION_COOKIE").ok()
  }
}

fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("skool-sync"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("origin: http://localhost:8000\n").unwrap();

    assert_eq!(config.origin.as_str(), "http://localhost:8000/");
    assert_eq!(config.cache.generation, "skool-v1");
    assert_eq!(config.cache.api_prefix, "/api/");
    assert_eq!(config.cache.static_prefix, "/static/");
    assert_eq!(config.sync.tag, "sync-answers");
    assert!(config.network.timeout_secs.is_none());
  }

  #[test]
  fn test_default_precache_includes_offline_page() {
    let config = Config::from_yaml("origin: http://localhost:8000\n").unwrap();
    assert!(config
      .cache
      .precache
      .contains(&config.cache.offline_page));
  }

  #[test]
  fn test_partial_cache_section_keeps_other_defaults() {
    let yaml = r#"
origin: https://skool.example
cache:
  generation: skool-v2
storage:
  path: /tmp/skool-test.db
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.cache.generation, "skool-v2");
    assert_eq!(config.cache.offline_page, "/offline");
    assert_eq!(
      config.storage_path().unwrap(),
      PathBuf::from("/tmp/skool-test.db")
    );
  }

  #[test]
  fn test_missing_origin_is_an_error() {
    assert!(Config::from_yaml("cache:\n  generation: x\n").is_err());
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/skool.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
