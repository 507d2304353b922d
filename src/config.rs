use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the deployed site. Shell entries resolve against it.
  #[serde(deserialize_with = "deserialize_origin")]
  pub origin: Url,
  #[serde(default = "default_app_name")]
  pub app_name: String,
  /// Generation tag. Bump it to throw away everything cached by earlier deployments.
  #[serde(default = "default_version")]
  pub version: String,
  /// Resources fetched into the store at install time
  #[serde(default = "default_shell")]
  pub shell: Vec<String>,
  /// Document served to navigations while offline
  #[serde(default = "default_document_root")]
  pub document_root: String,
  /// Path suffixes routed through the media strategy
  #[serde(default = "default_media_suffixes")]
  pub media_suffixes: Vec<String>,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database file (default: $XDG_DATA_HOME/swcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// tracing filter directive, used when RUST_LOG is unset
  pub filter: Option<String>,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

fn default_app_name() -> String {
  "meditate".to_string()
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_shell() -> Vec<String> {
  vec![
    "/".to_string(),
    "index.html".to_string(),
    "playlist.json".to_string(),
  ]
}

fn default_document_root() -> String {
  "index.html".to_string()
}

fn default_media_suffixes() -> Vec<String> {
  vec![".mp3".to_string()]
}

/// Relative entries resolve against the origin, so a trailing slash is required for
/// them to land inside its directory.
fn deserialize_origin<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  let raw = if raw.ends_with('/') {
    raw
  } else {
    format!("{}/", raw)
  };
  Url::parse(&raw).map_err(serde::de::Error::custom)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/swcache/config.yaml\n\
                 with at least an `origin:` entry."
      )),
    }
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
    let config: Config = serde_yaml::from_str(contents)?;
    if config.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    Ok(config)
  }

  /// Name of the store for the current generation, e.g. `meditate-v1`.
  pub fn cache_name(&self) -> String {
    format!("{}-{}", self.app_name, self.version)
  }

  /// Resolve a site-relative entry against the origin.
  pub fn resolve(&self, entry: &str) -> Result<Url> {
    self
      .origin
      .join(entry)
      .map_err(|e| eyre!("Invalid URL '{}' relative to {}: {}", entry, self.origin, e))
  }

  pub fn shell_urls(&self) -> Result<Vec<Url>> {
    self.shell.iter().map(|entry| self.resolve(entry)).collect()
  }

  pub fn document_root_url(&self) -> Result<Url> {
    self.resolve(&self.document_root)
  }
}
