use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::StoreConfig;
use crate::push::{PushConfig, Topic};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Server push; disabled when absent
  pub push: Option<PushSection>,
  #[serde(default)]
  pub cache: CacheSection,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: Url,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushSection {
  /// WebSocket endpoint of the STOMP broker, e.g. `ws://localhost:8080/ws`
  pub url: Url,
  #[serde(default = "default_reconnect_delay")]
  pub reconnect_delay_secs: u64,
  /// Topics to subscribe to (defaults to all of them)
  #[serde(default = "all_topics")]
  pub topics: Vec<Topic>,
}

fn default_reconnect_delay() -> u64 {
  5
}

fn all_topics() -> Vec<Topic> {
  Topic::ALL.to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
  /// Data older than this refetches on the next subscription
  pub stale_time_secs: Option<u64>,
  /// Grace period before an unused entry is dropped
  #[serde(default = "default_keep_unused_for")]
  pub keep_unused_for_secs: u64,
}

fn default_keep_unused_for() -> u64 {
  60
}

impl Default for CacheSection {
  fn default() -> Self {
    Self {
      stale_time_secs: None,
      keep_unused_for_secs: default_keep_unused_for(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// `EnvFilter` directives; `RUST_LOG` wins when set
  pub filter: Option<String>,
  /// Also write daily log files under the data directory
  #[serde(default)]
  pub file: bool,
}

impl PushSection {
  pub fn push_config(&self) -> PushConfig {
    PushConfig {
      reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
      topics: self.topics.clone(),
    }
  }
}

impl CacheSection {
  pub fn store_config(&self) -> StoreConfig {
    StoreConfig {
      stale_time: self.stale_time_secs.map(Duration::from_secs),
      keep_unused_for: Duration::from_secs(self.keep_unused_for_secs),
    }
  }
}

/// Names a config file to use when no path is given on the command line.
pub const CONFIG_ENV: &str = "TASKSYNC_CONFIG";

impl Config {
  /// Load and validate the configuration.
  ///
  /// Lookup order:
  /// 1. Explicit path if provided
  /// 2. `$TASKSYNC_CONFIG`
  /// 3. ./tasksync.yaml (current directory)
  /// 4. $XDG_CONFIG_HOME/tasksync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let path = resolve_path(explicit_path, from_env)?;
    let contents = std::fs::read_to_string(&path)
      .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
    Self::from_yaml(&contents).wrap_err_with(|| format!("Invalid config file {}", path.display()))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Self = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let scheme = self.api.base_url.scheme();
    if scheme != "http" && scheme != "https" {
      return Err(eyre!("api.base_url must be http or https, got {}", scheme));
    }
    if let Some(push) = &self.push {
      let scheme = push.url.scheme();
      if scheme != "ws" && scheme != "wss" {
        return Err(eyre!("push.url must be ws or wss, got {}", scheme));
      }
      // Zero would reconnect in a tight loop against a dead broker.
      if push.reconnect_delay_secs == 0 {
        return Err(eyre!("push.reconnect_delay_secs must be at least 1"));
      }
    }
    Ok(())
  }
}

/// A path named explicitly or through the environment must exist; the
/// default locations are only tried when neither is set.
fn resolve_path(explicit: Option<&Path>, from_env: Option<PathBuf>) -> Result<PathBuf> {
  if let Some(p) = explicit {
    return existing(p.to_path_buf(), "Config file not found");
  }
  if let Some(p) = from_env {
    return existing(p, &format!("{} points to a missing file", CONFIG_ENV));
  }

  let local = PathBuf::from("tasksync.yaml");
  if local.exists() {
    return Ok(local);
  }
  if let Some(config_dir) = dirs::config_dir() {
    let xdg_path = config_dir.join("tasksync").join("config.yaml");
    if xdg_path.exists() {
      return Ok(xdg_path);
    }
  }

  Err(eyre!(
    "No configuration file found. Create one at ~/.config/tasksync/config.yaml or set {}",
    CONFIG_ENV
  ))
}

fn existing(path: PathBuf, what: &str) -> Result<PathBuf> {
  if path.exists() {
    Ok(path)
  } else {
    Err(eyre!("{}: {}", what, path.display()))
  }
}
