use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use forgetasks::{BatchPolicy, ProjectSettings};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub site: SiteConfig,
  pub default_project: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub batch: BatchPolicy,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  pub url: Url,
  pub username: Option<String>,
  /// Request timeout in seconds
  #[serde(default = "default_timeout")]
  pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Recently used issues kept in memory
  #[serde(default = "default_issue_capacity")]
  pub issue_capacity: usize,
}

fn default_issue_capacity() -> usize {
  forgetasks::cache::DEFAULT_CAPACITY
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      issue_capacity: default_issue_capacity(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./forgetasks.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/forgetasks/config.yaml
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
        "No configuration file found. Create one at ~/.config/forgetasks/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("forgetasks.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("forgetasks").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.batch.threshold == 0 || config.batch.budget == 0 {
      return Err(eyre!("batch.threshold and batch.budget must be positive"));
    }
    Ok(config)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.site.timeout_secs)
  }

  pub fn project_settings(&self) -> ProjectSettings {
    ProjectSettings {
      batch: self.batch,
      issue_capacity: self.cache.issue_capacity,
    }
  }

  /// Get the site password from the environment.
  ///
  /// Checks FORGETASKS_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("FORGETASKS_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the FORGETASKS_PASSWORD environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("site:\n  url: https://forge.example.org\n").unwrap();
    assert_eq!(config.site.url.as_str(), "https://forge.example.org/");
    assert_eq!(config.site.username, None);
    assert_eq!(config.timeout(), Duration::from_secs(30));
    assert_eq!(config.batch, BatchPolicy::default());
    assert_eq!(config.cache.issue_capacity, 256);
    assert!(config.log.file.is_none());
  }

  #[test]
  fn test_full_config() {
    let config = Config::parse(
      "
site:
  url: https://forge.example.org/base
  username: alice
  timeout_secs: 5
default_project: demo
cache:
  issue_capacity: 32
batch:
  budget: 4000
log:
  file: /tmp/forgetasks.log
",
    )
    .unwrap();

    assert_eq!(config.site.username.as_deref(), Some("alice"));
    assert_eq!(config.default_project.as_deref(), Some("demo"));
    let settings = config.project_settings();
    assert_eq!(settings.issue_capacity, 32);
    assert_eq!(settings.batch.budget, 4000);
    assert_eq!(settings.batch.threshold, 250);
    assert_eq!(config.log.file, Some(PathBuf::from("/tmp/forgetasks.log")));
  }

  #[test]
  fn test_example_config_parses() {
    let config = Config::parse(include_str!("../config.example.yaml")).unwrap();
    assert_eq!(config.batch, BatchPolicy::default());
    assert_eq!(config.default_project.as_deref(), Some("demo"));
  }

  #[test]
  fn test_rejects_bad_values() {
    assert!(Config::parse("site:\n  url: not a url\n").is_err());
    assert!(Config::parse("default_project: demo\n").is_err());
    assert!(Config::parse("site:\n  url: https://f.org\nbatch:\n  budget: 0\n").is_err());
  }

  #[test]
  fn test_explicit_missing_file_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/forgetasks.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
