//! Runtime configuration.
//!
//! An optional TOML file overlaid by `ROSTER_*` environment variables, with
//! `__` between nested keys (`ROSTER_DEVICE__URL`). Every key has a default.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub store_path:              PathBuf,
  pub device:                  DeviceConfig,
  pub server:                  ServerConfig,
  pub reconcile_interval_secs: u64,
}

/// Where the terminal bridge listens.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
  pub url:          String,
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Config {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .set_default("store_path", "~/.local/share/roster/roster.db")?
      .set_default("device.url", "http://127.0.0.1:4370")?
      .set_default("device.timeout_secs", 10)?
      .set_default("server.host", "127.0.0.1")?
      .set_default("server.port", 8370)?
      .set_default("reconcile_interval_secs", 60)?
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("ROSTER")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config from {}", path.display()))?;

    let mut config: Self = settings
      .try_deserialize()
      .context("failed to deserialise config")?;
    config.store_path = expand_tilde(&config.store_path);
    Ok(config)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let config = Config::load(Path::new("/nonexistent/roster.toml")).unwrap();
    assert_eq!(config.device.timeout_secs, 10);
    assert_eq!(config.server.port, 8370);
    assert_eq!(config.reconcile_interval_secs, 60);
    assert!(config.store_path.ends_with("roster/roster.db"));
  }

  #[test]
  fn file_overrides_defaults() {
    let path = std::env::temp_dir().join(format!("roster-config-{}.toml", std::process::id()));
    std::fs::write(
      &path,
      "store_path = \"/var/lib/roster.db\"\nreconcile_interval_secs = 5\n\n[device]\nurl = \"http://10.0.0.9:4370\"\n",
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.store_path, PathBuf::from("/var/lib/roster.db"));
    assert_eq!(config.reconcile_interval_secs, 5);
    assert_eq!(config.device.url, "http://10.0.0.9:4370");
    assert_eq!(config.device.timeout_secs, 10);
  }

  #[test]
  fn tilde_expands_against_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/x.db")), PathBuf::from(home).join("x.db"));
    assert_eq!(expand_tilde(Path::new("/abs/x.db")), PathBuf::from("/abs/x.db"));
  }
}
