//! Runner configuration.
//!
//! Stored as TOML at `$BUCKETFERRY_CONFIG` when set, otherwise:
//! - Linux: `~/.config/bucketferry/ferry.toml`
//! - Windows: `%APPDATA%/bucketferry/ferry.toml`

use std::path::{Path, PathBuf};

use bucketferry_http_source::HttpSourceConfig;
use bucketferry_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "BUCKETFERRY_CONFIG";

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory the filesystem store writes objects into.
    #[serde(default = "default_store_root")]
    pub store_root: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout for source fetches (unset = none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub transfer: TransferConfig,
}

fn default_store_root() -> String {
    "./bucket".into()
}

fn default_connect_timeout() -> u64 {
    HttpSourceConfig::default().connect_timeout_secs
}

fn default_user_agent() -> String {
    HttpSourceConfig::default().user_agent
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: None,
            user_agent: default_user_agent(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Settings for the HTTP source.
    pub fn http(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            connect_timeout_secs: self.connect_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("bucketferry").join("ferry.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("bucketferry")
            .join("ferry.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketferry_transfer::Buffering;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.store_root, "./bucket");
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.request_timeout_secs.is_none());
        assert_eq!(config.transfer, TransferConfig::default());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
store_root = "/srv/bucket"

[transfer]
chunk_size = 1048576
max_concurrency = 4
buffering = "whole"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store_root, "/srv/bucket");
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.transfer.chunk_size.get(), 1_048_576);
        assert_eq!(config.transfer.max_concurrency.map(|n| n.get()), Some(4));
        assert_eq!(config.transfer.buffering, Buffering::Whole);
        assert!(config.transfer.abort_on_failure);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let toml_str = "[transfer]\nchunk_size = 0\n";
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn http_settings_follow_config() {
        let config = Config {
            request_timeout_secs: Some(30),
            user_agent: "test-agent".into(),
            ..Config::default()
        };
        let http = config.http();
        assert_eq!(http.request_timeout_secs, Some(30));
        assert_eq!(http.user_agent, "test-agent");
    }

    #[test]
    fn missing_file_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("ferry.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ferry.toml");

        let config = Config {
            store_root: "/data".into(),
            request_timeout_secs: Some(120),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
