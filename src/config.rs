use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_LOG_FILTER;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Simulated transport used by the replay tool
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NavigationConfig {
    /// Wrap from the last visible message to the first on "next"
    #[serde(default = "default_true")]
    pub cycle_next: bool,
    /// Folder whose windows show messages that are still being sent
    #[serde(default = "default_outbox_folder")]
    pub outbox_folder: String,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            cycle_next: true,
            outbox_folder: default_outbox_folder(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchConfig {
    /// Ask before downloading a message while offline
    #[serde(default = "default_true")]
    pub confirm_offline_download: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            confirm_offline_download: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Log to `msgcursor.log` in the config directory instead of stderr
    #[serde(default = "default_true")]
    pub to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            to_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_outbox_folder() -> String {
    "outbox".to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("msgcursor");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the user config, or defaults when there is none
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let dir = path
            .parent()
            .context("Config path has no parent directory")?;

        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.navigation.cycle_next);
        assert_eq!(config.navigation.outbox_folder, "outbox");
        assert!(config.fetch.confirm_offline_download);
        assert_eq!(config.store.latency_ms, 0);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
        assert!(config.logging.to_file);
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml = r#"
            [navigation]
            cycle_next = false

            [fetch]
            confirm_offline_download = false

            [store]
            latency_ms = 25
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(!config.navigation.cycle_next);
        // Unset fields within a present section still get defaults
        assert_eq!(config.navigation.outbox_folder, "outbox");
        assert!(!config.fetch.confirm_offline_download);
        assert_eq!(config.store.latency_ms, 25);
        assert!(config.logging.to_file);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = Config::default();
        config.navigation.outbox_folder = "Sent Queue".to_string();
        config.logging.to_file = false;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let path = std::env::temp_dir().join(format!(
            "msgcursor-config-test-{}.toml",
            std::process::id()
        ));
        fs::write(&path, "[navigation]\ncycle_next = \"sometimes\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));

        fs::remove_file(&path).unwrap();
    }
}
