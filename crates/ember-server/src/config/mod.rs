//! Server configuration.
//!
//! This module provides configuration management for the `emberd` process.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use ember_common::config::{EngineConfig, RuleDispatchMode};
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Skip durable persistence. Persistence is not available, so the
    /// server runs in memory either way; the flag only silences the warning.
    #[serde(default)]
    pub disable_persistence: bool,

    /// Interval between reclamation passes, in milliseconds.
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,

    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_reclaim_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            disable_persistence: false,
            reclaim_interval_ms: default_reclaim_interval_ms(),
            log_level: default_log_level(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reclaim_interval_ms == 0 {
            bail!("reclaim_interval_ms must be greater than 0");
        }
        if let Err(message) = self.engine.validate() {
            bail!("invalid engine configuration: {message}");
        }
        Ok(())
    }

    /// Returns the reclamation interval.
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    /// Creates a builder for configuration.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

/// Builder for server configuration.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether persistence is disabled.
    pub fn disable_persistence(mut self, disable: bool) -> Self {
        self.config.disable_persistence = disable;
        self
    }

    /// Sets the reclamation interval in milliseconds.
    pub fn reclaim_interval_ms(mut self, ms: u64) -> Self {
        self.config.reclaim_interval_ms = ms;
        self
    }

    /// Sets the default log filter.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Sets the backing region size in bytes.
    pub fn region_size(mut self, bytes: u64) -> Self {
        self.config.engine.memory.region_size = bytes;
        self
    }

    /// Sets the locator table capacity.
    pub fn max_locators(mut self, count: u64) -> Self {
        self.config.engine.memory.max_locators = count;
        self
    }

    /// Sets the rule dispatch mode.
    pub fn rule_dispatch(mut self, dispatch: RuleDispatchMode) -> Self {
        self.config.engine.rules.dispatch = dispatch;
        self
    }

    /// Sets whether committed events are written to the event log.
    pub fn log_events(mut self, enabled: bool) -> Self {
        self.config.engine.rules.log_events = enabled;
        self
    }

    /// Sets whether superseded versions are reclaimed.
    pub fn gc_enabled(mut self, enabled: bool) -> Self {
        self.config.engine.txn.gc_enabled = enabled;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(!config.disable_persistence);
        assert_eq!(config.reclaim_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::builder()
            .disable_persistence(true)
            .reclaim_interval_ms(250)
            .region_size(2 * 1024 * 1024)
            .rule_dispatch(RuleDispatchMode::Background { workers: 4 })
            .log_events(false)
            .build();

        assert!(config.disable_persistence);
        assert_eq!(config.reclaim_interval_ms, 250);
        assert_eq!(config.engine.memory.region_size, 2 * 1024 * 1024);
        assert_eq!(
            config.engine.rules.dispatch,
            RuleDispatchMode::Background { workers: 4 }
        );
        assert!(!config.engine.rules.log_events);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ServerConfig::builder().reclaim_interval_ms(0).build();
        assert!(config.validate().is_err());

        let config = ServerConfig::builder().region_size(3).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("emberd.toml");

        let config = ServerConfig::builder()
            .disable_persistence(true)
            .rule_dispatch(RuleDispatchMode::Background { workers: 3 })
            .build();
        config.save(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emberd.toml");
        std::fs::write(
            &path,
            "reclaim_interval_ms = 50\n\n[engine.rules]\nlog_events = false\n",
        )
        .unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.reclaim_interval_ms, 50);
        assert!(!loaded.engine.rules.log_events);
        assert_eq!(loaded.engine.memory, ServerConfig::default().engine.memory);
        assert_eq!(loaded.log_level, "info");
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emberd.toml");
        std::fs::write(&path, "reclaim_interval_ms = 0\n").unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
    }
}
