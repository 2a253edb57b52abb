//! Configuration structures for polyglot.
//!
//! This module defines configuration options for the orchestrator:
//! - [`Config`]: Top-level configuration containing all settings
//! - [`RuntimeConfig`]: Per-runtime settings (pool size, timeout, options)
//! - [`MemoryConfig`]: Shared memory coordinator settings
//! - [`LoggingConfig`]: Log filter and output format for the binary

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PolyglotError, Result};

/// Top-level configuration.
///
/// It can be built in code or loaded from TOML (see [`crate::config_file`]).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Application metadata.
    #[serde(default)]
    pub app: AppConfig,

    /// Runtime name -> runtime configuration.
    #[serde(default)]
    pub languages: BTreeMap<String, RuntimeConfig>,

    /// Shared memory configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Name of the application.
    #[serde(default = "defaults::app_name")]
    pub name: String,

    /// Version of the application.
    #[serde(default = "defaults::app_version")]
    pub version: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Author information.
    #[serde(default)]
    pub author: String,

    /// License identifier.
    #[serde(default = "defaults::license")]
    pub license: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: defaults::app_name(),
            version: defaults::app_version(),
            description: String::new(),
            author: String::new(),
            license: defaults::license(),
        }
    }
}

/// Configuration for a single runtime.
///
/// Supplied once when the orchestrator initializes the runtime; the adapter
/// keeps its own copy and never observes later edits.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Name of the runtime (python, javascript, lua, ...).
    ///
    /// Filled from the `[languages.<name>]` key when empty.
    #[serde(default)]
    pub name: String,

    /// Version constraint (e.g. "3.11", ">=1.70").
    #[serde(default)]
    pub version: String,

    /// Whether the runtime should be brought to the ready state.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Backend specific options.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,

    /// Pool size: maximum parallel executions.
    ///
    /// Zero selects the adapter default.
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,

    /// Upper bound for a single execution in milliseconds (0 disables it).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
}

impl RuntimeConfig {
    /// Create an enabled configuration with default limits.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: defaults::enabled(),
            options: BTreeMap::new(),
            max_concurrency: defaults::max_concurrency(),
            timeout_ms: defaults::timeout_ms(),
        }
    }

    /// Set the pool size.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set a backend option.
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Get the execution timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Shared memory coordinator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Budget for all regions together, in bytes.
    #[serde(default = "defaults::max_shared_memory")]
    pub max_shared_memory: u64,

    /// Hand regions out by reference instead of copying.
    ///
    /// Regions are always shared by reference; the flag is reported in
    /// statistics so backends can pick their own transfer strategy.
    #[serde(default = "defaults::enable_zero_copy")]
    pub enable_zero_copy: bool,

    /// Period of the maintenance tick, in seconds.
    #[serde(default = "defaults::gc_interval_secs")]
    pub gc_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_shared_memory: defaults::max_shared_memory(),
            enable_zero_copy: defaults::enable_zero_copy(),
            gc_interval_secs: defaults::gc_interval_secs(),
        }
    }
}

impl MemoryConfig {
    /// Get the maintenance interval as a `Duration`.
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

/// Logging configuration for the binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Check configuration validity.
    pub fn validate(&self) -> Result<()> {
        if self.app.name.is_empty() {
            return Err(PolyglotError::invalid_config("app name is required"));
        }

        if self.memory.max_shared_memory == 0 {
            return Err(PolyglotError::invalid_config(
                "max shared memory must be positive",
            ));
        }

        if let Some(key) = self.languages.keys().find(|key| key.is_empty()) {
            return Err(PolyglotError::invalid_config(format!(
                "runtime name must not be empty (got {key:?})"
            )));
        }

        Ok(())
    }

    /// Enable a runtime with default settings.
    ///
    /// Replaces any existing entry for `name`.
    pub fn enable_runtime(&mut self, name: &str, version: &str) {
        self.languages
            .insert(name.to_string(), RuntimeConfig::new(name, version));
    }

    /// Disable a runtime, keeping the rest of its settings.
    pub fn disable_runtime(&mut self, name: &str) {
        if let Some(cfg) = self.languages.get_mut(name) {
            cfg.enabled = false;
        }
    }

    /// Check whether a runtime is configured and enabled.
    pub fn is_runtime_enabled(&self, name: &str) -> bool {
        self.languages.get(name).is_some_and(|cfg| cfg.enabled)
    }

    /// Get the configuration for a runtime, with its name filled in.
    pub fn runtime_config(&self, name: &str) -> Option<RuntimeConfig> {
        self.languages.get(name).map(|cfg| {
            let mut cfg = cfg.clone();
            if cfg.name.is_empty() {
                cfg.name = name.to_string();
            }
            cfg
        })
    }
}

/// Default value functions for serde.
mod defaults {
    pub fn app_name() -> String {
        "polyglot-app".to_string()
    }

    pub fn app_version() -> String {
        "0.1.0".to_string()
    }

    pub fn license() -> String {
        "MIT".to_string()
    }

    pub const fn enabled() -> bool {
        true
    }

    pub const fn max_concurrency() -> usize {
        10
    }

    pub const fn timeout_ms() -> u64 {
        30_000
    }

    pub const fn max_shared_memory() -> u64 {
        1024 * 1024 * 1024
    }

    pub const fn enable_zero_copy() -> bool {
        true
    }

    pub const fn gc_interval_secs() -> u64 {
        300
    }

    pub fn log_level() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.app.name, "polyglot-app");
        assert_eq!(config.app.license, "MIT");
        assert!(config.languages.is_empty());
        assert_eq!(config.memory.max_shared_memory, 1024 * 1024 * 1024);
        assert!(config.memory.enable_zero_copy);
        assert_eq!(config.memory.gc_interval(), Duration::from_secs(300));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.app.name = String::new();
        assert!(matches!(
            config.validate(),
            Err(PolyglotError::InvalidConfig { .. })
        ));

        let mut config = Config::default();
        config.memory.max_shared_memory = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enable_and_disable_runtime() {
        let mut config = Config::default();

        config.enable_runtime("python", "3.11");
        assert!(config.is_runtime_enabled("python"));

        let rt = config.runtime_config("python").unwrap();
        assert_eq!(rt.name, "python");
        assert_eq!(rt.version, "3.11");
        assert_eq!(rt.max_concurrency, 10);
        assert_eq!(rt.timeout(), Some(Duration::from_secs(30)));

        config.disable_runtime("python");
        assert!(!config.is_runtime_enabled("python"));
        assert!(!config.is_runtime_enabled("ruby"));
    }

    #[test]
    fn test_runtime_config_builders() {
        let rt = RuntimeConfig::new("lua", "5.4")
            .with_max_concurrency(2)
            .with_timeout(Duration::ZERO)
            .with_option("sandbox", serde_json::json!(true));

        assert_eq!(rt.max_concurrency, 2);
        assert_eq!(rt.timeout(), None);
        assert_eq!(rt.options["sandbox"], serde_json::json!(true));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"languages": {"lua": {"max_concurrency": 2}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        let lua = config.runtime_config("lua").unwrap();
        assert_eq!(lua.name, "lua");
        assert_eq!(lua.max_concurrency, 2);
        // Defaults for unspecified fields
        assert!(lua.enabled);
        assert_eq!(lua.timeout_ms, 30_000);
        assert_eq!(config.app.name, "polyglot-app");
    }
}
