//! TOML configuration file loading.
//!
//! # Example
//!
//! ```toml
//! [app]
//! name = "my-app"
//!
//! [languages.lua]
//! version = "5.4"
//! max_concurrency = 4
//! timeout_ms = 5000
//!
//! [languages.python]
//! version = "3.11"
//! enabled = false
//!
//! [memory]
//! max_shared_memory = 268435456
//! gc_interval_secs = 60
//!
//! [logging]
//! level = "info,polyglot_core=debug"
//! json = false
//! ```

use std::path::Path;

use tracing::debug;

use crate::Config;

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        debug!(path = %path.as_ref().display(), "Loading configuration file");
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// Runtime entries without an explicit `name` take the table key.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let mut config: Config = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;

        for (key, runtime) in &mut config.languages {
            if runtime.name.is_empty() {
                runtime.name.clone_from(key);
            }
        }

        config.validate().map_err(|e| ConfigFileError::Invalid {
            message: e.to_string(),
        })?;

        Ok(config)
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// The file parsed but the configuration is invalid.
    #[error("Invalid config file: {message}")]
    Invalid { message: String },
}
