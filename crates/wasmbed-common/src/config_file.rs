//! Configuration file structures for wasmbed.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`WasiConfigFile`]: WASI arguments, environment and directories
//! - [`MappedDirEntry`]: A guest alias bound to a host directory

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// optimize = true
///
/// [runtime.execution]
/// fuel_metering = true
/// max_fuel = 10_000_000
///
/// [wasi]
/// args = ["--verbose"]
/// env = ["HOME=/home"]
/// preopened_dirs = ["."]
///
/// [[wasi.mapped_dirs]]
/// alias = "/data"
/// host_path = "./data"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// WASI settings applied when a module imports WASI.
    #[serde(default)]
    pub wasi: WasiConfigFile,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        debug!(path = %path.as_ref().display(), "Configuration file read");

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// WASI settings from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WasiConfigFile {
    /// Arguments passed to the guest after the program name.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables in `KEY=VALUE` form.
    #[serde(default)]
    pub env: Vec<String>,

    /// Host directories preopened under their own path.
    #[serde(default)]
    pub preopened_dirs: Vec<String>,

    /// Host directories preopened under a guest alias.
    #[serde(default)]
    pub mapped_dirs: Vec<MappedDirEntry>,

    /// Connect the guest's stdin/stdout/stderr to the host's.
    #[serde(default = "defaults::inherit_stdio")]
    pub inherit_stdio: bool,
}

impl Default for WasiConfigFile {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            preopened_dirs: Vec::new(),
            mapped_dirs: Vec::new(),
            inherit_stdio: defaults::inherit_stdio(),
        }
    }
}

/// A guest-visible alias for a host directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MappedDirEntry {
    /// Path the guest sees.
    pub alias: String,

    /// Directory on the host.
    pub host_path: String,
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
}

/// Default value functions for serde.
mod defaults {
    pub const fn inherit_stdio() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(config.wasi.args.is_empty());
        assert!(config.wasi.env.is_empty());
        assert!(config.wasi.mapped_dirs.is_empty());
        assert!(config.wasi.inherit_stdio);
        assert!(!config.runtime.execution.fuel_metering);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [wasi]
            args = ["a", "b"]
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.wasi.args, vec!["a", "b"]);
        // Defaults applied
        assert!(config.wasi.inherit_stdio);
        assert!(config.runtime.engine.optimize);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            pooling_allocator = true
            max_instances = 500

            [runtime.execution]
            fuel_metering = true
            max_fuel = 5_000_000

            [wasi]
            args = ["--verbose"]
            env = ["HOME=/home", "LANG=C"]
            preopened_dirs = ["."]
            inherit_stdio = false

            [[wasi.mapped_dirs]]
            alias = "/data"
            host_path = "./data"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(config.runtime.engine.pooling_allocator);
        assert_eq!(config.runtime.engine.max_instances, 500);
        assert!(config.runtime.execution.fuel_metering);
        assert_eq!(config.runtime.execution.max_fuel, 5_000_000);
        assert_eq!(config.wasi.env.len(), 2);
        assert_eq!(config.wasi.preopened_dirs, vec!["."]);
        assert!(!config.wasi.inherit_stdio);
        assert_eq!(
            config.wasi.mapped_dirs,
            vec![MappedDirEntry {
                alias: "/data".into(),
                host_path: "./data".into(),
            }]
        );
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }
}
