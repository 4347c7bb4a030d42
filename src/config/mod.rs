//! Configuration module for pointflow
//!
//! [`EngineConfig`] is stored as TOML and groups the executor, plugin and
//! logging settings. Every field has a default, so a partial file (or none)
//! is fine.
//!
//! # Config Location
//!
//! Without `--config` the binary reads `pointflow.toml` from the platform
//! config directory:
//! - **Linux**: `~/.config/pointflow/`
//! - **macOS**: `~/Library/Application Support/pointflow/`
//! - **Windows**: `%APPDATA%\pointflow\`
//!
//! # Plugin Search Paths
//!
//! With dynamic discovery, plugin libraries are looked up in
//! `plugins.search_paths`, then every entry of `POINTFLOW_DRIVER_PATH`, then
//! `pointflow/plugins` under the platform data directory.
//!
//! # Example
//!
//! ```toml
//! [execution]
//! chunk_size = 4096
//! parallel_writers = true
//!
//! [plugins]
//! discovery = "dynamic"
//! search_paths = ["/opt/pointflow/plugins"]
//!
//! [logging]
//! filter = "pointflow=debug"
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{PointFlowError, Result};
use crate::pipeline::options::{OptionValue, DEBUG_OPTION, VERBOSE_OPTION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config and data directories
pub const APP_ID: &str = "pointflow";

/// Config filename
pub const CONFIG_FILE: &str = "pointflow.toml";

/// Environment variable holding extra plugin directories (path-list syntax)
pub const DRIVER_PATH_ENV: &str = "POINTFLOW_DRIVER_PATH";

// ==================== Directories ====================

/// Platform config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Platform plugin directory
pub fn default_plugin_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID).join("plugins"))
}

// ==================== Engine Config ====================

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub plugins: PluginConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PointFlowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            PointFlowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("Ignoring config {:?}: {}", path, e);
                }
                Self::default()
            }
        }
    }

    /// Save config file to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PointFlowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PointFlowError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            PointFlowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let exec = &self.execution;
        if exec.chunk_size == 0 {
            return Err(PointFlowError::Config(
                "execution.chunk_size must be at least 1".to_string(),
            ));
        }
        if exec.max_buffer_points < exec.chunk_size {
            return Err(PointFlowError::Config(format!(
                "execution.max_buffer_points ({}) is smaller than chunk_size ({})",
                exec.max_buffer_points, exec.chunk_size
            )));
        }
        if !(0..=MAX_VERBOSE).contains(&self.logging.verbose) {
            return Err(PointFlowError::Config(format!(
                "logging.verbose must be between 0 and {}",
                MAX_VERBOSE
            )));
        }
        Ok(())
    }

    /// Directories scanned for plugin libraries, in priority order.
    /// Empty under static discovery.
    pub fn plugin_search_paths(&self) -> Vec<PathBuf> {
        if self.plugins.discovery == DiscoveryMode::Static {
            return Vec::new();
        }

        let mut paths = self.plugins.search_paths.clone();
        if let Some(value) = std::env::var_os(DRIVER_PATH_ENV) {
            paths.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
        }
        if let Some(dir) = default_plugin_dir() {
            paths.push(dir);
        }
        paths.dedup();
        paths
    }

    /// Options applied to every stage built from a pipeline description
    pub fn base_options(&self) -> Vec<(String, OptionValue)> {
        let mut options = Vec::new();
        if self.logging.debug {
            options.push((DEBUG_OPTION.to_string(), OptionValue::Bool(true)));
        }
        if self.logging.verbose > 0 {
            options.push((
                VERBOSE_OPTION.to_string(),
                OptionValue::Int(self.logging.verbose),
            ));
        }
        options
    }
}
