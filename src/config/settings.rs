//! Engine settings sections
//!
//! - [`ExecutionConfig`] - Chunking, buffer bounds and writer fan-out
//! - [`PluginConfig`] - Stage discovery mode and plugin search paths
//! - [`LoggingConfig`] - Log filter, optional log file and the base stage
//!   options (`debug`, `verbose`) applied to every stage

use crate::pipeline::buffer::DEFAULT_MAX_POINTS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of points pulled from a reader per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Highest accepted `verbose` level
pub const MAX_VERBOSE: i64 = 8;

/// Executor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Points pulled from each reader per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Largest point count any single buffer may grow to
    #[serde(default = "default_max_buffer_points")]
    pub max_buffer_points: usize,

    /// Run writers fed by the same chunk on scoped threads
    #[serde(default)]
    pub parallel_writers: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_buffer_points() -> usize {
    DEFAULT_MAX_POINTS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_buffer_points: DEFAULT_MAX_POINTS,
            parallel_writers: false,
        }
    }
}

impl ExecutionConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_parallel_writers(mut self, parallel: bool) -> Self {
        self.parallel_writers = parallel;
        self
    }
}

/// How the stage factory finds stage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Built-in stages only
    #[default]
    Static,
    /// Built-ins plus plugin libraries found on the search paths
    Dynamic,
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryMode::Static => write!(f, "static"),
            DiscoveryMode::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Plugin discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PluginConfig {
    #[serde(default)]
    pub discovery: DiscoveryMode,

    /// Extra directories scanned for plugin libraries
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Also write logs to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Base `debug` option for every stage
    #[serde(default)]
    pub debug: bool,

    /// Base `verbose` option for every stage
    #[serde(default)]
    pub verbose: i64,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            log_file: None,
            debug: false,
            verbose: 0,
        }
    }
}
