//! # PointFlow: point-cloud processing pipelines
//!
//! Build a DAG of stages (readers, filters, writers), negotiate one shared
//! dimension schema, then stream points through it in fixed-size chunks.
//!
//! ## Architecture
//!
//! - **Pipeline**: stage graph, compiler, executor and the columnar buffers
//! - **Stages**: built-in readers, filters and writers plus native plugins
//! - **Scripting**: Rhai functions applied per chunk by `filters.script`
//! - **Config**: chunking, plugin discovery and logging settings from TOML
//!
//! ## Configuration
//!
//! Settings are read from `pointflow.toml` in the platform config directory:
//!
//! - **Linux**: `~/.config/pointflow/`
//! - **macOS**: `~/Library/Application Support/pointflow/`
//! - **Windows**: `%APPDATA%\pointflow\`
//!
//! ## Example
//!
//! ```ignore
//! use pointflow::pipeline::{PipelineBuilder, StageFactory};
//!
//! let factory = StageFactory::default();
//! let mut builder = PipelineBuilder::new();
//! let reader = builder.add_stage(None, factory.create("readers.text", &[
//!     ("filename".into(), "points.csv".into()),
//! ])?)?;
//! let writer = builder.add_stage(Some("out"), factory.create("writers.memory", &[])?)?;
//! builder.connect(reader, writer)?;
//!
//! let mut pipeline = builder.build()?;
//! let summary = pipeline.run()?;
//! println!("{} points", summary.points_read);
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod scripting;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{PointFlowError, Result};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineReader, StageFactory};
pub use scripting::ScriptEngine;
pub use types::DataType;
