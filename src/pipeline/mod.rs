//! Point-cloud pipeline engine.
//!
//! Stages are wired into a DAG: readers produce chunks of points, filters
//! transform or drop them, writers consume them. Every stage shares one
//! [`PointTable`] schema negotiated during `prepare`, and points move
//! through the graph in columnar [`PointBuffer`] chunks.
//!
//! # Architecture
//!
//! ```text
//! [readers.text] ──► [filters.range] ──► [filters.script] ──► [writers.text]
//!                                   └──► [writers.memory]
//! ```
//!
//! # Lifecycle
//!
//! `initialize` → `prepare` → `execute` (per chunk) → `finish`, with
//! `teardown` on every stage that was initialized, whatever the outcome.
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinStage` for every built-in stage,
//!   `Box<dyn Stage>` only for plugins.
//! - **Columnar chunks**: one typed `Vec` per dimension, reused between pulls.
//! - **Frozen schema**: the table becomes an `Arc` snapshot after `prepare`,
//!   so readers of the schema never lock.

pub mod buffer;
pub mod compiled_plan;
pub mod compiler;
pub mod dimension;
pub mod error;
pub mod executor;
pub mod factory;
pub mod id;
pub mod options;
pub mod pipeline_reader;
pub mod plugin;
pub mod stage;
pub mod stages;
pub mod table;

pub use buffer::{ColumnData, PointBuffer, DEFAULT_MAX_POINTS};
pub use compiled_plan::{CompiledPlan, PlanStats};
pub use compiler::PipelineCompiler;
pub use dimension::{Dimension, DimensionRegistry};
pub use error::{ErrorKind, PipelineError, PipelineResult, StagePhase};
pub use executor::{Pipeline, PipelineBuilder, RunSummary};
pub use factory::{StageEntry, StageFactory, StageInfo, StageInstance, StageOrigin};
pub use id::{DimId, StageId};
pub use options::{OptionKind, OptionSpec, OptionValue, Options};
pub use pipeline_reader::PipelineReader;
pub use plugin::{NativePluginLoader, PluginSource, StageRegistrar};
pub use stage::{AnyStage, BuiltinStage, Chunk, ChunkResult, ExecStatus, Stage, StageKind, StageState};
pub use table::PointTable;
