//! Stage abstraction for the pipeline.
//!
//! Two-layer design, as for every pluggable surface in the engine:
//! - **`Stage` trait**: the contract every stage implements, and the form
//!   plugin stages take (`Box<dyn Stage>`).
//! - **`BuiltinStage` enum**: all stages shipped with the crate, dispatched
//!   by match so the per-chunk calls are static.
//!
//! `AnyStage` wraps either variant so the executor handles both uniformly.
//!
//! Reader, filter and writer are roles, not separate traits: the executor
//! hands each role a different [`Chunk`] shape.

use crate::pipeline::buffer::PointBuffer;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::options::{OptionSpec, Options};
use crate::pipeline::stages::{
    FauxReader, MemoryWriter, NullWriter, RangeFilter, ScaleFilter, ScriptFilter, TextReader,
    TextWriter,
};
use crate::pipeline::table::PointTable;
use serde::{Deserialize, Serialize};

/// Role of a stage in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Produces points; has no upstream.
    Reader,
    /// Transforms points in place; one or more upstream stages.
    Filter,
    /// Consumes points; one or more upstream stages.
    Writer,
}

impl StageKind {
    /// Namespace prefix used in qualified stage names.
    pub fn prefix(&self) -> &'static str {
        match self {
            StageKind::Reader => "readers",
            StageKind::Filter => "filters",
            StageKind::Writer => "writers",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "readers" => Some(StageKind::Reader),
            "filters" => Some(StageKind::Filter),
            "writers" => Some(StageKind::Writer),
            _ => None,
        }
    }

    pub fn all() -> &'static [StageKind] {
        &[StageKind::Reader, StageKind::Filter, StageKind::Writer]
    }

    /// Whether stages of this kind take upstream input.
    pub fn has_inputs(&self) -> bool {
        !matches!(self, StageKind::Reader)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::Reader => "Reader",
            StageKind::Filter => "Filter",
            StageKind::Writer => "Writer",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Lifecycle position of a stage. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageState {
    Constructed,
    Initialized,
    Prepared,
    Executing,
    Done,
}

/// Whether a reader has more points to give.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    MoreData,
    Exhausted,
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkResult {
    /// A reader filled its buffer.
    Read(ExecStatus),
    /// A filter transformed the chunk (possibly dropping points).
    Filtered,
    /// A writer durably committed this many points.
    Committed(usize),
}

/// The buffer handed to `execute`, shaped by the stage's role.
pub enum Chunk<'a> {
    /// Readers append at most `limit` points to an empty buffer.
    Fill {
        buffer: &'a mut PointBuffer,
        limit: usize,
    },
    /// Filters own the chunk while they run.
    Transform(&'a mut PointBuffer),
    /// Writers get a shared view; several may read it concurrently.
    View(&'a PointBuffer),
}

impl Chunk<'_> {
    pub fn buffer(&self) -> &PointBuffer {
        match self {
            Chunk::Fill { buffer, .. } => buffer,
            Chunk::Transform(buffer) => buffer,
            Chunk::View(buffer) => buffer,
        }
    }
}

/// Contract shared by every stage.
pub trait Stage: Send {
    /// Qualified type name, e.g. `filters.range`.
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    /// Options this stage recognizes besides the common ones.
    fn option_specs(&self) -> &[OptionSpec] {
        &[]
    }

    /// Validate options and acquire external resources. No point data is
    /// consumed here.
    fn initialize(&mut self, _options: &Options) -> PipelineResult<()> {
        Ok(())
    }

    /// Declare dimensions: require what is read from upstream, add what
    /// is produced. Must not touch point records.
    fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()>;

    /// Process one chunk.
    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult>;

    /// Called once after the last chunk; writers flush here.
    fn finish(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    /// Release resources. Safe to call in any state, more than once.
    fn teardown(&mut self) {}
}

/// Enum dispatch for built-in stages.
pub enum BuiltinStage {
    FauxReader(FauxReader),
    TextReader(TextReader),
    ScaleFilter(ScaleFilter),
    RangeFilter(RangeFilter),
    ScriptFilter(ScriptFilter),
    MemoryWriter(MemoryWriter),
    NullWriter(NullWriter),
    TextWriter(TextWriter),
}

macro_rules! dispatch {
    ($self:expr, $s:ident => $call:expr) => {
        match $self {
            BuiltinStage::FauxReader($s) => $call,
            BuiltinStage::TextReader($s) => $call,
            BuiltinStage::ScaleFilter($s) => $call,
            BuiltinStage::RangeFilter($s) => $call,
            BuiltinStage::ScriptFilter($s) => $call,
            BuiltinStage::MemoryWriter($s) => $call,
            BuiltinStage::NullWriter($s) => $call,
            BuiltinStage::TextWriter($s) => $call,
        }
    };
}

impl BuiltinStage {
    pub fn name(&self) -> &str {
        dispatch!(self, s => s.name())
    }

    pub fn kind(&self) -> StageKind {
        dispatch!(self, s => s.kind())
    }

    pub fn option_specs(&self) -> &[OptionSpec] {
        dispatch!(self, s => s.option_specs())
    }

    pub fn initialize(&mut self, options: &Options) -> PipelineResult<()> {
        dispatch!(self, s => s.initialize(options))
    }

    pub fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        dispatch!(self, s => s.prepare(table))
    }

    pub fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        dispatch!(self, s => s.execute(chunk))
    }

    pub fn finish(&mut self) -> PipelineResult<()> {
        dispatch!(self, s => s.finish())
    }

    pub fn teardown(&mut self) {
        dispatch!(self, s => s.teardown())
    }
}

/// Wrapper that holds either a built-in stage (enum dispatch) or a plugin
/// (trait object).
pub enum AnyStage {
    Builtin(BuiltinStage),
    Plugin(Box<dyn Stage>),
}

impl AnyStage {
    pub fn name(&self) -> &str {
        match self {
            AnyStage::Builtin(s) => s.name(),
            AnyStage::Plugin(s) => s.name(),
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            AnyStage::Builtin(s) => s.kind(),
            AnyStage::Plugin(s) => s.kind(),
        }
    }

    pub fn option_specs(&self) -> &[OptionSpec] {
        match self {
            AnyStage::Builtin(s) => s.option_specs(),
            AnyStage::Plugin(s) => s.option_specs(),
        }
    }

    pub fn initialize(&mut self, options: &Options) -> PipelineResult<()> {
        match self {
            AnyStage::Builtin(s) => s.initialize(options),
            AnyStage::Plugin(s) => s.initialize(options),
        }
    }

    pub fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        match self {
            AnyStage::Builtin(s) => s.prepare(table),
            AnyStage::Plugin(s) => s.prepare(table),
        }
    }

    pub fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        match self {
            AnyStage::Builtin(s) => s.execute(chunk),
            AnyStage::Plugin(s) => s.execute(chunk),
        }
    }

    pub fn finish(&mut self) -> PipelineResult<()> {
        match self {
            AnyStage::Builtin(s) => s.finish(),
            AnyStage::Plugin(s) => s.finish(),
        }
    }

    pub fn teardown(&mut self) {
        match self {
            AnyStage::Builtin(s) => s.teardown(),
            AnyStage::Plugin(s) => s.teardown(),
        }
    }

    /// Points collected by a `writers.memory` stage.
    pub fn memory_points(&self) -> Option<&PointBuffer> {
        match self {
            AnyStage::Builtin(BuiltinStage::MemoryWriter(w)) => w.points(),
            _ => None,
        }
    }
}

impl From<BuiltinStage> for AnyStage {
    fn from(stage: BuiltinStage) -> Self {
        AnyStage::Builtin(stage)
    }
}

impl From<Box<dyn Stage>> for AnyStage {
    fn from(stage: Box<dyn Stage>) -> Self {
        AnyStage::Plugin(stage)
    }
}
