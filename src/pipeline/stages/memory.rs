//! In-process writers: `writers.memory` keeps every point it is handed,
//! `writers.null` counts and discards.

use crate::pipeline::buffer::PointBuffer;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::stage::{Chunk, ChunkResult, Stage, StageKind};
use crate::pipeline::table::PointTable;

pub const MEMORY_NAME: &str = "writers.memory";
pub const MEMORY_DESCRIPTION: &str = "Collects points into an in-memory buffer";
pub const MEMORY_LINK: &str = "https://pointflow.dev/stages/writers.memory";

pub const NULL_NAME: &str = "writers.null";
pub const NULL_DESCRIPTION: &str = "Discards points";
pub const NULL_LINK: &str = "https://pointflow.dev/stages/writers.null";

/// MemoryWriter: accumulates every chunk it sees.
pub struct MemoryWriter {
    points: Option<PointBuffer>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self { points: None }
    }

    /// Everything collected so far; `None` before the first chunk.
    pub fn points(&self) -> Option<&PointBuffer> {
        self.points.as_ref()
    }

    pub fn take_points(&mut self) -> Option<PointBuffer> {
        self.points.take()
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for MemoryWriter {
    fn name(&self) -> &str {
        MEMORY_NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Writer
    }

    fn prepare(&mut self, _table: &mut PointTable) -> PipelineResult<()> {
        self.points = None;
        Ok(())
    }

    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let Chunk::View(view) = chunk else {
            return Err(PipelineError::InvalidState(format!(
                "{} expects a read-only chunk",
                MEMORY_NAME
            )));
        };
        let count = view.size();
        match self.points.as_mut() {
            Some(points) => points.extend_from(view)?,
            None => self.points = Some(view.clone()),
        }
        Ok(ChunkResult::Committed(count))
    }
}

/// NullWriter: commits every point without storing it.
#[derive(Default)]
pub struct NullWriter {
    seen: u64,
}

impl NullWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl Stage for NullWriter {
    fn name(&self) -> &str {
        NULL_NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Writer
    }

    fn prepare(&mut self, _table: &mut PointTable) -> PipelineResult<()> {
        Ok(())
    }

    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let count = chunk.buffer().size();
        self.seen += count as u64;
        Ok(ChunkResult::Committed(count))
    }
}
