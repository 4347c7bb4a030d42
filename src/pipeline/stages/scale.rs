//! `filters.scale`: derive a new dimension as `source * factor + offset`.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::pipeline::options::{OptionSpec, Options};
use crate::pipeline::stage::{Chunk, ChunkResult, Stage, StageKind};
use crate::pipeline::table::PointTable;
use crate::types::DataType;

pub const NAME: &str = "filters.scale";
pub const DESCRIPTION: &str = "Adds a dimension holding a linear function of another";
pub const LINK: &str = "https://pointflow.dev/stages/filters.scale";

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::string("source", "Dimension to read", "X"),
    OptionSpec::string("dimension", "Dimension to write (f64)", "Scaled"),
    OptionSpec::float("factor", "Multiplier", 1.0),
    OptionSpec::float("offset", "Added after scaling", 0.0),
];

pub struct ScaleFilter {
    source_name: String,
    target_name: String,
    factor: f64,
    offset: f64,
    /// (source, target) once prepared.
    dims: Option<(DimId, DimId)>,
    scratch: Vec<f64>,
}

impl ScaleFilter {
    pub fn new() -> Self {
        Self {
            source_name: "X".to_string(),
            target_name: "Scaled".to_string(),
            factor: 1.0,
            offset: 0.0,
            dims: None,
            scratch: Vec::new(),
        }
    }
}

impl Default for ScaleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ScaleFilter {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Filter
    }

    fn option_specs(&self) -> &[OptionSpec] {
        OPTIONS
    }

    fn initialize(&mut self, options: &Options) -> PipelineResult<()> {
        self.source_name = options.get_string("source")?;
        self.target_name = options.get_string("dimension")?;
        self.factor = options.get_float("factor")?;
        self.offset = options.get_float("offset")?;
        Ok(())
    }

    fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        let source = table.require(&self.source_name)?;
        let target = table.add_dimension(&self.target_name, DataType::F64)?;
        tracing::debug!(
            "{}: {} = {} * {} + {}",
            NAME,
            self.target_name,
            self.source_name,
            self.factor,
            self.offset
        );
        self.dims = Some((source, target));
        Ok(())
    }

    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let Chunk::Transform(buffer) = chunk else {
            return Err(PipelineError::InvalidState(format!(
                "{} needs an owned chunk",
                NAME
            )));
        };
        let (source, target) = self
            .dims
            .ok_or_else(|| PipelineError::InvalidState(format!("{} is not prepared", NAME)))?;

        self.scratch.clear();
        for idx in 0..buffer.size() {
            self.scratch
                .push(buffer.get_as_f64(idx, source)? * self.factor + self.offset);
        }
        buffer
            .column_mut::<f64>(target)?
            .copy_from_slice(&self.scratch);
        Ok(ChunkResult::Filtered)
    }
}
