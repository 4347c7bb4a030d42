//! `filters.range`: keep points whose dimension lies in `[min, max]`.
//!
//! Dropped points are removed from the chunk and the survivors are moved
//! to the front in their original order, so downstream stages always see a
//! contiguous buffer. With `invert` the predicate is flipped.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::pipeline::options::{OptionSpec, Options};
use crate::pipeline::stage::{Chunk, ChunkResult, Stage, StageKind};
use crate::pipeline::table::PointTable;

pub const NAME: &str = "filters.range";
pub const DESCRIPTION: &str = "Drops points outside a closed interval of one dimension";
pub const LINK: &str = "https://pointflow.dev/stages/filters.range";

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::required_string("dimension", "Dimension to test"),
    OptionSpec::float("min", "Lower bound (inclusive)", f64::NEG_INFINITY),
    OptionSpec::float("max", "Upper bound (inclusive)", f64::INFINITY),
    OptionSpec::bool("invert", "Keep points outside the range instead", false),
];

pub struct RangeFilter {
    dimension: String,
    min: f64,
    max: f64,
    invert: bool,
    dim: Option<DimId>,
    mask: Vec<bool>,
    dropped: u64,
}

impl RangeFilter {
    pub fn new() -> Self {
        Self {
            dimension: String::new(),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            invert: false,
            dim: None,
            mask: Vec::new(),
            dropped: 0,
        }
    }

    /// Points removed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for RangeFilter {
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
        self.dimension = options.get_opt_string("dimension")?.ok_or_else(|| {
            PipelineError::InvalidPipeline(format!("{} requires a dimension", NAME))
        })?;
        self.min = options.get_float("min")?;
        self.max = options.get_float("max")?;
        self.invert = options.get_bool("invert")?;
        self.dropped = 0;
        Ok(())
    }

    fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        self.dim = Some(table.require(&self.dimension)?);
        Ok(())
    }

    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let Chunk::Transform(buffer) = chunk else {
            return Err(PipelineError::InvalidState(format!(
                "{} needs an owned chunk",
                NAME
            )));
        };
        let dim = self
            .dim
            .ok_or_else(|| PipelineError::InvalidState(format!("{} is not prepared", NAME)))?;

        self.mask.clear();
        for idx in 0..buffer.size() {
            let v = buffer.get_as_f64(idx, dim)?;
            let in_range = v >= self.min && v <= self.max;
            // Pass if: (in_range AND !invert) OR (!in_range AND invert)
            self.mask.push(in_range != self.invert);
        }
        let removed = buffer.retain(&self.mask)?;
        self.dropped += removed as u64;
        if removed > 0 {
            tracing::trace!("{}: dropped {} of {} points", NAME, removed, self.mask.len());
        }
        Ok(ChunkResult::Filtered)
    }

    fn finish(&mut self) -> PipelineResult<()> {
        tracing::debug!("{}: dropped {} points in total", NAME, self.dropped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::buffer::PointBuffer;
    use crate::pipeline::dimension::DimensionRegistry;
    use crate::types::DataType;
    use std::sync::Arc;

    fn run(invert: bool) -> Vec<f64> {
        let mut table = PointTable::new(Arc::new(DimensionRegistry::with_defaults()));
        let z = table.add_dimension("Z", DataType::F64).unwrap();
        let mut filter = RangeFilter::new();
        let mut opts = Options::for_stage(filter.option_specs());
        opts.set("dimension", "Z").unwrap();
        opts.set("min", 2.0).unwrap();
        opts.set("max", 4.0).unwrap();
        opts.set("invert", invert).unwrap();
        filter.initialize(&opts).unwrap();
        filter.prepare(&mut table).unwrap();

        let mut buf = PointBuffer::new(Arc::new(table), 6);
        for i in 0..6 {
            buf.set(i, z, i as f64).unwrap();
        }
        filter.execute(Chunk::Transform(&mut buf)).unwrap();
        buf.column::<f64>(z).unwrap().to_vec()
    }

    #[test]
    fn test_keeps_closed_interval() {
        assert_eq!(run(false), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_invert() {
        assert_eq!(run(true), vec![0.0, 1.0, 5.0]);
    }

    #[test]
    fn test_requires_dimension_option() {
        let mut filter = RangeFilter::new();
        let opts = Options::for_stage(filter.option_specs());
        assert!(matches!(
            filter.initialize(&opts),
            Err(PipelineError::InvalidPipeline(_))
        ));
    }
}
