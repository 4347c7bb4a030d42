//! `readers.faux`: synthetic point source.
//!
//! Every value is a pure function of the global point index (and the seed),
//! so the same pipeline yields identical points whatever the chunk size.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::pipeline::options::{OptionSpec, Options};
use crate::pipeline::stage::{Chunk, ChunkResult, ExecStatus, Stage, StageKind};
use crate::pipeline::table::PointTable;
use crate::types::DataType;

pub const NAME: &str = "readers.faux";
pub const DESCRIPTION: &str = "Synthetic points for testing and benchmarking";
pub const LINK: &str = "https://pointflow.dev/stages/readers.faux";

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::int("count", "Number of points to generate", 0),
    OptionSpec::string("mode", "Value pattern: constant, ramp or random", "constant"),
    OptionSpec::float("bounds_min", "Lowest generated coordinate", 0.0),
    OptionSpec::float("bounds_max", "Highest generated coordinate", 1.0),
    OptionSpec::int("seed", "Seed for random mode", 0),
];

/// How coordinates vary with the point index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FauxMode {
    /// Every coordinate equals `bounds_min`.
    Constant,
    /// Linear from `bounds_min` (first point) to `bounds_max` (last point).
    Ramp,
    /// Uniform in `[bounds_min, bounds_max)`.
    Random,
}

impl FauxMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constant" => Some(FauxMode::Constant),
            "ramp" => Some(FauxMode::Ramp),
            "random" => Some(FauxMode::Random),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FauxDims {
    x: DimId,
    y: DimId,
    z: DimId,
    intensity: DimId,
}

pub struct FauxReader {
    count: u64,
    mode: FauxMode,
    min: f64,
    max: f64,
    seed: u64,
    dims: Option<FauxDims>,
    /// Global index of the next point to emit.
    next: u64,
}

impl FauxReader {
    pub fn new() -> Self {
        Self {
            count: 0,
            mode: FauxMode::Constant,
            min: 0.0,
            max: 1.0,
            seed: 0,
            dims: None,
            next: 0,
        }
    }

    /// Coordinate `axis` (0..3) of point `index`.
    fn coordinate(&self, index: u64, axis: u64) -> f64 {
        match self.mode {
            FauxMode::Constant => self.min,
            FauxMode::Ramp => {
                if self.count <= 1 {
                    self.min
                } else {
                    let t = index as f64 / (self.count - 1) as f64;
                    self.min + (self.max - self.min) * t
                }
            }
            FauxMode::Random => {
                let bits = splitmix64(self.seed ^ index.wrapping_mul(3).wrapping_add(axis));
                // Top 53 bits as a unit float.
                let unit = (bits >> 11) as f64 / (1u64 << 53) as f64;
                self.min + (self.max - self.min) * unit
            }
        }
    }
}

impl Default for FauxReader {
    fn default() -> Self {
        Self::new()
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

impl Stage for FauxReader {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Reader
    }

    fn option_specs(&self) -> &[OptionSpec] {
        OPTIONS
    }

    fn initialize(&mut self, options: &Options) -> PipelineResult<()> {
        let count = options.get_int("count")?;
        self.count = u64::try_from(count).map_err(|_| {
            PipelineError::TypeMismatch(format!("count must not be negative, got {}", count))
        })?;
        let mode = options.get_string("mode")?;
        self.mode = FauxMode::parse(&mode).ok_or_else(|| {
            PipelineError::TypeMismatch(format!("unknown faux mode '{}'", mode))
        })?;
        self.min = options.get_float("bounds_min")?;
        self.max = options.get_float("bounds_max")?;
        if self.max < self.min {
            return Err(PipelineError::InvalidPipeline(format!(
                "bounds_max {} is below bounds_min {}",
                self.max, self.min
            )));
        }
        self.seed = options.get_int("seed")? as u64;
        self.next = 0;
        Ok(())
    }

    fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        self.dims = Some(FauxDims {
            x: table.add_dimension("X", DataType::F64)?,
            y: table.add_dimension("Y", DataType::F64)?,
            z: table.add_dimension("Z", DataType::F64)?,
            intensity: table.add_dimension("Intensity", DataType::U16)?,
        });
        Ok(())
    }

    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let Chunk::Fill { buffer, limit } = chunk else {
            return Err(PipelineError::InvalidState(format!(
                "{} can only fill buffers",
                NAME
            )));
        };
        let dims = self
            .dims
            .ok_or_else(|| PipelineError::InvalidState(format!("{} is not prepared", NAME)))?;

        let remaining = self.count - self.next;
        let n = remaining.min(limit as u64) as usize;
        buffer.reserve(buffer.size() + n)?;
        for _ in 0..n {
            let g = self.next;
            let idx = buffer.append_point()?;
            buffer.set(idx, dims.x, self.coordinate(g, 0))?;
            buffer.set(idx, dims.y, self.coordinate(g, 1))?;
            buffer.set(idx, dims.z, self.coordinate(g, 2))?;
            buffer.set(idx, dims.intensity, (g % 65_536) as u16)?;
            self.next += 1;
        }

        let status = if self.next >= self.count {
            ExecStatus::Exhausted
        } else {
            ExecStatus::MoreData
        };
        Ok(ChunkResult::Read(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::buffer::PointBuffer;
    use crate::pipeline::dimension::DimensionRegistry;
    use std::sync::Arc;

    fn setup(count: i64, mode: &str) -> (FauxReader, Arc<PointTable>) {
        let mut reader = FauxReader::new();
        let mut opts = Options::for_stage(reader.option_specs());
        opts.set("count", count).unwrap();
        opts.set("mode", mode).unwrap();
        opts.set("bounds_min", 0.0).unwrap();
        opts.set("bounds_max", 10.0).unwrap();
        reader.initialize(&opts).unwrap();
        let mut table = PointTable::new(Arc::new(DimensionRegistry::with_defaults()));
        reader.prepare(&mut table).unwrap();
        (reader, Arc::new(table))
    }

    #[test]
    fn test_declares_xyz_and_intensity() {
        let (_, table) = setup(1, "constant");
        for name in ["X", "Y", "Z", "Intensity"] {
            assert!(table.has_dimension(name));
        }
    }

    #[test]
    fn test_fills_in_chunks_until_exhausted() {
        let (mut reader, table) = setup(5, "ramp");
        let mut buf = PointBuffer::new(table.clone(), 2);
        let x = table.find("X").unwrap();

        let mut xs = Vec::new();
        loop {
            buf.clear();
            let res = reader
                .execute(Chunk::Fill {
                    buffer: &mut buf,
                    limit: 2,
                })
                .unwrap();
            xs.extend_from_slice(buf.column::<f64>(x).unwrap());
            if res == ChunkResult::Read(ExecStatus::Exhausted) {
                break;
            }
        }
        assert_eq!(xs, vec![0.0, 2.5, 5.0, 7.5, 10.0]);
    }

    #[test]
    fn test_random_stays_in_bounds_and_is_deterministic() {
        let (mut a, table) = setup(100, "random");
        let (mut b, _) = setup(100, "random");
        let x = table.find("X").unwrap();
        let mut ba = PointBuffer::new(table.clone(), 100);
        let mut bb = PointBuffer::new(table.clone(), 100);
        a.execute(Chunk::Fill { buffer: &mut ba, limit: 100 }).unwrap();
        b.execute(Chunk::Fill { buffer: &mut bb, limit: 100 }).unwrap();
        let xa = ba.column::<f64>(x).unwrap();
        assert_eq!(xa, bb.column::<f64>(x).unwrap());
        assert!(xa.iter().all(|v| (0.0..10.0).contains(v)));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let mut reader = FauxReader::new();
        let mut opts = Options::for_stage(reader.option_specs());
        opts.set("mode", "spiral").unwrap();
        assert!(reader.initialize(&opts).is_err());
    }

    #[test]
    fn test_zero_count_is_immediately_exhausted() {
        let (mut reader, table) = setup(0, "constant");
        let mut buf = PointBuffer::new(table, 4);
        let res = reader
            .execute(Chunk::Fill { buffer: &mut buf, limit: 4 })
            .unwrap();
        assert_eq!(res, ChunkResult::Read(ExecStatus::Exhausted));
        assert!(buf.is_empty());
    }
}
