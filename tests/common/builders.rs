//! Stage builders for integration tests

use pointflow::config::ExecutionConfig;
use pointflow::pipeline::stages::{FauxReader, MemoryWriter, RangeFilter, ScaleFilter, ScriptFilter};
use pointflow::pipeline::{BuiltinStage, OptionValue, StageInstance};

/// Builder for `readers.faux` instances
pub struct FauxBuilder {
    count: i64,
    mode: &'static str,
    min: f64,
    max: f64,
    seed: i64,
}

impl FauxBuilder {
    pub fn new(count: i64) -> Self {
        Self {
            count,
            mode: "ramp",
            min: 0.0,
            max: (count.max(2) - 1) as f64,
            seed: 0,
        }
    }

    pub fn bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn random(mut self, seed: i64) -> Self {
        self.mode = "random";
        self.seed = seed;
        self
    }

    pub fn build(self) -> StageInstance {
        StageInstance::new(BuiltinStage::FauxReader(FauxReader::new()))
            .with_option("count", self.count)
            .and_then(|s| s.with_option("mode", self.mode))
            .and_then(|s| s.with_option("bounds_min", self.min))
            .and_then(|s| s.with_option("bounds_max", self.max))
            .and_then(|s| s.with_option("seed", self.seed))
            .unwrap()
    }
}

pub fn scale(source: &str, factor: f64) -> StageInstance {
    StageInstance::new(BuiltinStage::ScaleFilter(ScaleFilter::new()))
        .with_option("source", source)
        .and_then(|s| s.with_option("factor", factor))
        .unwrap()
}

pub fn range(dimension: &str, min: f64, max: f64) -> StageInstance {
    StageInstance::new(BuiltinStage::RangeFilter(RangeFilter::new()))
        .with_option("dimension", dimension)
        .and_then(|s| s.with_option("min", min))
        .and_then(|s| s.with_option("max", max))
        .unwrap()
}

pub fn script(source: &str, inputs: &[&str], outputs: &[&str]) -> StageInstance {
    let list = |items: &[&str]| OptionValue::List(items.iter().map(|s| s.to_string()).collect());
    StageInstance::new(BuiltinStage::ScriptFilter(ScriptFilter::new()))
        .with_option("source", source)
        .and_then(|s| s.with_option("inputs", list(inputs)))
        .and_then(|s| s.with_option("outputs", list(outputs)))
        .unwrap()
}

pub fn memory() -> StageInstance {
    StageInstance::new(BuiltinStage::MemoryWriter(MemoryWriter::new()))
}

pub fn settings(chunk_size: usize) -> ExecutionConfig {
    ExecutionConfig::default().with_chunk_size(chunk_size)
}
