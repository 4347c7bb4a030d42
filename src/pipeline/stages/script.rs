//! `filters.script`: run a Rhai function over each chunk.
//!
//! The requested input dimensions are copied out as named arrays; the
//! script's result map must hold every declared output, each exactly as long
//! as the chunk, with values representable in the output's declared type.
//! Anything else is a `Script` error; nothing is silently skipped.

use crate::pipeline::buffer::{ColumnData, PointBuffer};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::DimId;
use crate::pipeline::options::{OptionDefault, OptionKind, OptionSpec, Options};
use crate::pipeline::stage::{Chunk, ChunkResult, Stage, StageKind};
use crate::pipeline::table::PointTable;
use crate::scripting::{CompiledScript, ScriptEngine, ScriptLimits, DEFAULT_MAX_OPERATIONS};
use crate::types::DataType;
use rhai::{Array, Dynamic, Map};

pub const NAME: &str = "filters.script";
pub const DESCRIPTION: &str = "Computes dimensions with an embedded Rhai script";
pub const LINK: &str = "https://pointflow.dev/stages/filters.script";

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::new(
        "source",
        "Inline script source",
        OptionKind::String,
        OptionDefault::None,
    ),
    OptionSpec::new(
        "filename",
        "Script file, used when 'source' is not given",
        OptionKind::String,
        OptionDefault::None,
    ),
    OptionSpec::string("function", "Function called once per chunk", "process"),
    OptionSpec::list("inputs", "Dimensions passed to the script"),
    OptionSpec::list("outputs", "Dimensions read back, as Name or Name:type"),
    OptionSpec::int(
        "max_operations",
        "Operation budget per call (0 = unlimited)",
        DEFAULT_MAX_OPERATIONS as i64,
    ),
];

/// A declared script output.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    pub name: String,
    pub data_type: DataType,
}

impl ScriptOutput {
    /// Parse `Name` (f64) or `Name:type`.
    pub fn parse(spec: &str) -> PipelineResult<Self> {
        let (name, ty) = match spec.split_once(':') {
            Some((name, ty)) => {
                let data_type = DataType::parse(ty).ok_or_else(|| {
                    PipelineError::Script(format!("output '{}': unknown type '{}'", name, ty))
                })?;
                (name.trim(), data_type)
            }
            None => (spec.trim(), DataType::F64),
        };
        if name.is_empty() {
            return Err(PipelineError::Script(format!(
                "output '{}' has no name",
                spec
            )));
        }
        Ok(Self {
            name: name.to_string(),
            data_type: ty,
        })
    }
}

pub struct ScriptFilter {
    engine: Option<ScriptEngine>,
    script: Option<CompiledScript>,
    function: String,
    input_names: Vec<String>,
    outputs: Vec<ScriptOutput>,
    inputs: Vec<DimId>,
    output_dims: Vec<DimId>,
}

impl ScriptFilter {
    pub fn new() -> Self {
        Self {
            engine: None,
            script: None,
            function: "process".to_string(),
            input_names: Vec::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            output_dims: Vec::new(),
        }
    }

    fn input_map(&self, buffer: &PointBuffer) -> PipelineResult<Map> {
        let mut map = Map::new();
        for (name, &dim) in self.input_names.iter().zip(&self.inputs) {
            let array = column_to_array(buffer.column_data(dim)?, buffer.size());
            map.insert(name.as_str().into(), Dynamic::from_array(array));
        }
        Ok(map)
    }

    fn store_outputs(&self, mut result: Map, buffer: &mut PointBuffer) -> PipelineResult<()> {
        let size = buffer.size();
        for (output, &dim) in self.outputs.iter().zip(&self.output_dims) {
            let value = result.remove(output.name.as_str()).ok_or_else(|| {
                PipelineError::Script(format!("script did not return output '{}'", output.name))
            })?;
            let type_name = value.type_name();
            let array = value.into_array().map_err(|_| {
                PipelineError::Script(format!(
                    "output '{}' must be an array, got {}",
                    output.name, type_name
                ))
            })?;
            if array.len() != size {
                return Err(PipelineError::Script(format!(
                    "output '{}' has {} values for a chunk of {} points",
                    output.name,
                    array.len(),
                    size
                )));
            }
            for (idx, item) in array.into_iter().enumerate() {
                let v = numeric(&item).ok_or_else(|| {
                    PipelineError::Script(format!(
                        "output '{}'[{}] is {}, not a number",
                        output.name,
                        idx,
                        item.type_name()
                    ))
                })?;
                buffer.set_f64(idx, dim, v).map_err(|_| {
                    PipelineError::Script(format!(
                        "output '{}'[{}] = {} is not representable as {}",
                        output.name, idx, v, output.data_type
                    ))
                })?;
            }
        }
        Ok(())
    }
}

impl Default for ScriptFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric(item: &Dynamic) -> Option<f64> {
    item.as_float()
        .ok()
        .or_else(|| item.as_int().ok().map(|i| i as f64))
}

fn column_to_array(column: &ColumnData, len: usize) -> Array {
    macro_rules! ints {
        ($v:expr) => {
            $v[..len].iter().map(|x| Dynamic::from_int(*x as i64)).collect()
        };
    }
    macro_rules! floats {
        ($v:expr) => {
            $v[..len]
                .iter()
                .map(|x| Dynamic::from_float(*x as f64))
                .collect()
        };
    }
    match column {
        ColumnData::I8(v) => ints!(v),
        ColumnData::I16(v) => ints!(v),
        ColumnData::I32(v) => ints!(v),
        ColumnData::I64(v) => ints!(v),
        ColumnData::U8(v) => ints!(v),
        ColumnData::U16(v) => ints!(v),
        ColumnData::U32(v) => ints!(v),
        // Values above i64::MAX do not fit a script integer.
        ColumnData::U64(v) => floats!(v),
        ColumnData::F32(v) => floats!(v),
        ColumnData::F64(v) => floats!(v),
    }
}

impl Stage for ScriptFilter {
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
        let (label, source) = match (
            options.get_opt_string("source")?,
            options.get_opt_string("filename")?,
        ) {
            (Some(source), _) => (NAME.to_string(), source),
            (None, Some(path)) => {
                let source = std::fs::read_to_string(&path)
                    .map_err(|e| PipelineError::Resource(format!("{}: {}", path, e)))?;
                (path, source)
            }
            (None, None) => {
                return Err(PipelineError::InvalidPipeline(format!(
                    "{} requires 'source' or 'filename'",
                    NAME
                )))
            }
        };

        let max_operations = options.get_int("max_operations")?;
        let engine = ScriptEngine::with_limits(ScriptLimits {
            max_operations: max_operations.max(0) as u64,
            ..ScriptLimits::default()
        });
        let script = engine.compile(&label, &source)?;

        self.function = options.get_string("function")?;
        if !script.has_function(&self.function, 1) {
            return Err(PipelineError::Script(format!(
                "{} does not define {}(ins)",
                label, self.function
            )));
        }
        self.input_names = options.get_list("inputs")?;
        self.outputs = options
            .get_list("outputs")?
            .iter()
            .map(|s| ScriptOutput::parse(s))
            .collect::<PipelineResult<_>>()?;
        self.engine = Some(engine);
        self.script = Some(script);
        Ok(())
    }

    fn prepare(&mut self, table: &mut PointTable) -> PipelineResult<()> {
        self.inputs = self
            .input_names
            .iter()
            .map(|n| table.require(n))
            .collect::<PipelineResult<_>>()?;
        self.output_dims = self
            .outputs
            .iter()
            .map(|o| table.add_dimension(&o.name, o.data_type))
            .collect::<PipelineResult<_>>()?;
        Ok(())
    }

    fn execute(&mut self, chunk: Chunk<'_>) -> PipelineResult<ChunkResult> {
        let Chunk::Transform(buffer) = chunk else {
            return Err(PipelineError::InvalidState(format!(
                "{} needs an owned chunk",
                NAME
            )));
        };
        let (Some(engine), Some(script)) = (self.engine.as_ref(), self.script.as_ref()) else {
            return Err(PipelineError::InvalidState(format!(
                "{} is not initialized",
                NAME
            )));
        };

        let input = self.input_map(buffer)?;
        let result = engine.call_with_map(script, &self.function, input)?;
        self.store_outputs(result, buffer)?;
        Ok(ChunkResult::Filtered)
    }

    fn teardown(&mut self) {
        self.script = None;
        self.engine = None;
    }
}
