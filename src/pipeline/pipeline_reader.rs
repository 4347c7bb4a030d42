//! JSON pipeline descriptions.
//!
//! ```json
//! {
//!   "pipeline": [
//!     "input.csv",
//!     { "type": "filters.range", "dimension": "Z", "min": 0, "tag": "ground" },
//!     { "type": "filters.scale", "source": "Z", "factor": 0.3048, "inputs": ["ground"] },
//!     "output.csv"
//!   ]
//! }
//! ```
//!
//! Bare strings are filenames whose driver is inferred from the extension:
//! the last element of a multi-element pipeline is a writer, everything else
//! a reader. Objects name their stage with `type` (or infer it from
//! `filename`); `tag` labels the stage, `inputs` lists upstream tags, and
//! every other member becomes a stage option. A non-reader without `inputs`
//! consumes the element before it.

use crate::config::{EngineConfig, ExecutionConfig};
use crate::pipeline::dimension::DimensionRegistry;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::executor::{Pipeline, PipelineBuilder};
use crate::pipeline::factory::StageFactory;
use crate::pipeline::id::StageId;
use crate::pipeline::options::OptionValue;
use crate::pipeline::stage::StageKind;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Members of a stage object that are not options.
const RESERVED: &[&str] = &["type", "tag", "inputs"];

/// One parsed pipeline element.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub stage_type: String,
    pub tag: Option<String>,
    /// `None` means "the previous element" for non-readers.
    pub inputs: Option<Vec<String>>,
    pub options: Vec<(String, OptionValue)>,
}

/// Builds pipelines from JSON descriptions.
pub struct PipelineReader<'a> {
    factory: &'a StageFactory,
    settings: ExecutionConfig,
    base_options: Vec<(String, OptionValue)>,
    registry: Option<Arc<DimensionRegistry>>,
}

impl<'a> PipelineReader<'a> {
    pub fn new(factory: &'a StageFactory) -> Self {
        Self {
            factory,
            settings: ExecutionConfig::default(),
            base_options: Vec::new(),
            registry: None,
        }
    }

    /// Execution settings and base stage options from `config`.
    pub fn with_config(factory: &'a StageFactory, config: &EngineConfig) -> Self {
        Self {
            factory,
            settings: config.execution.clone(),
            base_options: config.base_options(),
            registry: None,
        }
    }

    pub fn registry(mut self, registry: Arc<DimensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> PipelineResult<Pipeline> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Resource(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Read pipeline description {}", path.display());
        self.read_str(&content)
    }

    pub fn read_str(&self, json: &str) -> PipelineResult<Pipeline> {
        let value: Value = serde_json::from_str(json).map_err(|e| {
            PipelineError::InvalidPipeline(format!("unable to parse pipeline JSON: {}", e))
        })?;
        self.read_value(&value)
    }

    pub fn read_value(&self, value: &Value) -> PipelineResult<Pipeline> {
        let specs = parse_pipeline(value)?;
        self.build(&specs)
    }

    fn build(&self, specs: &[StageSpec]) -> PipelineResult<Pipeline> {
        let mut builder = PipelineBuilder::with_settings(self.settings.clone());
        if let Some(registry) = &self.registry {
            builder = builder.registry(Arc::clone(registry));
        }

        let mut ids: Vec<(StageId, StageKind)> = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut options = self.base_options.clone();
            options.extend(spec.options.iter().cloned());
            let instance = self.factory.create(&spec.stage_type, &options)?;
            let kind = instance.kind();
            let id = builder.add_stage(spec.tag.as_deref(), instance)?;
            ids.push((id, kind));
        }

        for (pos, spec) in specs.iter().enumerate() {
            let (id, kind) = ids[pos];
            match &spec.inputs {
                Some(tags) => {
                    for tag in tags {
                        let from = builder.find_tag(tag).ok_or_else(|| {
                            PipelineError::InvalidPipeline(format!(
                                "'{}' lists undefined input '{}'",
                                spec.stage_type, tag
                            ))
                        })?;
                        builder.connect(from, id)?;
                    }
                }
                None if kind != StageKind::Reader && pos > 0 => {
                    builder.connect(ids[pos - 1].0, id)?;
                }
                None => {}
            }
        }

        tracing::info!("Pipeline description parsed: {} stages", specs.len());
        builder.build()
    }
}

/// Parse the `pipeline` array into stage specs without constructing stages.
pub fn parse_pipeline(value: &Value) -> PipelineResult<Vec<StageSpec>> {
    let elements = value
        .get("pipeline")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PipelineError::InvalidPipeline("root must contain a 'pipeline' array".to_string())
        })?;

    let last = elements.len().saturating_sub(1);
    elements
        .iter()
        .enumerate()
        .map(|(pos, element)| {
            let as_writer = elements.len() > 1 && pos == last;
            match element {
                Value::String(filename) => Ok(StageSpec {
                    stage_type: infer_driver(filename, as_writer)?,
                    tag: None,
                    inputs: None,
                    options: vec![("filename".to_string(), OptionValue::String(filename.clone()))],
                }),
                Value::Object(members) => parse_stage(members, as_writer),
                other => Err(PipelineError::InvalidPipeline(format!(
                    "pipeline element {} must be a filename or an object, got {}",
                    pos, other
                ))),
            }
        })
        .collect()
}

fn parse_stage(members: &Map<String, Value>, as_writer: bool) -> PipelineResult<StageSpec> {
    let stage_type = match members.get("type") {
        Some(Value::String(t)) => {
            let valid = t
                .split_once('.')
                .is_some_and(|(category, _)| StageKind::from_prefix(category).is_some());
            if !valid {
                return Err(PipelineError::InvalidPipeline(format!(
                    "stage type '{}' must start with readers., filters. or writers.",
                    t
                )));
            }
            t.clone()
        }
        Some(other) => {
            return Err(PipelineError::InvalidPipeline(format!(
                "'type' must be a string, got {}",
                other
            )))
        }
        None => match members.get("filename").and_then(Value::as_str) {
            Some(filename) => infer_driver(filename, as_writer)?,
            None => {
                return Err(PipelineError::InvalidPipeline(
                    "stage needs a 'type' or a 'filename'".to_string(),
                ))
            }
        },
    };

    let tag = match members.get("tag") {
        None => None,
        Some(Value::String(tag)) if !tag.is_empty() => Some(tag.clone()),
        Some(other) => {
            return Err(PipelineError::InvalidPipeline(format!(
                "'{}' has an invalid tag {}",
                stage_type, other
            )))
        }
    };

    let inputs = match members.get("inputs") {
        None => None,
        Some(Value::String(tag)) => Some(vec![tag.clone()]),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        PipelineError::InvalidPipeline(format!(
                            "'{}' inputs must be tag strings",
                            stage_type
                        ))
                    })
                })
                .collect::<PipelineResult<_>>()?,
        ),
        Some(other) => {
            return Err(PipelineError::InvalidPipeline(format!(
                "'{}' has invalid inputs {}",
                stage_type, other
            )))
        }
    };

    let mut options = Vec::new();
    for (name, value) in members {
        if RESERVED.contains(&name.as_str()) {
            continue;
        }
        options.push((name.clone(), option_value(&stage_type, name, value)?));
    }

    Ok(StageSpec {
        stage_type,
        tag,
        inputs,
        options,
    })
}

fn option_value(stage: &str, name: &str, value: &Value) -> PipelineResult<OptionValue> {
    let invalid = || {
        PipelineError::InvalidPipeline(format!(
            "'{}' option '{}' has unsupported value {}",
            stage, name, value
        ))
    };
    match value {
        Value::Bool(b) => Ok(OptionValue::Bool(*b)),
        Value::String(s) => Ok(OptionValue::String(s.clone())),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(OptionValue::Int(i)),
            None => n.as_f64().map(OptionValue::Float).ok_or_else(invalid),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(OptionValue::List)
            .ok_or_else(invalid),
        Value::Null | Value::Object(_) => Err(invalid()),
    }
}

fn infer_driver(filename: &str, as_writer: bool) -> PipelineResult<String> {
    let driver = if as_writer {
        StageFactory::infer_writer_driver(filename)
    } else {
        StageFactory::infer_reader_driver(filename)
    };
    driver.map(str::to_string).ok_or_else(|| {
        PipelineError::InvalidPipeline(format!(
            "cannot infer a {} for '{}'",
            if as_writer { "writer" } else { "reader" },
            filename
        ))
    })
}
