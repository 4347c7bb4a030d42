//! Stage options.
//!
//! Each stage declares the options it recognizes as a static `OptionSpec`
//! table. Callers supply raw values (usually strings from a pipeline file or
//! the command line); `Options::set` coerces them to the declared kind and
//! rejects anything undeclared. Once the executor starts `initialize` the
//! options are frozen.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            OptionValue::Float(v) => Some(*v),
            OptionValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            OptionValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn kind(&self) -> OptionKind {
        match self {
            OptionValue::Bool(_) => OptionKind::Bool,
            OptionValue::Int(_) => OptionKind::Int,
            OptionValue::Float(_) => OptionKind::Float,
            OptionValue::String(_) => OptionKind::String,
            OptionValue::List(_) => OptionKind::List,
        }
    }

    /// Convert to `kind`, parsing strings where needed. Lossy conversions
    /// (float to int, list to scalar) are rejected.
    pub fn coerce(self, kind: OptionKind) -> Result<OptionValue, OptionValue> {
        if self.kind() == kind {
            return Ok(self);
        }
        match (self, kind) {
            (OptionValue::Int(v), OptionKind::Float) => Ok(OptionValue::Float(v as f64)),
            (OptionValue::String(s), OptionKind::Bool) => {
                let lowered = s.trim().to_ascii_lowercase();
                match lowered.as_str() {
                    "true" | "1" | "yes" | "on" => Ok(OptionValue::Bool(true)),
                    "false" | "0" | "no" | "off" => Ok(OptionValue::Bool(false)),
                    _ => Err(OptionValue::String(s)),
                }
            }
            (OptionValue::String(s), OptionKind::Int) => match s.trim().parse::<i64>() {
                Ok(v) => Ok(OptionValue::Int(v)),
                Err(_) => Err(OptionValue::String(s)),
            },
            (OptionValue::String(s), OptionKind::Float) => match s.trim().parse::<f64>() {
                Ok(v) => Ok(OptionValue::Float(v)),
                Err(_) => Err(OptionValue::String(s)),
            },
            (OptionValue::String(s), OptionKind::List) => Ok(OptionValue::List(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            (v @ (OptionValue::Bool(_) | OptionValue::Int(_) | OptionValue::Float(_)), OptionKind::String) => {
                Ok(OptionValue::String(v.to_string()))
            }
            (other, _) => Err(other),
        }
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", v),
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Float(v) => write!(f, "{}", v),
            OptionValue::String(v) => write!(f, "{}", v),
            OptionValue::List(v) => write!(f, "{}", v.join(",")),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::String(v)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(v: Vec<String>) -> Self {
        OptionValue::List(v)
    }
}

/// The declared type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Float,
    String,
    List,
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionKind::Bool => write!(f, "bool"),
            OptionKind::Int => write!(f, "int"),
            OptionKind::Float => write!(f, "float"),
            OptionKind::String => write!(f, "string"),
            OptionKind::List => write!(f, "list"),
        }
    }
}

/// Compile-time default for an option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionDefault {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'static str),
}

impl OptionDefault {
    fn value(self) -> Option<OptionValue> {
        match self {
            OptionDefault::None => None,
            OptionDefault::Bool(v) => Some(OptionValue::Bool(v)),
            OptionDefault::Int(v) => Some(OptionValue::Int(v)),
            OptionDefault::Float(v) => Some(OptionValue::Float(v)),
            OptionDefault::Str(v) => Some(OptionValue::String(v.to_string())),
        }
    }
}

/// Static descriptor for a recognized option.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionKind,
    pub default: OptionDefault,
}

impl OptionSpec {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        kind: OptionKind,
        default: OptionDefault,
    ) -> Self {
        Self {
            name,
            description,
            kind,
            default,
        }
    }

    pub const fn bool(name: &'static str, description: &'static str, default: bool) -> Self {
        Self::new(name, description, OptionKind::Bool, OptionDefault::Bool(default))
    }

    pub const fn int(name: &'static str, description: &'static str, default: i64) -> Self {
        Self::new(name, description, OptionKind::Int, OptionDefault::Int(default))
    }

    pub const fn float(name: &'static str, description: &'static str, default: f64) -> Self {
        Self::new(name, description, OptionKind::Float, OptionDefault::Float(default))
    }

    pub const fn string(
        name: &'static str,
        description: &'static str,
        default: &'static str,
    ) -> Self {
        Self::new(name, description, OptionKind::String, OptionDefault::Str(default))
    }

    /// A string option with no default.
    pub const fn required_string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, OptionKind::String, OptionDefault::None)
    }

    pub const fn list(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, OptionKind::List, OptionDefault::None)
    }

    /// Default rendered for option listings.
    pub fn default_display(&self) -> String {
        self.default
            .value()
            .map(|v| v.to_string())
            .unwrap_or_default()
    }
}

pub const DEBUG_OPTION: &str = "debug";
pub const VERBOSE_OPTION: &str = "verbose";

/// Options every stage accepts in addition to its own.
pub static COMMON_OPTIONS: &[OptionSpec] = &[
    OptionSpec::bool(DEBUG_OPTION, "Enable debug logging for this stage", false),
    OptionSpec::int(VERBOSE_OPTION, "Log verbosity for this stage (0-8)", 0),
];

/// The option set of one stage instance.
#[derive(Debug, Clone, Default)]
pub struct Options {
    specs: Vec<OptionSpec>,
    values: HashMap<String, OptionValue>,
    frozen: bool,
}

impl Options {
    /// An empty option set recognizing nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// The common options plus `specs`.
    pub fn for_stage(specs: &[OptionSpec]) -> Self {
        let mut options = Self::new();
        options.specs.extend_from_slice(COMMON_OPTIONS);
        for spec in specs {
            options.declare(*spec);
        }
        options
    }

    fn declare(&mut self, spec: OptionSpec) {
        match self.specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    fn ensure_mutable(&self, name: &str) -> PipelineResult<()> {
        if self.frozen {
            return Err(PipelineError::InvalidState(format!(
                "option '{}' changed after initialization began",
                name
            )));
        }
        Ok(())
    }

    /// Declare a recognized option. Redeclaring a name replaces its spec.
    pub fn add(
        &mut self,
        name: &'static str,
        description: &'static str,
        kind: OptionKind,
        default: OptionDefault,
    ) -> PipelineResult<()> {
        self.ensure_mutable(name)?;
        self.declare(OptionSpec::new(name, description, kind, default));
        Ok(())
    }

    fn spec(&self, name: &str) -> PipelineResult<&OptionSpec> {
        self.specs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| PipelineError::UnknownOption(name.to_string()))
    }

    pub fn declares(&self, name: &str) -> bool {
        self.specs.iter().any(|s| s.name == name)
    }

    /// Assign a value, coercing it to the declared kind.
    pub fn set(&mut self, name: &str, value: impl Into<OptionValue>) -> PipelineResult<()> {
        let kind = self.spec(name)?.kind;
        self.ensure_mutable(name)?;
        let value = value.into().coerce(kind).map_err(|rejected| {
            PipelineError::TypeMismatch(format!(
                "option '{}' expects {}, got {} '{}'",
                name,
                kind,
                rejected.kind(),
                rejected
            ))
        })?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// The assigned value, else the default, else `None`.
    pub fn get(&self, name: &str) -> PipelineResult<Option<OptionValue>> {
        let spec = self.spec(name)?;
        Ok(self
            .values
            .get(name)
            .cloned()
            .or_else(|| spec.default.value()))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn required(&self, name: &str) -> PipelineResult<OptionValue> {
        self.get(name)?.ok_or_else(|| {
            PipelineError::InvalidState(format!("option '{}' has no value", name))
        })
    }

    pub fn get_bool(&self, name: &str) -> PipelineResult<bool> {
        let value = self.required(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, OptionKind::Bool, &value))
    }

    pub fn get_int(&self, name: &str) -> PipelineResult<i64> {
        let value = self.required(name)?;
        value.as_int().ok_or_else(|| mismatch(name, OptionKind::Int, &value))
    }

    pub fn get_float(&self, name: &str) -> PipelineResult<f64> {
        let value = self.required(name)?;
        value.as_float().ok_or_else(|| mismatch(name, OptionKind::Float, &value))
    }

    pub fn get_string(&self, name: &str) -> PipelineResult<String> {
        let value = self.required(name)?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| mismatch(name, OptionKind::String, &value))
    }

    /// A string option that may legitimately be absent.
    pub fn get_opt_string(&self, name: &str) -> PipelineResult<Option<String>> {
        match self.get(name)? {
            Some(OptionValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(name, OptionKind::String, &other)),
            None => Ok(None),
        }
    }

    /// A list option; unset lists are empty.
    pub fn get_list(&self, name: &str) -> PipelineResult<Vec<String>> {
        match self.get(name)? {
            Some(OptionValue::List(v)) => Ok(v),
            Some(other) => Err(mismatch(name, OptionKind::List, &other)),
            None => Ok(Vec::new()),
        }
    }

    /// Make the option set read-only.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn specs(&self) -> &[OptionSpec] {
        &self.specs
    }
}

fn mismatch(name: &str, kind: OptionKind, value: &OptionValue) -> PipelineError {
    PipelineError::TypeMismatch(format!(
        "option '{}' expects {}, holds {}",
        name,
        kind,
        value.kind()
    ))
}
