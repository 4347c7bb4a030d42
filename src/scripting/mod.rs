//! Rhai scripting for the `filters.script` stage
//!
//! A script defines a function (by default `process`) that receives one map
//! argument: each requested input dimension under its name, as an array of
//! the chunk's values. Integer dimensions arrive as integers, floating
//! point dimensions as floats. The function returns a map whose entries are
//! the declared output dimensions, each an array as long as the chunk.
//!
//! ## Example Scripts
//!
//! Height above a reference plane:
//! ```rhai
//! fn process(ins) {
//!     let out = [];
//!     for z in ins.Z {
//!         out.push(z - 120.0);
//!     }
//!     #{ HeightAboveGround: out }
//! }
//! ```
//!
//! Reclassify bright returns:
//! ```rhai
//! fn process(ins) {
//!     let classes = [];
//!     for i in ins.Intensity {
//!         classes.push(if i > 4000 { 6 } else { 1 });
//!     }
//!     #{ Classification: classes }
//! }
//! ```

mod engine;

pub use engine::{ScriptEngine, ScriptLimits, DEFAULT_MAX_OPERATIONS};

use crate::pipeline::error::{PipelineError, PipelineResult};
use rhai::{Engine, AST};
use std::collections::HashMap;

/// A compiled script ready to be called.
#[derive(Clone)]
pub struct CompiledScript {
    /// The compiled AST
    ast: AST,
    /// The original source code
    source: String,
    /// Name used in error messages
    name: String,
}

impl CompiledScript {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the script defines `function` taking `arity` parameters.
    pub fn has_function(&self, function: &str, arity: usize) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == function && f.params.len() == arity)
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled scripts to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from script source to compiled script
    cache: HashMap<String, CompiledScript>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached script or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        name: &str,
        source: &str,
    ) -> PipelineResult<CompiledScript> {
        if let Some(script) = self.cache.get(source) {
            return Ok(script.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| PipelineError::Script(format!("{}: compilation error: {}", name, e)))?;

        let script = CompiledScript {
            ast,
            source: source.to_string(),
            name: name.to_string(),
        };

        self.cache.insert(source.to_string(), script.clone());
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_function() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();
        let script = cache
            .get_or_compile(&engine, "t", "fn process(ins) { ins }")
            .unwrap();
        assert!(script.has_function("process", 1));
        assert!(!script.has_function("process", 2));
        assert!(!script.has_function("convert", 1));
    }

    #[test]
    fn test_compile_error() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();
        let err = cache
            .get_or_compile(&engine, "broken", "fn process(")
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(cache.is_empty());
    }
}
