//! Rhai Script Engine Implementation
//!
//! Wraps a configured `rhai::Engine` for the script filter: safety limits
//! sized for whole-chunk arrays, a handful of numeric helpers, and a single
//! entry point that calls a named script function with a map of dimension
//! arrays and returns the map the script produced.
//!
//! ## Helper Functions
//!
//! - `clamp(x, min, max)`, `min(a, b)`, `max(a, b)`
//! - `map_range(x, in_min, in_max, out_min, out_max)` - Linear remap
//! - `hypot(x, y)`, `atan2(y, x)`, `sqrt`, `pow`, `abs`, `floor`, `ceil`, `round`
//! - `zeros(n)` - Array of `n` zero floats
//! - `filled(n, value)` - Array of `n` copies of `value`

use crate::pipeline::buffer::DEFAULT_MAX_POINTS;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::scripting::{CompiledScript, ScriptCache};
use rhai::{Array, Dynamic, Engine, Map, Scope};
use std::sync::RwLock;

/// Default operation budget for one script call.
pub const DEFAULT_MAX_OPERATIONS: u64 = 50_000_000;

/// Safety limits applied to every engine.
#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    /// Operations allowed per call; 0 means unlimited.
    pub max_operations: u64,
    /// Largest array a script may build; must hold a whole chunk.
    pub max_array_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_array_size: DEFAULT_MAX_POINTS,
        }
    }
}

/// The script engine used by the script filter.
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    /// Compiled scripts keyed by source
    cache: RwLock<ScriptCache>,
}

impl ScriptEngine {
    /// Create a new script engine with default limits
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    pub fn with_limits(limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, limits);

        Self {
            engine,
            cache: RwLock::new(ScriptCache::new()),
        }
    }

    /// Configure the Rhai engine with built-in functions and safety limits
    fn configure_engine(engine: &mut Engine, limits: ScriptLimits) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(1_000);

        engine.register_fn("abs", |x: f64| x.abs());
        engine.register_fn("sqrt", |x: f64| x.sqrt());
        engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
        engine.register_fn("atan2", |y: f64, x: f64| y.atan2(x));
        engine.register_fn("hypot", |x: f64, y: f64| x.hypot(y));
        engine.register_fn("floor", |x: f64| x.floor());
        engine.register_fn("ceil", |x: f64| x.ceil());
        engine.register_fn("round", |x: f64| x.round());

        engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
        engine.register_fn("min", |a: f64, b: f64| a.min(b));
        engine.register_fn("max", |a: f64, b: f64| a.max(b));

        engine.register_fn(
            "map_range",
            |x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64| -> f64 {
                if in_max == in_min {
                    out_min
                } else {
                    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
                }
            },
        );

        engine.register_fn("zeros", |n: i64| -> Array {
            vec![Dynamic::from_float(0.0); n.max(0) as usize]
        });
        engine.register_fn("filled", |n: i64, value: f64| -> Array {
            vec![Dynamic::from_float(value); n.max(0) as usize]
        });
    }

    /// Compile a script and cache it
    pub fn compile(&self, name: &str, source: &str) -> PipelineResult<CompiledScript> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.get_or_compile(&self.engine, name, source)
    }

    /// Call `function` with a single map argument; the script must return a
    /// map.
    pub fn call_with_map(
        &self,
        script: &CompiledScript,
        function: &str,
        input: Map,
    ) -> PipelineResult<Map> {
        let mut scope = Scope::new();
        let result = self
            .engine
            .call_fn::<Dynamic>(&mut scope, &script.ast, function, (input,))
            .map_err(|e| {
                PipelineError::Script(format!("{}: '{}' failed: {}", script.name, function, e))
            })?;
        let type_name = result.type_name();
        result.try_cast::<Map>().ok_or_else(|| {
            PipelineError::Script(format!(
                "{}: '{}' must return a map of arrays, returned {}",
                script.name, function, type_name
            ))
        })
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cache_size", &self.cache.read().map(|c| c.len()).ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(name: &str, values: &[f64]) -> Map {
        let mut map = Map::new();
        let array: Array = values.iter().map(|v| Dynamic::from_float(*v)).collect();
        map.insert(name.into(), Dynamic::from_array(array));
        map
    }

    #[test]
    fn test_engine_creation() {
        let engine = ScriptEngine::new();
        assert_eq!(engine.cache.read().unwrap().len(), 0);
    }

    #[test]
    fn test_call_with_map() {
        let engine = ScriptEngine::new();
        let script = engine
            .compile(
                "double",
                r#"
fn process(ins) {
    let out = [];
    for x in ins.X {
        out.push(x * 2.0);
    }
    #{ Doubled: out }
}
"#,
            )
            .unwrap();
        let result = engine
            .call_with_map(&script, "process", map_of("X", &[1.0, 2.5]))
            .unwrap();
        let doubled = result["Doubled"].clone().into_array().unwrap();
        assert_eq!(doubled.len(), 2);
        assert_eq!(doubled[1].as_float().unwrap(), 5.0);
    }

    #[test]
    fn test_non_map_return_is_script_error() {
        let engine = ScriptEngine::new();
        let script = engine.compile("bad", "fn process(ins) { 42 }").unwrap();
        let err = engine
            .call_with_map(&script, "process", Map::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Script(_)));
    }

    #[test]
    fn test_missing_function_is_script_error() {
        let engine = ScriptEngine::new();
        let script = engine.compile("empty", "fn other(ins) { ins }").unwrap();
        assert!(engine
            .call_with_map(&script, "process", Map::new())
            .is_err());
    }

    #[test]
    fn test_operation_limit() {
        let engine = ScriptEngine::with_limits(ScriptLimits {
            max_operations: 1_000,
            ..ScriptLimits::default()
        });
        let script = engine
            .compile("spin", "fn process(ins) { loop {} }")
            .unwrap();
        assert!(engine
            .call_with_map(&script, "process", Map::new())
            .is_err());
    }

    #[test]
    fn test_helpers() {
        let engine = ScriptEngine::new();
        let script = engine
            .compile(
                "helpers",
                r#"
fn process(ins) {
    #{
        a: [clamp(150.0, 0.0, 100.0)],
        b: [map_range(50.0, 0.0, 100.0, 0.0, 1000.0)],
        c: zeros(3),
        d: [hypot(3.0, 4.0)],
    }
}
"#,
            )
            .unwrap();
        let out = engine
            .call_with_map(&script, "process", Map::new())
            .unwrap();
        let first = |k: &str| out[k].clone().into_array().unwrap()[0].as_float().unwrap();
        assert_eq!(first("a"), 100.0);
        assert_eq!(first("b"), 500.0);
        assert_eq!(first("d"), 5.0);
        assert_eq!(out["c"].clone().into_array().unwrap().len(), 3);
    }

    #[test]
    fn test_caching() {
        let engine = ScriptEngine::new();
        let source = "fn process(ins) { ins }";
        engine.compile("a", source).unwrap();
        engine.compile("b", source).unwrap();
        assert_eq!(engine.cache.read().unwrap().len(), 1);
        engine.compile("c", "fn process(ins) { #{} }").unwrap();
        assert_eq!(engine.cache.read().unwrap().len(), 2);
    }
}
