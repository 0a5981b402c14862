//! Rhai Script Engine Implementation
//!
//! This module provides the configured Rhai engine used by transformer nodes.
//!
//! ## Helper Functions
//!
//! - `now()` - Current time in seconds since the Unix epoch
//! - `op_type(s)` - Normalize an op string the way the engine parses it
//!   (`"ins"` → `"insert"`, `"x"` → `"unknown"`)
//! - `has(map, key)` - Whether a map contains a key

use crate::error::{DataPipeError, Result};
use crate::message::OpType;
use crate::scripting::CompiledScript;
use rhai::{Dynamic, Engine, Scope};
use serde::{Deserialize, Serialize};

/// Resource limits applied to every script run.
///
/// The operation cap is what keeps a runaway script from stalling its node:
/// once exceeded, evaluation fails with an error instead of looping forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 32,
            max_string_size: 1_000_000,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

/// The script engine for executing transformer scripts
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    limits: ScriptLimits,
}

impl ScriptEngine {
    /// Create a new script engine with default limits
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    pub fn with_limits(limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, &limits);
        Self { engine, limits }
    }

    /// Configure the Rhai engine with helper functions and safety limits
    fn configure_engine(engine: &mut Engine, limits: &ScriptLimits) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        engine.register_fn("now", || -> i64 { chrono::Utc::now().timestamp() });

        engine.register_fn("op_type", |s: &str| -> String {
            OpType::parse(s).as_str().to_string()
        });

        engine.register_fn("has", |map: &mut rhai::Map, key: &str| -> bool {
            map.contains_key(key)
        });

        // Route script `print`/`debug` into tracing instead of stdout
        engine.on_print(|text| tracing::info!(target: "datapipe_rs::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(
                target: "datapipe_rs::script",
                "{} @ {:?} {:?}",
                text,
                source,
                pos
            )
        });
    }

    /// Compile a script
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledScript> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| DataPipeError::Script(format!("Compilation error in '{}': {}", name, e)))?;
        Ok(CompiledScript::new(name, ast))
    }

    /// Run a compiled script with `scope` and return whatever it evaluates to
    pub fn run(&self, script: &CompiledScript, scope: &mut Scope) -> Result<Dynamic> {
        self.engine
            .eval_ast_with_scope::<Dynamic>(scope, script.ast())
            .map_err(DataPipeError::from_rhai_error)
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
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_and_run() {
        let engine = ScriptEngine::new();
        let script = engine.compile("add", "x + 1").unwrap();
        let mut scope = Scope::new();
        scope.push("x", 41_i64);
        let result = engine.run(&script, &mut scope).unwrap();
        assert_eq!(result.as_int().unwrap(), 42);
    }

    #[test]
    fn test_compile_error() {
        let engine = ScriptEngine::new();
        let err = engine.compile("bad", "let = ;").unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(engine.compile("ok", "1 + 1").is_ok());
    }

    #[test]
    fn test_op_type_helper() {
        let engine = ScriptEngine::new();
        let script = engine.compile("op", r#"op_type("ins") + "," + op_type("x")"#).unwrap();
        let result = engine.run(&script, &mut Scope::new()).unwrap();
        assert_eq!(result.into_string().unwrap(), "insert,unknown");
    }

    #[test]
    fn test_runaway_script_is_cut_off() {
        let engine = ScriptEngine::with_limits(ScriptLimits {
            max_operations: 1_000,
            ..Default::default()
        });
        let script = engine.compile("spin", "loop { }").unwrap();
        assert!(engine.run(&script, &mut Scope::new()).is_err());
    }

    #[test]
    fn test_now_is_positive() {
        let engine = ScriptEngine::new();
        let script = engine.compile("now", "now()").unwrap();
        assert!(engine.run(&script, &mut Scope::new()).unwrap().as_int().unwrap() > 0);
    }
}
