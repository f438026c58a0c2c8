//! Rhai expression engine implementation
//!
//! One [`ExpressionEngine`] is shared by every script trigger and script
//! classifier built from the same registry. The engine is sandboxed with
//! operation and size limits so that a runaway expression fails the one
//! frame it was evaluated on instead of stalling an ingestor thread.

use crate::error::{PipelineError, Result, ResultExt};
use crate::scripting::{write_cache, CompiledExpression, SharedExpressionCache};
use crate::types::{Frame, UserData};
use rhai::{Dynamic, Engine, Map, Scope};

/// Values exposed to an expression besides the frame attributes
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub frame: &'a Frame,
    pub source: &'a str,
    pub triggered: bool,
    /// Set when evaluating a classifier expression
    pub sample: Option<(u64, UserData)>,
}

impl<'a> EvalContext<'a> {
    /// Context for a trigger deciding on an incoming frame
    pub fn for_trigger(frame: &'a Frame, source: &'a str, triggered: bool) -> Self {
        Self {
            frame,
            source,
            triggered,
            sample: None,
        }
    }

    /// Context for a classifier looking at one episode sample
    pub fn for_sample(frame: &'a Frame, sample_index: u64, user_data: UserData) -> Self {
        Self {
            frame,
            source: "",
            triggered: true,
            sample: Some((sample_index, user_data)),
        }
    }

    fn scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        let mut attrs = Map::new();
        for (key, value) in &self.frame.attributes {
            scope.push_constant(key.clone(), *value);
            attrs.insert(key.as_str().into(), Dynamic::from_float(*value));
        }
        scope.push_constant("attrs", attrs);
        scope.push_constant("seq", self.frame.source_seq as i64);
        scope.push_constant("source", self.source.to_string());
        scope.push_constant("triggered", self.triggered);
        if let Some((sample_index, user_data)) = self.sample {
            scope.push_constant("sample_index", sample_index as i64);
            scope.push_constant("user_data", user_data);
        }
        scope
    }
}

/// Sandboxed Rhai engine plus a shared compile cache
pub struct ExpressionEngine {
    engine: Engine,
    cache: SharedExpressionCache,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self::with_cache(crate::scripting::create_shared_cache())
    }

    /// Create an engine that shares compiled expressions with others
    pub fn with_cache(cache: SharedExpressionCache) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine, cache }
    }

    fn configure_engine(engine: &mut Engine) {
        // Set safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(16);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(4_096);
        engine.set_max_array_size(256);
        engine.set_max_map_size(256);

        engine.register_fn("in_range", |value: f64, low: f64, high: f64| -> bool {
            value >= low && value <= high
        });

        engine.register_fn("deadband", |value: f64, center: f64, width: f64| -> f64 {
            if (value - center).abs() < width / 2.0 {
                center
            } else {
                value
            }
        });

        // Two-threshold switch: once active, stay active until `value` drops to `low`
        engine.register_fn(
            "hysteresis",
            |value: f64, active: bool, low: f64, high: f64| -> bool {
                if active {
                    value > low
                } else {
                    value >= high
                }
            },
        );

        engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
        engine.register_fn("to_int", |x: f64| x as i64);
        engine.register_fn("to_float", |x: i64| x as f64);
    }

    /// Compile an expression, reusing a cached AST for identical source
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledExpression> {
        if source.trim().is_empty() {
            return Err(PipelineError::Script(format!("Expression '{}' is empty", name)));
        }
        write_cache(&self.cache).get_or_compile(&self.engine, name, source)
    }

    /// Evaluate an expression that must produce a boolean
    pub fn eval_bool(&self, expr: &CompiledExpression, ctx: &EvalContext<'_>) -> Result<bool> {
        let mut scope = ctx.scope();
        self.engine
            .eval_ast_with_scope::<bool>(&mut scope, expr.ast())
            .with_context(|| format!("Evaluating '{}'", expr.name()))
    }

    /// Evaluate an expression that produces an integer, a float, or `()` for "none"
    pub fn eval_int(
        &self,
        expr: &CompiledExpression,
        ctx: &EvalContext<'_>,
    ) -> Result<Option<i64>> {
        let mut scope = ctx.scope();
        let value = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, expr.ast())
            .with_context(|| format!("Evaluating '{}'", expr.name()))?;

        if value.is_unit() {
            return Ok(None);
        }
        if let Ok(int) = value.as_int() {
            return Ok(Some(int));
        }
        if let Ok(float) = value.as_float() {
            return Ok(Some(float.round() as i64));
        }
        Err(PipelineError::Script(format!(
            "Expression '{}' returned {}, expected an integer",
            expr.name(),
            value.type_name()
        )))
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(motion: f64) -> Frame {
        Frame::new("f", 7, vec![]).with_attribute("motion", motion)
    }

    #[test]
    fn test_bool_expression_sees_attributes() {
        let engine = ExpressionEngine::new();
        let expr = engine.compile("start", "motion > 0.5 && seq == 7").unwrap();

        let high = frame(0.9);
        let low = frame(0.1);
        assert!(engine.eval_bool(&expr, &EvalContext::for_trigger(&high, "cam", false)).unwrap());
        assert!(!engine.eval_bool(&expr, &EvalContext::for_trigger(&low, "cam", false)).unwrap());
    }

    #[test]
    fn test_hysteresis_uses_triggered_flag() {
        let engine = ExpressionEngine::new();
        let expr = engine
            .compile("gate", "hysteresis(motion, triggered, 0.2, 0.6)")
            .unwrap();
        let mid = frame(0.4);

        assert!(!engine.eval_bool(&expr, &EvalContext::for_trigger(&mid, "cam", false)).unwrap());
        assert!(engine.eval_bool(&expr, &EvalContext::for_trigger(&mid, "cam", true)).unwrap());
    }

    #[test]
    fn test_missing_attribute_via_map_is_unit() {
        let engine = ExpressionEngine::new();
        let expr = engine.compile("probe", "type_of(attrs[\"angle\"]) == \"()\"").unwrap();
        let f = frame(0.0);
        assert!(engine.eval_bool(&expr, &EvalContext::for_trigger(&f, "cam", false)).unwrap());
    }

    #[test]
    fn test_eval_int_variants() {
        let engine = ExpressionEngine::new();
        let f = frame(0.8);
        let ctx = EvalContext::for_sample(&f, 3, -1);

        let int_expr = engine.compile("a", "if motion > 0.5 { 2 } else { () }").unwrap();
        assert_eq!(engine.eval_int(&int_expr, &ctx).unwrap(), Some(2));

        let float_expr = engine.compile("b", "motion * 10.0").unwrap();
        assert_eq!(engine.eval_int(&float_expr, &ctx).unwrap(), Some(8));

        let unit_expr = engine.compile("c", "()").unwrap();
        assert_eq!(engine.eval_int(&unit_expr, &ctx).unwrap(), None);

        let idx_expr = engine.compile("d", "sample_index + user_data").unwrap();
        assert_eq!(engine.eval_int(&idx_expr, &ctx).unwrap(), Some(2));
    }

    #[test]
    fn test_compile_errors_are_script_errors() {
        let engine = ExpressionEngine::new();
        assert!(matches!(
            engine.compile("bad", "motion >"),
            Err(PipelineError::Script(_))
        ));
        assert!(engine.compile("empty", "   ").is_err());
    }

    #[test]
    fn test_cache_reuses_identical_source() {
        let cache = crate::scripting::create_shared_cache();
        let engine = ExpressionEngine::with_cache(cache.clone());
        engine.compile("a", "motion > 0.1").unwrap();
        engine.compile("b", "motion > 0.1").unwrap();
        assert_eq!(cache.read().unwrap().len(), 1);
    }
}
