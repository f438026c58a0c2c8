//! Rhai expressions for configurable triggers and classifiers
//!
//! Script triggers decide episode boundaries, and script classifiers pick a
//! class id, by evaluating short Rhai expressions against the frame being
//! processed.
//!
//! ## Variables in scope
//!
//! - every frame attribute by name (`motion`, `brightness`, ...) as a float
//! - `attrs` - map of all attributes; `attrs["x"]` is `()` when absent
//! - `seq` - the source sequence number of the frame
//! - `source` - name of the ingestor (or upstream trigger) that produced it
//! - `triggered` - whether the evaluating trigger has a live episode
//! - `sample_index` / `user_data` - only when classifying
//!
//! ## Helper functions
//!
//! - `in_range(value, low, high)` - inclusive range check
//! - `deadband(value, center, width)` - `center` when within the band
//! - `hysteresis(value, active, low, high)` - stay active above `low`, activate above `high`
//!
//! ## Example
//!
//! ```rhai
//! // start on motion, keep going until it settles
//! hysteresis(motion, triggered, 0.2, 0.6)
//! ```

mod engine;

pub use engine::{EvalContext, ExpressionEngine};

use crate::error::{PipelineError, Result};
use rhai::{Engine, AST};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A compiled expression that can be evaluated repeatedly
#[derive(Clone)]
pub struct CompiledExpression {
    ast: Arc<AST>,
    source: String,
    name: String,
}

impl CompiledExpression {
    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }

    /// Get the source code of this expression
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the name of this expression
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled expressions, keyed by source text
#[derive(Default)]
pub struct ExpressionCache {
    cache: HashMap<String, CompiledExpression>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached expression or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        name: &str,
        source: &str,
    ) -> Result<CompiledExpression> {
        if let Some(expr) = self.cache.get(source) {
            return Ok(expr.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| PipelineError::Script(format!("Compilation of '{}' failed: {}", name, e)))?;

        let expr = CompiledExpression {
            ast: Arc::new(ast),
            source: source.to_string(),
            name: name.to_string(),
        };

        self.cache.insert(source.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Thread-safe expression cache wrapper
pub type SharedExpressionCache = Arc<RwLock<ExpressionCache>>;

/// Create a new shared expression cache
pub fn create_shared_cache() -> SharedExpressionCache {
    Arc::new(RwLock::new(ExpressionCache::new()))
}

pub(crate) fn write_cache(
    cache: &SharedExpressionCache,
) -> std::sync::RwLockWriteGuard<'_, ExpressionCache> {
    cache.write().unwrap_or_else(PoisonError::into_inner)
}
