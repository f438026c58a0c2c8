//! Classifier driven by a Rhai expression.
//!
//! `class_when` is evaluated per sample and yields a class id, or `()` for
//! "nothing here". A positive id produces one detection covering the whole
//! frame, sized by the frame's `width`/`height` attributes when present.

use crate::classifier::Classifier;
use crate::error::{PipelineError, Result, ResultExt};
use crate::scripting::{CompiledExpression, EvalContext, ExpressionEngine};
use crate::types::{Detection, Frame, Point, UserData};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptClassifierOptions {
    pub class_when: String,
}

pub struct ScriptClassifier {
    name: String,
    engine: Arc<ExpressionEngine>,
    class_when: CompiledExpression,
}

impl ScriptClassifier {
    pub fn new(
        name: impl Into<String>,
        engine: Arc<ExpressionEngine>,
        options: ScriptClassifierOptions,
    ) -> Result<Self> {
        let name = name.into();
        let class_when = engine.compile(&format!("{name}.class_when"), &options.class_when)?;
        Ok(Self {
            name,
            engine,
            class_when,
        })
    }
}

fn extent(frame: &Frame, key: &str) -> i32 {
    frame
        .attribute(key)
        .map_or(0, |v| v.clamp(0.0, i32::MAX as f64) as i32)
}

impl Classifier for ScriptClassifier {
    fn classify(
        &self,
        sample_index: u64,
        frame: &Frame,
        user_data: UserData,
    ) -> Result<Vec<Detection>> {
        let ctx = EvalContext::for_sample(frame, sample_index, user_data);
        let class = self
            .engine
            .eval_int(&self.class_when, &ctx)
            .context(format!("Classifier '{}'", self.name))?;

        match class {
            Some(id) if id > 0 => {
                let class_id = u32::try_from(id).map_err(|_| {
                    PipelineError::Classification(format!(
                        "Classifier '{}' produced out-of-range class id {}",
                        self.name, id
                    ))
                })?;
                Ok(vec![Detection::new(
                    class_id,
                    Point::new(0, 0),
                    Point::new(extent(frame, "width"), extent(frame, "height")),
                )])
            }
            _ => Ok(Vec::new()),
        }
    }
}
