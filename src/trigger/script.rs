//! ScriptTrigger: episode boundaries from Rhai expressions.
//!
//! While idle, `start_when` is evaluated on every frame; a true result starts
//! an episode with that frame. While triggered, `stop_when` is evaluated; a
//! true result closes the episode and the frame is not included. Any other
//! frame is appended to the live episode.
//!
//! An evaluation error counts as `false` and is logged, so a frame missing
//! an attribute never stalls the ingestor.

use crate::episode::BacklogPolicy;
use crate::error::Result;
use crate::scripting::{CompiledExpression, EvalContext, ExpressionEngine};
use crate::trigger::bypass::default_sources;
use crate::trigger::{Trigger, TriggerCore};
use crate::types::{Payload, SourceKind, UserData};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Configuration options for [`ScriptTrigger`]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptTriggerOptions {
    /// Evaluated while idle; `true` starts an episode
    pub start_when: String,
    /// Evaluated while triggered; `true` ends the episode.
    /// Defaults to `!(start_when)`.
    #[serde(default)]
    pub stop_when: Option<String>,
    /// Integer expression evaluated per frame; `()` or absent means `-1`
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default = "default_sources")]
    pub sources: BTreeSet<SourceKind>,
}

pub struct ScriptTrigger {
    core: TriggerCore,
    engine: Arc<ExpressionEngine>,
    start_when: CompiledExpression,
    stop_when: CompiledExpression,
    user_data: Option<CompiledExpression>,
    sources: BTreeSet<SourceKind>,
}

impl ScriptTrigger {
    pub fn new(
        name: impl Into<String>,
        backlog: BacklogPolicy,
        engine: Arc<ExpressionEngine>,
        options: ScriptTriggerOptions,
    ) -> Result<Self> {
        let name = name.into();
        let start_when = engine.compile(&format!("{name}.start_when"), &options.start_when)?;
        let stop_source = options
            .stop_when
            .unwrap_or_else(|| format!("!({})", options.start_when));
        let stop_when = engine.compile(&format!("{name}.stop_when"), &stop_source)?;
        let user_data = options
            .user_data
            .as_deref()
            .map(|src| engine.compile(&format!("{name}.user_data"), src))
            .transpose()?;

        Ok(Self {
            core: TriggerCore::new(name, backlog),
            engine,
            start_when,
            stop_when,
            user_data,
            sources: options.sources,
        })
    }

    fn check(&self, expr: &CompiledExpression, ctx: &EvalContext<'_>) -> bool {
        match self.engine.eval_bool(expr, ctx) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Trigger '{}': {}", self.name(), e);
                false
            }
        }
    }

    fn user_data_for(&self, ctx: &EvalContext<'_>) -> UserData {
        let Some(expr) = &self.user_data else {
            return -1;
        };
        match self.engine.eval_int(expr, ctx) {
            Ok(value) => value.unwrap_or(-1),
            Err(e) => {
                tracing::warn!("Trigger '{}': {}", self.name(), e);
                -1
            }
        }
    }
}

impl Trigger for ScriptTrigger {
    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn supported_sources(&self) -> BTreeSet<SourceKind> {
        self.sources.clone()
    }

    fn on_data(&self, source: &str, payload: Payload) {
        let triggered = self.core.is_triggered();
        let ctx = EvalContext::for_trigger(&payload, source, triggered);

        if !triggered {
            if self.check(&self.start_when, &ctx) {
                let user_data = self.user_data_for(&ctx);
                self.core.send_start(payload, user_data);
            }
        } else if self.check(&self.stop_when, &ctx) {
            self.core.send_stop();
        } else {
            let user_data = self.user_data_for(&ctx);
            self.core.send_data(payload, user_data);
        }
    }
}
