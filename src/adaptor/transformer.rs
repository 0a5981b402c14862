//! Script-driven transform stage.
//!
//! A transformer consumes its parent's messages, hands each one to an
//! [`Evaluator`] and forwards, drops or fails according to the [`Verdict`].
//! Messages are evaluated one at a time in arrival order. Command messages
//! bypass the evaluator so a `Flush` always reaches the sinks below.

use crate::adaptor::{Adaptor, AdaptorContext, Description};
use crate::message::Message;
use crate::pipeline::{Pipe, PipelineError, PipelineResult};
use crate::scripting::{builtins, RhaiEvaluator, ScriptLimits};
use serde::Deserialize;

/// Outcome of evaluating one message.
#[derive(Debug)]
pub enum Verdict {
    /// Forward this (possibly rewritten) message.
    Forward(Message),
    /// Suppress the message. Not an error.
    Drop,
    /// Stop the node and report the error.
    Fail(PipelineError),
}

/// Pluggable per-message transform logic.
pub trait Evaluator: Send {
    fn evaluate(&mut self, msg: &Message) -> Verdict;
}

impl<F> Evaluator for F
where
    F: FnMut(&Message) -> Verdict + Send,
{
    fn evaluate(&mut self, msg: &Message) -> Verdict {
        self(msg)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformerConfig {
    /// Path of a script file.
    #[serde(default)]
    pub filename: Option<String>,
    /// Inline script source, used when `filename` is absent.
    #[serde(default)]
    pub script: Option<String>,
    /// Name of a built-in script, used when neither of the above is set.
    #[serde(default)]
    pub builtin: Option<String>,
    /// Only messages in this namespace are evaluated; others pass through.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub max_operations: Option<u64>,
}

pub struct Transformer {
    name: String,
    source: String,
    namespace: Option<String>,
    evaluator: Box<dyn Evaluator>,
}

impl Transformer {
    pub fn with_evaluator(name: impl Into<String>, evaluator: Box<dyn Evaluator>) -> Self {
        Self {
            name: name.into(),
            source: String::new(),
            namespace: None,
            evaluator,
        }
    }

    pub fn from_context(ctx: &AdaptorContext<'_>) -> PipelineResult<Self> {
        let config: TransformerConfig = ctx.config.construct(ctx.name)?;

        let (label, source) = match (&config.filename, &config.script, &config.builtin) {
            (Some(path), _, _) => {
                let source = std::fs::read_to_string(path).map_err(|e| {
                    ctx.construction_error(format!("cannot read script '{}': {}", path, e))
                })?;
                (path.clone(), source)
            }
            (None, Some(script), _) => (ctx.name.to_string(), script.clone()),
            (None, None, Some(name)) => {
                let script = builtins::lookup(name).ok_or_else(|| {
                    ctx.construction_error(format!("unknown builtin script '{}'", name))
                })?;
                (format!("builtin:{}", name), script.to_string())
            }
            (None, None, None) => {
                return Err(ctx.construction_error(
                    "transformer needs `filename`, `script` or `builtin`",
                ))
            }
        };

        let mut limits = ScriptLimits::default();
        if let Some(max) = config.max_operations {
            limits.max_operations = max;
        }
        let evaluator = RhaiEvaluator::new(&label, &source, limits)
            .map_err(|e| ctx.construction_error(e.to_string()))?;

        Ok(Self {
            name: ctx.name.to_string(),
            source: label,
            namespace: config.namespace,
            evaluator: Box::new(evaluator),
        })
    }

    /// Restrict evaluation to one namespace.
    pub fn only_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn applies_to(&self, msg: &Message) -> bool {
        msg.command_type().is_none()
            && self
                .namespace
                .as_deref()
                .map_or(true, |ns| ns == msg.namespace())
    }

    fn transform(&mut self, msg: Message) -> PipelineResult<Option<Message>> {
        if !self.applies_to(&msg) {
            return Ok(Some(msg));
        }
        match self.evaluator.evaluate(&msg) {
            Verdict::Forward(out) => Ok(Some(out)),
            Verdict::Drop => {
                tracing::trace!("Transformer '{}' dropped message {}", self.name, msg.id());
                Ok(None)
            }
            Verdict::Fail(err) => Err(err),
        }
    }
}

impl Adaptor for Transformer {
    fn consume(&mut self, pipe: &mut Pipe) -> PipelineResult<()> {
        pipe.listen(|msg| self.transform(msg))
    }

    fn describe(&self) -> Description {
        Description {
            name: self.name.clone(),
            kind: "transformer".into(),
            namespace: self.namespace.clone().unwrap_or_default(),
            uri: self.source.clone(),
        }
    }
}
