//! Rhai-backed [`Evaluator`] for transformer nodes.

use crate::adaptor::{Evaluator, Verdict};
use crate::error::Result;
use crate::message::{Document, Message, OpType};
use crate::pipeline::PipelineError;
use crate::scripting::{CompiledScript, ScriptEngine, ScriptLimits};
use rhai::{Dynamic, Map, Scope};

/// Runs one compiled script against every message.
#[derive(Debug)]
pub struct RhaiEvaluator {
    engine: ScriptEngine,
    script: CompiledScript,
}

impl RhaiEvaluator {
    /// Compile `source` with the given limits.
    pub fn new(name: &str, source: &str, limits: ScriptLimits) -> Result<Self> {
        let engine = ScriptEngine::with_limits(limits);
        let script = engine.compile(name, source)?;
        Ok(Self { engine, script })
    }

    pub fn script(&self) -> &CompiledScript {
        &self.script
    }

    fn envelope(msg: &Message) -> std::result::Result<Map, PipelineError> {
        let data = match msg.document() {
            Some(doc) => rhai::serde::to_dynamic(doc)
                .map_err(|e| PipelineError::Script(format!("cannot expose document: {}", e)))?,
            None => Dynamic::from(Map::new()),
        };

        let mut map = Map::new();
        map.insert("id".into(), Dynamic::from(msg.id().to_string()));
        map.insert("ns".into(), Dynamic::from(msg.namespace().to_string()));
        map.insert("ts".into(), Dynamic::from(msg.timestamp()));
        map.insert("op".into(), Dynamic::from(msg.op().as_str().to_string()));
        map.insert("data".into(), data);
        Ok(map)
    }

    /// Turn the script's return value into a verdict on `msg`.
    fn interpret(msg: &Message, result: Dynamic) -> Verdict {
        if result.is_unit() {
            return Verdict::Drop;
        }
        if let Ok(flag) = result.as_bool() {
            return if flag { Verdict::Forward(msg.clone()) } else { Verdict::Drop };
        }
        if result.is_string() {
            let text = result.into_string().unwrap_or_default();
            if text.is_empty() {
                return Verdict::Drop;
            }
            return Verdict::Fail(PipelineError::Script(format!(
                "script returned a string ({:?}), expected a map",
                text
            )));
        }

        let type_name = result.type_name();
        let Some(map) = result.try_cast::<Map>() else {
            return Verdict::Fail(PipelineError::Script(format!(
                "script returned {}, expected a map",
                type_name
            )));
        };
        if map.is_empty() {
            return Verdict::Drop;
        }

        match Self::rebuild(msg, map) {
            Ok(out) => Verdict::Forward(out),
            Err(e) => Verdict::Fail(e),
        }
    }

    fn rebuild(msg: &Message, mut map: Map) -> std::result::Result<Message, PipelineError> {
        let mut out = match map.remove("data") {
            Some(data) => {
                let doc: Document = rhai::serde::from_dynamic(&data)
                    .map_err(|e| PipelineError::Script(format!("invalid `data`: {}", e)))?;
                msg.derive(doc)
            }
            None => msg.clone(),
        };

        if let Some(id) = map.remove("id") {
            out = out.set_id(id.to_string());
        }
        if let Some(ns) = map.remove("ns") {
            out = out.set_namespace(ns.to_string());
        }
        if let Some(op) = map.remove("op") {
            let op = OpType::parse(&op.to_string());
            if op == OpType::Command {
                return Err(PipelineError::Script(
                    "`op` cannot turn a document into a command".into(),
                ));
            }
            out = out.set_op(op);
        }
        if let Some(ts) = map.remove("ts") {
            let ts = ts
                .as_int()
                .map_err(|t| PipelineError::Script(format!("`ts` must be an integer, got {}", t)))?;
            out = out.set_timestamp(ts);
        }
        Ok(out)
    }
}

impl Evaluator for RhaiEvaluator {
    fn evaluate(&mut self, msg: &Message) -> Verdict {
        let envelope = match Self::envelope(msg) {
            Ok(envelope) => envelope,
            Err(e) => return Verdict::Fail(e),
        };

        let mut scope = Scope::new();
        scope.push("msg", envelope);
        match self.engine.run(&self.script, &mut scope) {
            Ok(result) => Self::interpret(msg, result),
            Err(e) => Verdict::Fail(PipelineError::Script(format!(
                "'{}': {}",
                self.script.name(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::builtins;
    use serde_json::json;

    fn evaluator(source: &str) -> RhaiEvaluator {
        RhaiEvaluator::new("test", source, ScriptLimits::default()).unwrap()
    }

    fn message() -> Message {
        let doc = match json!({"_id": "k1", "a": 1, "b": "x"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        Message::with_timestamp(OpType::Insert, "db.coll", doc, 1_700_000_000)
    }

    #[test]
    fn test_passthrough_keeps_message() {
        let msg = message();
        match evaluator(builtins::PASSTHROUGH).evaluate(&msg) {
            Verdict::Forward(out) => assert_eq!(out, msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_data_replaces_document() {
        let msg = message();
        let verdict = evaluator("msg.data.a += 10; msg.data.remove(\"b\"); msg").evaluate(&msg);
        let Verdict::Forward(out) = verdict else {
            panic!("expected forward");
        };
        assert_eq!(out.document().unwrap()["a"], json!(11));
        assert!(out.document().unwrap().get("b").is_none());
        assert_eq!(out.id(), "k1");
        assert_eq!(out.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_envelope_overrides() {
        let msg = message();
        let verdict = evaluator(r#"#{ ns: "archive." + msg.ns, op: "update", ts: 5 }"#)
            .evaluate(&msg);
        let Verdict::Forward(out) = verdict else {
            panic!("expected forward");
        };
        assert_eq!(out.namespace(), "archive.db.coll");
        assert_eq!(out.op(), OpType::Update);
        assert_eq!(out.timestamp(), 5);
        assert_eq!(out.document(), msg.document());
    }

    #[test]
    fn test_falsy_results_drop() {
        let msg = message();
        for source in [builtins::DISCARD, "false", "\"\"", "#{}"] {
            assert!(
                matches!(evaluator(source).evaluate(&msg), Verdict::Drop),
                "{} should drop",
                source
            );
        }
    }

    #[test]
    fn test_runtime_error_fails() {
        let msg = message();
        assert!(matches!(
            evaluator("throw \"nope\"").evaluate(&msg),
            Verdict::Fail(PipelineError::Script(_))
        ));
        assert!(matches!(
            evaluator("42").evaluate(&msg),
            Verdict::Fail(PipelineError::Script(_))
        ));
    }

    #[test]
    fn test_inserts_only_builtin() {
        let mut inserts_only = evaluator(builtins::INSERTS_ONLY);
        assert!(matches!(inserts_only.evaluate(&message()), Verdict::Forward(_)));

        let update = message().set_op(OpType::Update);
        assert!(matches!(inserts_only.evaluate(&update), Verdict::Drop));
    }

    #[test]
    fn test_command_override_is_rejected() {
        let msg = message();
        for source in [r#"#{ op: "command" }"#, r#"#{ op: "c", data: msg.data }"#] {
            match evaluator(source).evaluate(&msg) {
                Verdict::Fail(PipelineError::Script(reason)) => {
                    assert!(reason.contains("command"), "{}", reason)
                }
                other => panic!("{} gave {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_compile_error() {
        assert!(RhaiEvaluator::new("bad", "let = ;", ScriptLimits::default()).is_err());
    }
}
