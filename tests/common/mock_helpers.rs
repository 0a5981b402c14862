//! Recording adaptors and transports for pipeline tests
//!
//! [`Harness`] registers three adaptor kinds:
//! - `vec`: a source sending the harness documents as inserts, in order
//! - `endless`: a source sending inserts until its pipe is stopped
//! - `record`: a sink/transform that records and forwards every message;
//!   config `fail_at = N` makes it fail on the Nth message, `panic_at = N`
//!   panics instead, and `quit_after = N` ends its loop quietly after N

use datapipe_rs::adaptor::{Adaptor, AdaptorRegistry, Description, Role};
use datapipe_rs::message::{Document, Message, OpType};
use datapipe_rs::pipeline::{EventTransport, Pipe, PipelineError, PipelineResult};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Shared<T> = Arc<Mutex<T>>;

/// Ordered log of lifecycle calls, e.g. `open:sink`, `drive:source`.
#[derive(Clone, Default)]
pub struct Journal(Shared<Vec<String>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

struct VecSource {
    name: String,
    namespace: String,
    docs: Vec<Document>,
    journal: Journal,
}

impl Adaptor for VecSource {
    fn open(&mut self, role: Role) -> PipelineResult<()> {
        self.journal.push(format!("open:{}:{}", self.name, role.as_str()));
        Ok(())
    }

    fn drive(&mut self, pipe: &mut Pipe) -> PipelineResult<()> {
        self.journal.push(format!("drive:{}", self.name));
        for doc in &self.docs {
            pipe.send(Message::new(OpType::Insert, self.namespace.clone(), doc.clone()))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> PipelineResult<()> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }

    fn describe(&self) -> Description {
        Description {
            name: self.name.clone(),
            kind: "vec".into(),
            namespace: self.namespace.clone(),
            uri: String::new(),
        }
    }
}

struct EndlessSource {
    name: String,
    journal: Journal,
}

impl Adaptor for EndlessSource {
    fn drive(&mut self, pipe: &mut Pipe) -> PipelineResult<()> {
        self.journal.push(format!("drive:{}", self.name));
        let mut n = 0i64;
        loop {
            let mut doc = Document::new();
            doc.insert("n".into(), json!(n));
            pipe.send(Message::new(OpType::Insert, "endless", doc))?;
            n += 1;
        }
    }

    fn stop(&mut self) -> PipelineResult<()> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }

    fn describe(&self) -> Description {
        Description {
            name: self.name.clone(),
            kind: "endless".into(),
            ..Default::default()
        }
    }
}

struct RecordingSink {
    name: String,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
    quit_after: Option<usize>,
    received: Shared<BTreeMap<String, Vec<Message>>>,
    journal: Journal,
}

impl Adaptor for RecordingSink {
    fn open(&mut self, role: Role) -> PipelineResult<()> {
        self.journal.push(format!("open:{}:{}", self.name, role.as_str()));
        Ok(())
    }

    fn consume(&mut self, pipe: &mut Pipe) -> PipelineResult<()> {
        let mut count = 0;
        pipe.listen(|msg| {
            count += 1;
            if Some(count) == self.panic_at {
                panic!("{} blew up on message {}", self.name, count);
            }
            if self.quit_after.is_some_and(|n| count > n) {
                return Err(PipelineError::PipeClosed);
            }
            if Some(count) == self.fail_at {
                return Err(PipelineError::Adaptor(format!(
                    "{} failed on message {}",
                    self.name, count
                )));
            }
            self.received
                .lock()
                .unwrap()
                .entry(self.name.clone())
                .or_default()
                .push(msg.clone());
            Ok(Some(msg))
        })
    }

    fn stop(&mut self) -> PipelineResult<()> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }

    fn describe(&self) -> Description {
        Description {
            name: self.name.clone(),
            kind: "record".into(),
            ..Default::default()
        }
    }
}

/// Registry plus shared recordings for one test.
pub struct Harness {
    registry: AdaptorRegistry,
    journal: Journal,
    received: Shared<BTreeMap<String, Vec<Message>>>,
}

impl Harness {
    /// A harness whose `vec` source sends `docs` on `namespace`. The
    /// built-in `file` and `transformer` kinds are registered too.
    pub fn new(namespace: &str, docs: Vec<Document>) -> Self {
        let journal = Journal::default();
        let received: Shared<BTreeMap<String, Vec<Message>>> = Arc::default();
        let mut registry = AdaptorRegistry::with_builtins();

        let (j, ns) = (journal.clone(), namespace.to_string());
        registry.register("vec", move |ctx| {
            Ok(Box::new(VecSource {
                name: ctx.name.to_string(),
                namespace: ns.clone(),
                docs: docs.clone(),
                journal: j.clone(),
            }))
        });

        let j = journal.clone();
        registry.register("endless", move |ctx| {
            Ok(Box::new(EndlessSource {
                name: ctx.name.to_string(),
                journal: j.clone(),
            }))
        });

        let (j, r) = (journal.clone(), received.clone());
        registry.register("record", move |ctx| {
            let setting = |key: &str| {
                ctx.config
                    .get(key)
                    .and_then(|v| v.as_u64())
                    .map(|n| n as usize)
            };
            Ok(Box::new(RecordingSink {
                name: ctx.name.to_string(),
                fail_at: setting("fail_at"),
                panic_at: setting("panic_at"),
                quit_after: setting("quit_after"),
                received: r.clone(),
                journal: j.clone(),
            }))
        });

        Self {
            registry,
            journal,
            received,
        }
    }

    pub fn registry(&self) -> &AdaptorRegistry {
        &self.registry
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Messages the named `record` node accepted, in order
    pub fn received(&self, name: &str) -> Vec<Message> {
        self.received
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Integer `field` of each message the named node accepted
    pub fn values(&self, name: &str, field: &str) -> Vec<i64> {
        self.received(name)
            .iter()
            .filter_map(|m| m.document().and_then(|d| d.get(field)).and_then(|v| v.as_i64()))
            .collect()
    }
}

/// Transport that keeps every body it is asked to deliver.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    bodies: Shared<Vec<Vec<u8>>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .map(|b| serde_json::from_slice(b).unwrap())
            .collect()
    }
}

impl EventTransport for RecordingTransport {
    fn deliver(&self, body: &[u8]) -> PipelineResult<()> {
        self.bodies.lock().unwrap().push(body.to_vec());
        if self.fail {
            Err(PipelineError::Telemetry("endpoint returned 503".into()))
        } else {
            Ok(())
        }
    }
}
