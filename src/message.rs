//! The unit of data flowing through a pipeline.
//!
//! A [`Message`] is created once by a producer (a source adaptor or a
//! transformer) and then only moves: each pipeline stage owns the message it
//! is working on, and broadcast fan-out hands every listener its own copy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Payload document: field name to arbitrary JSON value.
pub type Document = serde_json::Map<String, Value>;

/// The operation a message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Insert,
    Update,
    Delete,
    Command,
    Unknown,
}

impl OpType {
    pub const ALL: [OpType; 5] = [
        OpType::Insert,
        OpType::Update,
        OpType::Delete,
        OpType::Command,
        OpType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Insert => "insert",
            OpType::Update => "update",
            OpType::Delete => "delete",
            OpType::Command => "command",
            OpType::Unknown => "unknown",
        }
    }

    /// Parse an op type from its first character.
    ///
    /// Only the leading byte is inspected: `"insertish"` is an Insert and
    /// `"Insert"` is Unknown. Kept for wire compatibility; do not rely on it
    /// to validate input.
    pub fn parse(s: &str) -> OpType {
        match s.as_bytes().first() {
            Some(b'i') => OpType::Insert,
            Some(b'u') => OpType::Update,
            Some(b'd') => OpType::Delete,
            Some(b'c') => OpType::Command,
            _ => OpType::Unknown,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(OpType::parse(s))
    }
}

/// Commands carried by `OpType::Command` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    /// The sink must flush any buffered writes now.
    Flush,
}

/// What a message carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Document(Document),
    Command(CommandType),
}

/// A single record moving through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    op: OpType,
    timestamp: i64,
    namespace: String,
    payload: Payload,
}

impl Message {
    /// Create a data message stamped with the current time.
    pub fn new(op: OpType, namespace: impl Into<String>, document: Document) -> Self {
        Self::with_timestamp(op, namespace, document, chrono::Utc::now().timestamp())
    }

    /// Create a data message with an explicit timestamp (seconds since epoch).
    pub fn with_timestamp(
        op: OpType,
        namespace: impl Into<String>,
        document: Document,
        timestamp: i64,
    ) -> Self {
        Self {
            id: extract_id(&document),
            op,
            timestamp,
            namespace: namespace.into(),
            payload: Payload::Document(document),
        }
    }

    /// Create a command message.
    pub fn command(command: CommandType, namespace: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            op: OpType::Command,
            timestamp: chrono::Utc::now().timestamp(),
            namespace: namespace.into(),
            payload: Payload::Command(command),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn op(&self) -> OpType {
        self.op
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The document, or `None` for command messages.
    pub fn document(&self) -> Option<&Document> {
        match &self.payload {
            Payload::Document(doc) => Some(doc),
            Payload::Command(_) => None,
        }
    }

    pub fn command_type(&self) -> Option<CommandType> {
        match self.payload {
            Payload::Command(cmd) => Some(cmd),
            Payload::Document(_) => None,
        }
    }

    /// Derive a new message that keeps this message's id, op, namespace and
    /// timestamp but carries `document`.
    pub fn derive(&self, document: Document) -> Self {
        Self {
            id: self.id.clone(),
            op: self.op,
            timestamp: self.timestamp,
            namespace: self.namespace.clone(),
            payload: Payload::Document(document),
        }
    }

    pub fn set_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn set_op(mut self, op: OpType) -> Self {
        self.op = op;
        self
    }

    pub fn set_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn set_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Pull an identifier out of a record: the `_id` field, falling back to `id`.
/// Strings are used as-is, anything else as its JSON text.
pub fn extract_id(document: &Document) -> String {
    match document.get("_id").or_else(|| document.get("id")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
