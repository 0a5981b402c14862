//! Rhai Scripting Engine for Transformers
//!
//! Transformer nodes run a user script once per message. The script sees a
//! single variable, `msg`, holding the message envelope:
//!
//! - `msg.id` - Record identifier (string, may be empty)
//! - `msg.ns` - Namespace the record came from
//! - `msg.ts` - Creation time in seconds since the Unix epoch
//! - `msg.op` - `"insert"`, `"update"`, `"delete"` or `"unknown"`
//! - `msg.data` - The document as a Rhai object map
//!
//! ## Results
//!
//! - A map: forwarded. `data` replaces the document; `id`, `ns`, `op` and
//!   `ts` override the envelope when present. Missing keys keep the original.
//!   `op` may not name a command.
//! - `()`, `false`, `""` or `#{}`: the message is dropped.
//! - A runtime error: the node fails and the pipeline shuts down.
//!
//! ## Example Scripts
//!
//! Rename a field:
//! ```rhai
//! msg.data.full_name = msg.data.first + " " + msg.data.last;
//! msg.data.remove("first");
//! msg.data.remove("last");
//! msg
//! ```
//!
//! Keep only inserts:
//! ```rhai
//! if msg.op == "insert" { msg } else { () }
//! ```
//!
//! Route to another namespace:
//! ```rhai
//! #{ ns: "archive." + msg.ns }
//! ```

mod engine;
mod evaluator;

pub use engine::{ScriptEngine, ScriptLimits};
pub use evaluator::RhaiEvaluator;

use rhai::AST;

/// A compiled script that can be executed repeatedly
#[derive(Clone)]
pub struct CompiledScript {
    /// The compiled AST
    ast: AST,
    /// Name/identifier for this script (file name or node name)
    name: String,
}

impl CompiledScript {
    fn new(name: &str, ast: AST) -> Self {
        Self {
            ast,
            name: name.to_string(),
        }
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    /// Get the name of this script
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("name", &self.name)
            .finish()
    }
}

/// Built-in transformer scripts
pub mod builtins {
    /// Forward every message unchanged
    pub const PASSTHROUGH: &str = "msg";

    /// Drop every message
    pub const DISCARD: &str = "()";

    /// Forward only insert operations
    pub const INSERTS_ONLY: &str = r#"
if msg.op == "insert" { msg } else { () }
"#;

    /// Look up a built-in script by its config name.
    pub fn lookup(name: &str) -> Option<&'static str> {
        match name {
            "passthrough" => Some(PASSTHROUGH),
            "discard" => Some(DISCARD),
            "inserts_only" => Some(INSERTS_ONLY),
            _ => None,
        }
    }
}
