//! Test data builders for documents and node trees

use datapipe_rs::message::Document;
use datapipe_rs::{AdaptorConfig, Node};
use serde_json::{json, Value};

/// Turn a `json!` object into a document
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// `{"a": 1}`, `{"a": 2}`, ... `{"a": n}`
pub fn numbered_docs(n: i64) -> Vec<Document> {
    (1..=n).map(|a| doc(json!({ "a": a }))).collect()
}

/// Builder for test nodes
pub struct NodeBuilder {
    name: String,
    kind: String,
    config: AdaptorConfig,
    children: Vec<Node>,
}

impl NodeBuilder {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            config: AdaptorConfig::new(),
            children: Vec::new(),
        }
    }

    pub fn config(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key, value);
        self
    }

    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn build(self) -> Node {
        let mut node = Node::new(self.name, self.kind, self.config);
        for child in self.children {
            node.attach(child);
        }
        node
    }
}

/// A node of kind `record` (see `mock_helpers::Harness`)
pub fn sink(name: &str) -> Node {
    NodeBuilder::new(name, "record").build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = NodeBuilder::new("source", "vec")
            .config("namespace", "db.coll")
            .child(sink("a"))
            .child(sink("b"))
            .build();

        assert_eq!(node.children().len(), 2);
        assert_eq!(node.config().get_str("namespace"), Some("db.coll"));
        assert_eq!(node.children()[1].parent(), Some("source"));
    }
}
