//! File adaptor: JSON documents in, JSON lines out.
//!
//! - `uri = "file:///path/to/input.json"` as a source reads a stream of JSON
//!   objects (whitespace or newline separated) and emits one Insert per object.
//! - `uri = "file:///path/to/out.json"` as a sink truncates the file and writes
//!   each document as a single JSON line.
//! - `uri = "stdout://"` as a sink writes to standard output.
//!
//! A `Command(Flush)` message flushes the sink's buffered writer.

use crate::adaptor::{Adaptor, AdaptorContext, Description, Role};
use crate::message::{CommandType, Document, Message, OpType};
use crate::pipeline::{Pipe, PipelineError, PipelineResult};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

const FILE_SCHEME: &str = "file://";
const STDOUT_URI: &str = "stdout://";

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub uri: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Stdout,
    Path(PathBuf),
}

pub struct FileAdaptor {
    name: String,
    uri: String,
    namespace: String,
    target: Target,
    reader: Option<BufReader<File>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl FileAdaptor {
    pub fn new(name: impl Into<String>, config: FileConfig) -> PipelineResult<Self> {
        let name = name.into();
        let target = if config.uri == STDOUT_URI {
            Target::Stdout
        } else if let Some(path) = config.uri.strip_prefix(FILE_SCHEME) {
            if path.is_empty() {
                return Err(PipelineError::Construction {
                    node: name,
                    message: format!("empty file path in uri '{}'", config.uri),
                });
            }
            Target::Path(PathBuf::from(path))
        } else {
            return Err(PipelineError::Construction {
                node: name,
                message: format!(
                    "unsupported uri '{}', expected file:// or stdout://",
                    config.uri
                ),
            });
        };

        let namespace = config.namespace.unwrap_or_else(|| config.uri.clone());
        Ok(Self {
            name,
            uri: config.uri,
            namespace,
            target,
            reader: None,
            writer: None,
        })
    }

    pub fn from_context(ctx: &AdaptorContext<'_>) -> PipelineResult<Self> {
        let config: FileConfig = ctx.config.construct(ctx.name)?;
        Self::new(ctx.name, config)
    }

    fn open_reader(&self) -> PipelineResult<BufReader<File>> {
        match &self.target {
            Target::Path(path) => Ok(BufReader::new(File::open(path)?)),
            Target::Stdout => Err(PipelineError::UnsupportedRole {
                kind: "file (stdout://)".into(),
                role: Role::Source.as_str(),
            }),
        }
    }

    fn open_writer(&mut self) -> PipelineResult<()> {
        let writer: Box<dyn Write + Send> = match &self.target {
            Target::Stdout => Box::new(std::io::stdout()),
            Target::Path(path) => Box::new(BufWriter::new(File::create(path)?)),
        };
        self.writer = Some(writer);
        Ok(())
    }

    fn dump(&mut self, msg: Message) -> PipelineResult<Option<Message>> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::Adaptor("file sink is not open".into()))?;

        match msg.command_type() {
            Some(CommandType::Flush) => writer.flush()?,
            None => {
                if let Some(doc) = msg.document() {
                    serde_json::to_writer(&mut *writer, doc)?;
                    writer.write_all(b"\n")?;
                }
            }
        }
        Ok(Some(msg))
    }
}

impl Adaptor for FileAdaptor {
    fn open(&mut self, role: Role) -> PipelineResult<()> {
        match role {
            Role::Source => self.reader = Some(self.open_reader()?),
            Role::Sink => self.open_writer()?,
        }
        Ok(())
    }

    fn drive(&mut self, pipe: &mut Pipe) -> PipelineResult<()> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => self.open_reader()?,
        };
        let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Document>();
        let mut count = 0u64;
        for doc in stream {
            let doc = doc?;
            pipe.send(Message::new(OpType::Insert, self.namespace.clone(), doc))?;
            count += 1;
        }
        tracing::debug!("File source '{}' read {} documents from {}", self.name, count, self.uri);
        Ok(())
    }

    fn consume(&mut self, pipe: &mut Pipe) -> PipelineResult<()> {
        if self.writer.is_none() {
            self.open_writer()?;
        }
        pipe.listen(|msg| self.dump(msg))
    }

    fn stop(&mut self) -> PipelineResult<()> {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn describe(&self) -> Description {
        Description {
            name: self.name.clone(),
            kind: "file".into(),
            namespace: self.namespace.clone(),
            uri: self.uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn config(uri: &str) -> FileConfig {
        FileConfig {
            uri: uri.to_string(),
            namespace: None,
        }
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let result = FileAdaptor::new("f", config("mongodb://localhost/db"));
        assert!(matches!(result, Err(PipelineError::Construction { .. })));
        assert!(FileAdaptor::new("f", config("file://")).is_err());
    }

    #[test]
    fn test_namespace_defaults_to_uri() {
        let adaptor = FileAdaptor::new("f", config("stdout://")).unwrap();
        assert_eq!(adaptor.describe().namespace, "stdout://");
        assert_eq!(adaptor.describe().kind, "file");
    }

    #[test]
    fn test_open_fails_on_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let mut source =
            FileAdaptor::new("source", config(&format!("file://{}", missing.display()))).unwrap();
        assert!(matches!(source.open(Role::Source), Err(PipelineError::Io(_))));

        let mut stdout = FileAdaptor::new("out", config("stdout://")).unwrap();
        assert!(matches!(
            stdout.open(Role::Source),
            Err(PipelineError::UnsupportedRole { role: "source", .. })
        ));
        assert!(stdout.open(Role::Sink).is_ok());
    }

    #[test]
    fn test_source_reads_documents_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        std::fs::write(&input, "{\"a\":1}\n{\"a\":2}\n\n{\"a\":3}").unwrap();

        let mut source = FileAdaptor::new(
            "source",
            FileConfig {
                uri: format!("file://{}", input.display()),
                namespace: Some("db.coll".into()),
            },
        )
        .unwrap();

        let mut root = Pipe::new_root("source", Duration::ZERO, 8);
        let mut sink = Pipe::join(&mut root, "sink");
        source.drive(&mut root).unwrap();
        root.close_outbound();

        let mut seen = Vec::new();
        sink.listen(|m| {
            assert_eq!(m.namespace(), "db.coll");
            assert_eq!(m.op(), OpType::Insert);
            seen.push(m.document().unwrap()["a"].clone());
            Ok(None)
        })
        .unwrap();
        assert_eq!(seen, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_source_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.json");
        std::fs::write(&input, "{\"a\":1} not-json").unwrap();

        let mut source =
            FileAdaptor::new("source", config(&format!("file://{}", input.display()))).unwrap();
        let mut root = Pipe::new_root("source", Duration::ZERO, 8);
        let _sink = Pipe::join(&mut root, "sink");
        assert!(matches!(source.drive(&mut root), Err(PipelineError::Json(_))));
    }

    #[test]
    fn test_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.json");

        let mut root = Pipe::new_root("source", Duration::ZERO, 8);
        let mut pipe = Pipe::join(&mut root, "sink");
        for n in 1..=2 {
            let mut doc = Document::new();
            doc.insert("a".into(), json!(n));
            root.send(Message::new(OpType::Insert, "db.coll", doc)).unwrap();
        }
        root.send(Message::command(CommandType::Flush, "db.coll")).unwrap();
        root.close_outbound();

        let mut sink =
            FileAdaptor::new("sink", config(&format!("file://{}", output.display()))).unwrap();
        sink.consume(&mut pipe).unwrap();
        sink.stop().unwrap();
        sink.stop().unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written, "{\"a\":1}\n{\"a\":2}\n");
    }
}
