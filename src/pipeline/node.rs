//! Pipeline tree vertices.
//!
//! A [`Node`] owns its children, one [`Pipe`] and one adaptor instance. The
//! tree is assembled with [`Node::attach`], wired with [`Node::init`] and run
//! with [`Node::start`]:
//!
//! - every node runs on its own scoped thread (the root on the caller's);
//! - a node signals ready once its adaptor is open and all of its children
//!   are ready, so the root only starts driving when the whole tree is;
//! - when a node's loop ends it closes its outbound path, joins its children,
//!   stops its adaptor exactly once and reports any failure on the shared
//!   error channel. A panicking adaptor counts as a failure.
//!
//! [`Node::stop`] may be called from any thread while the tree runs; it goes
//! through the [`TreeHandle`] collected at init.

use crate::adaptor::{Adaptor, AdaptorConfig, AdaptorContext, AdaptorRegistry, Description, Role};
use crate::config::EngineConfig;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::event::Endpoints;
use crate::pipeline::pipe::{Pipe, PipeContext, PipeHandle};
use crossbeam_channel::{unbounded, Sender};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

pub struct Node {
    name: String,
    kind: String,
    config: AdaptorConfig,
    children: Vec<Node>,
    /// Name of the parent node. Never owning.
    parent: Option<String>,
    depth: usize,
    pipe: Option<Pipe>,
    adaptor: Option<Box<dyn Adaptor>>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, config: AdaptorConfig) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config,
            children: Vec::new(),
            parent: None,
            depth: 0,
            pipe: None,
            adaptor: None,
        }
    }

    /// Append `child` and make this node its parent.
    pub fn attach(&mut self, mut child: Node) -> &mut Self {
        child.parent = Some(self.name.clone());
        child.set_depth(self.depth + 1);
        self.children.push(child);
        self
    }

    /// Builder form of [`Node::attach`].
    pub fn with_child(mut self, child: Node) -> Self {
        self.attach(child);
        self
    }

    fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
        for child in &mut self.children {
            child.set_depth(depth + 1);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn config(&self) -> &AdaptorConfig {
        &self.config
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Number of ancestors; 0 for the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn pipe(&self) -> Option<&Pipe> {
        self.pipe.as_ref()
    }

    /// The tree-wide channels, once initialized.
    pub fn context(&self) -> Option<Arc<PipeContext>> {
        self.pipe.as_ref().map(|p| p.context().clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.pipe.is_some()
            && self.adaptor.is_some()
            && self.children.iter().all(Node::is_initialized)
    }

    pub fn describe(&self) -> Description {
        match &self.adaptor {
            Some(adaptor) => adaptor.describe(),
            None => Description {
                name: self.name.clone(),
                kind: self.kind.clone(),
                namespace: self.config.get_str("namespace").unwrap_or_default().to_string(),
                uri: self
                    .config
                    .get_str("uri")
                    .or_else(|| self.config.get_str("filename"))
                    .unwrap_or_default()
                    .to_string(),
            },
        }
    }

    /// Create pipes and adaptors for the whole tree, top-down. Must be called
    /// on the root; the first failure aborts and is returned.
    pub fn init(&mut self, registry: &AdaptorRegistry, engine: &EngineConfig) -> PipelineResult<()> {
        if !self.is_root() {
            return Err(PipelineError::NotRoot(self.name.clone()));
        }
        let pipe = Pipe::new_root(
            self.name.clone(),
            engine.api.metrics_interval(),
            engine.channel_capacity,
        );
        self.init_with(pipe, registry)
    }

    fn init_with(&mut self, mut pipe: Pipe, registry: &AdaptorRegistry) -> PipelineResult<()> {
        let adaptor = registry.create(&AdaptorContext {
            name: &self.name,
            kind: &self.kind,
            path: pipe.path(),
            config: &self.config,
        })?;
        tracing::debug!("Initialized node '{}' ({})", pipe.path(), self.kind);

        for child in &mut self.children {
            let child_pipe = Pipe::join(&mut pipe, child.name.clone());
            child.init_with(child_pipe, registry)?;
        }

        self.pipe = Some(pipe);
        self.adaptor = Some(adaptor);
        Ok(())
    }

    /// Run the tree. Returns once every node's loop has ended.
    ///
    /// Failures inside the tree are pushed onto the shared error channel
    /// rather than returned; the error here only covers not being able to
    /// start at all.
    pub fn start(&mut self) -> PipelineResult<()> {
        if !self.is_root() {
            return Err(PipelineError::NotRoot(self.name.clone()));
        }
        if !self.is_initialized() {
            return Err(PipelineError::NotInitialized(self.name.clone()));
        }
        thread::scope(|scope| self.run(scope, None))
    }

    fn run<'scope, 'env>(
        &'env mut self,
        scope: &'scope thread::Scope<'scope, 'env>,
        ready: Option<Sender<()>>,
    ) -> PipelineResult<()> {
        let Node {
            name,
            children,
            parent,
            pipe,
            adaptor,
            ..
        } = self;
        let (Some(pipe), Some(adaptor)) = (pipe.as_mut(), adaptor.as_mut()) else {
            return Err(PipelineError::NotInitialized(name.clone()));
        };
        let path = pipe.path().to_string();
        let role = if parent.is_none() { Role::Source } else { Role::Sink };

        let (ready_tx, ready_rx) = unbounded();
        let mut workers = Vec::with_capacity(children.len());
        let mut launched = Ok(());
        for child in children.iter_mut() {
            let child_ready = ready_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("node:{}", child.name))
                .spawn_scoped(scope, move || child.run(scope, Some(child_ready)));
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    launched = Err(PipelineError::Io(e));
                    break;
                }
            }
        }
        drop(ready_tx);

        let outcome = launched.and_then(|()| guarded(&path, || adaptor.open(role))).and_then(|()| {
            let ready_children = ready_rx.iter().take(workers.len()).count();
            if ready_children < workers.len() {
                tracing::warn!(
                    "Node '{}' not started: {} of {} children failed to start",
                    path,
                    workers.len() - ready_children,
                    workers.len()
                );
                return Ok(());
            }
            if let Some(ready) = ready {
                let _ = ready.send(());
            }

            pipe.start_metrics();
            tracing::info!("Node '{}' running as {}", path, role.as_str());
            guarded(&path, || match role {
                Role::Source => adaptor.drive(pipe),
                Role::Sink => adaptor.consume(pipe),
            })
        });

        pipe.close_outbound();
        for worker in workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => pipe.report(e),
                Err(_) => pipe.report(PipelineError::Adaptor(format!(
                    "a child thread of '{}' panicked",
                    path
                ))),
            }
        }

        let released = guarded(&path, || adaptor.stop());
        pipe.stop();

        match (outcome, released) {
            (Err(e), released) if !e.is_shutdown() => {
                tracing::error!("Node '{}' failed: {}", path, e);
                if let Err(stop_err) = released {
                    tracing::warn!("Node '{}' also failed to stop: {}", path, stop_err);
                }
                pipe.report(e);
            }
            (_, Err(e)) => {
                tracing::error!("Node '{}' failed to stop: {}", path, e);
                pipe.report(e);
            }
            _ => tracing::info!("Node '{}' stopped", path),
        }
        Ok(())
    }

    /// Signal every pipe in the tree to stop. Safe to call repeatedly and
    /// from other threads via [`Node::handles`].
    pub fn stop(&self) {
        self.handles().stop();
    }

    /// Stop switches for every initialized pipe, root first.
    pub fn handles(&self) -> TreeHandle {
        let mut handles = Vec::new();
        self.collect_handles(&mut handles);
        TreeHandle { handles }
    }

    fn collect_handles(&self, out: &mut Vec<PipeHandle>) {
        if let Some(pipe) = &self.pipe {
            out.push(pipe.handle());
        }
        for child in &self.children {
            child.collect_handles(out);
        }
    }

    /// Every node in the subtree as name → type.
    pub fn endpoints(&self) -> Endpoints {
        let mut endpoints = Endpoints::new();
        self.collect_endpoints(&mut endpoints);
        endpoints
    }

    fn collect_endpoints(&self, out: &mut Endpoints) {
        out.insert(self.name.clone(), self.kind.clone());
        for child in &self.children {
            child.collect_endpoints(out);
        }
    }

    fn label(&self) -> &'static str {
        if self.is_root() {
            "- Source: "
        } else if self.children.is_empty() {
            "- Sink: "
        } else if self.kind == "transformer" {
            "- Transformer: "
        } else {
            "- Node: "
        }
    }

    fn fmt_rows(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = self.depth + 1;
        let prefix = format!("{}{}", " ".repeat(indent), self.label());
        let description = self.describe();
        write!(
            f,
            "\n{:<18} {:<40} {:<15} {:<30} {}",
            prefix, self.name, self.kind, description.namespace, description.uri
        )?;
        for child in &self.children {
            child.fmt_rows(f)?;
        }
        Ok(())
    }
}

/// Run one adaptor call, turning a panic into an error so the node still
/// releases its pipe and the failure reaches the error listener.
fn guarded<T>(path: &str, call: impl FnOnce() -> PipelineResult<T>) -> PipelineResult<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        Err(PipelineError::Adaptor(format!(
            "adaptor of '{}' panicked: {}",
            path, reason
        )))
    })
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<18} {:<40} {:<15} {:<30} Uri",
            "", "Name", "Type", "Namespace"
        )?;
        self.fmt_rows(f)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("depth", &self.depth)
            .field("children", &self.children)
            .field("initialized", &self.pipe.is_some())
            .finish()
    }
}

/// Cloneable stop switch for a whole tree.
#[derive(Debug, Clone, Default)]
pub struct TreeHandle {
    handles: Vec<PipeHandle>,
}

impl TreeHandle {
    /// Stop every pipe. Pipes already stopped are skipped.
    pub fn stop(&self) {
        let stopped = self.handles.iter().filter(|h| h.stop()).count();
        if stopped > 0 {
            tracing::debug!("Stopped {} pipe(s)", stopped);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.handles.iter().all(PipeHandle::is_stopped)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.handles.iter().map(PipeHandle::path).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
