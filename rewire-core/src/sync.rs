//! Shared Graphs
//!
//! The views themselves do no locking. [`SharedGraph`] is the lock callers
//! put around a graph that several threads touch: readers build a
//! [`GraphView`] under a shared lock, and a writer holds the exclusive lock
//! for the whole of view construction, its rewrites, and write-back.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::GraphViewOptions;
use crate::error::Result;
use crate::graph::{GraphDef, GraphView, MutableGraphView};
use crate::validator::{AcceptAll, KernelValidator};

pub struct SharedGraph {
    graph: RwLock<GraphDef>,
    options: GraphViewOptions,
    validator: Arc<dyn KernelValidator>,
}

impl SharedGraph {
    pub fn new(graph: GraphDef) -> Self {
        Self::with_options(graph, GraphViewOptions::default())
    }

    pub fn with_options(graph: GraphDef, options: GraphViewOptions) -> Self {
        Self {
            graph: RwLock::new(graph),
            options,
            validator: Arc::new(AcceptAll),
        }
    }

    /// Validator installed on every mutable view built by [`mutate`](Self::mutate).
    pub fn with_validator(mut self, validator: impl KernelValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Run `f` against a read-only view. Many readers may run at once.
    pub fn read<R>(&self, f: impl FnOnce(&GraphView<'_>) -> R) -> Result<R> {
        let graph = self.graph.read();
        let view = GraphView::new(&graph)?;
        Ok(f(&view))
    }

    /// Run `f` against a mutable view under the exclusive lock.
    ///
    /// The rewritten storage is stored back only if `f` succeeds, so a
    /// closure that applies several batches is all-or-nothing as a whole.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut MutableGraphView) -> Result<R>) -> Result<R> {
        let mut graph = self.graph.write();
        let mut view = MutableGraphView::with_options(graph.clone(), self.options.clone())?;
        view.set_validator(Arc::clone(&self.validator));
        let out = f(&mut view)?;
        *graph = view.into_graph();
        Ok(out)
    }

    /// Copy of the current storage.
    pub fn snapshot(&self) -> GraphDef {
        self.graph.read().clone()
    }

    pub fn into_inner(self) -> GraphDef {
        self.graph.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, GraphError};
    use crate::graph::NodeDef;

    fn shared() -> SharedGraph {
        SharedGraph::new(GraphDef::new(vec![
            NodeDef::new("a", "Const"),
            NodeDef::new("b", "Identity").with_input("a"),
        ]))
    }

    #[test]
    fn mutate_writes_back_on_success() {
        let graph = shared();
        graph
            .mutate(|view| {
                let b = view.node_handle("b").unwrap();
                let mut mutation = view.mutation_builder();
                mutation.update_node_op(b, "Snapshot")?;
                mutation.apply()
            })
            .unwrap();

        let op = graph.read(|view| view.node_by_name("b").unwrap().op().to_string()).unwrap();
        assert_eq!(op, "Snapshot");
    }

    #[test]
    fn failed_closure_leaves_graph_untouched() {
        let graph = shared();
        let err = graph
            .mutate(|view| -> Result<()> {
                let b = view.node_handle("b").unwrap();
                let mut mutation = view.mutation_builder();
                mutation.update_node_op(b, "Snapshot")?;
                mutation.apply()?;
                Err(GraphError::CycleDetected { unsorted: 1, total: 2 })
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
        assert_eq!(graph.snapshot().node[1].op, "Identity");
    }

    #[test]
    fn shared_validator_is_installed() {
        let graph = shared().with_validator(|node: &NodeDef| -> Result<()> {
            Err(GraphError::KernelNotRegistered {
                node: node.name.clone(),
                op: node.op.clone(),
                message: "rejected".into(),
            })
        });
        let err = graph
            .mutate(|view| {
                let a = view.node_handle("a").unwrap();
                let mut mutation = view.mutation_builder();
                mutation.update_node_device(a, "/device:GPU:0")?;
                mutation.apply()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KernelNotRegistered);
        assert_eq!(graph.into_inner().node[0].device, "");
    }
}
