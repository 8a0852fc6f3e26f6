//! Mutable Graph View
//!
//! [`MutableGraphView`] owns its storage and is the only type that changes
//! it. Changes go through two doors: a [`Mutation`] batch committed by
//! `apply`, and [`sort_topologically`](MutableGraphView::sort_topologically).
//!
//! # Epochs
//!
//! Both doors rewrite storage in place, which moves nodes to new indices.
//! The view therefore carries an epoch that is bumped on every successful
//! commit or sort. [`NodeHandle`]s record the epoch they were issued at, and
//! any use of a handle from an older epoch fails with `StaleHandle` instead
//! of silently addressing whichever node now sits at that index.
//!
//! Every view also gets a process-unique id when it is built. Handles carry
//! it too, so a handle used on a view that did not issue it fails with
//! `ForeignHandle`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::mutation::{EditLog, Mutation};
use super::node::{dedup_control_dependencies, Topology};
use super::node_def::GraphDef;
use super::view::NodeView;
use crate::config::GraphViewOptions;
use crate::error::{GraphError, Result};
use crate::validator::{AcceptAll, KernelValidator};

/// Identity of the graph and epoch a view or handle was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Stamp {
    pub graph: u64,
    pub epoch: u64,
}

impl Stamp {
    /// Stamp of read-only views. No mutable view uses graph id 0.
    pub const DETACHED: Stamp = Stamp { graph: 0, epoch: 0 };
}

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Detached reference to a node of a [`MutableGraphView`].
///
/// Handles are plain values: they can be kept while the view is mutably
/// borrowed by a [`Mutation`], and are checked against the issuing view and
/// its epoch every time they are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: usize,
    stamp: Stamp,
}

impl NodeHandle {
    pub(crate) fn new(index: usize, stamp: Stamp) -> Self {
        Self { index, stamp }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn epoch(&self) -> u64 {
        self.stamp.epoch
    }
}

/// Graph view over owned storage that supports batched rewrites.
pub struct MutableGraphView {
    graph: GraphDef,
    topology: Topology,
    id: u64,
    epoch: u64,
    options: GraphViewOptions,
    validator: Arc<dyn KernelValidator>,
    pending: EditLog,
}

impl MutableGraphView {
    /// Index `graph` with default options.
    pub fn new(graph: GraphDef) -> Result<Self> {
        Self::with_options(graph, GraphViewOptions::default())
    }

    /// Index `graph`. Repeated control dependencies are dropped from the
    /// records first unless the options ask for them to be rejected.
    pub fn with_options(mut graph: GraphDef, options: GraphViewOptions) -> Result<Self> {
        if options.dedup_control_dependencies {
            for node in &mut graph.node {
                let dropped = dedup_control_dependencies(node);
                if dropped > 0 {
                    tracing::trace!(node = %node.name, dropped, "deduplicated control dependencies");
                }
            }
        }

        let topology = Topology::build(&graph)?;
        tracing::debug!(
            nodes = graph.len(),
            edges = topology.num_edges(),
            "built mutable graph view"
        );

        Ok(Self {
            graph,
            topology,
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            epoch: 0,
            options,
            validator: Arc::new(AcceptAll),
            pending: EditLog::default(),
        })
    }

    /// Install the validator consulted by `Mutation::apply`.
    pub fn with_validator(mut self, validator: impl KernelValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn set_validator(&mut self, validator: Arc<dyn KernelValidator>) {
        self.validator = validator;
    }

    pub fn options(&self) -> &GraphViewOptions {
        &self.options
    }

    /// Number of successful commits and sorts so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn graph(&self) -> &GraphDef {
        &self.graph
    }

    /// Give back the storage. Pending edits are discarded.
    pub fn into_graph(self) -> GraphDef {
        self.graph
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.len()
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.topology.index_by_name.contains_key(name)
    }

    pub fn node(&self, index: usize) -> Option<NodeView<'_>> {
        (index < self.graph.len())
            .then(|| NodeView::new(&self.graph, &self.topology, self.stamp(), index))
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeView<'_>> {
        let index = *self.topology.index_by_name.get(name)?;
        self.node(index)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeView<'_>> + '_ {
        (0..self.graph.len()).map(move |i| NodeView::new(&self.graph, &self.topology, self.stamp(), i))
    }

    /// Handle for the node currently named `name`.
    pub fn node_handle(&self, name: &str) -> Option<NodeHandle> {
        let index = *self.topology.index_by_name.get(name)?;
        Some(NodeHandle::new(index, self.stamp()))
    }

    /// Dereference a handle. Fails if it predates the last commit or sort.
    pub fn resolve(&self, handle: NodeHandle) -> Result<NodeView<'_>> {
        let index = self.check_handle(handle)?;
        Ok(NodeView::new(&self.graph, &self.topology, self.stamp(), index))
    }

    /// Start (or continue) building a batch of edits.
    ///
    /// Edits persist in the view between builder borrows until they are
    /// applied or reset.
    pub fn mutation_builder(&mut self) -> Mutation<'_> {
        Mutation::new(self)
    }

    pub(crate) fn check_handle(&self, handle: NodeHandle) -> Result<usize> {
        if handle.stamp.graph != self.id {
            return Err(GraphError::ForeignHandle { what: "node" });
        }
        if handle.stamp.epoch != self.epoch || handle.index >= self.graph.len() {
            return Err(GraphError::StaleHandle {
                what: "node",
                issued: handle.stamp.epoch,
                current: self.epoch,
            });
        }
        Ok(handle.index)
    }

    /// Unique id of this view, stamped into every handle it issues.
    pub(super) fn id(&self) -> u64 {
        self.id
    }

    fn stamp(&self) -> Stamp {
        Stamp {
            graph: self.id,
            epoch: self.epoch,
        }
    }

    pub(super) fn topology(&self) -> &Topology {
        &self.topology
    }

    pub(super) fn validator(&self) -> &dyn KernelValidator {
        self.validator.as_ref()
    }

    pub(super) fn pending(&self) -> &EditLog {
        &self.pending
    }

    pub(super) fn pending_mut(&mut self) -> &mut EditLog {
        &mut self.pending
    }

    /// Swap in freshly built storage. Every outstanding handle goes stale.
    pub(super) fn commit(&mut self, graph: GraphDef, topology: Topology) {
        self.graph = graph;
        self.topology = topology;
        self.epoch += 1;
        self.pending.clear();
    }
}

impl fmt::Debug for MutableGraphView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableGraphView")
            .field("id", &self.id)
            .field("nodes", &self.graph.len())
            .field("epoch", &self.epoch)
            .field("options", &self.options)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
