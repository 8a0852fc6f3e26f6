//! Graph Views
//!
//! Read access to an indexed graph. A [`NodeView`] wraps one node; a
//! [`FanoutView`] names a producing endpoint (node + output port) and a
//! [`FaninView`] names a consuming endpoint (node + input index). All three
//! are cheap `Copy` values that borrow the view they came from, so the
//! borrow checker keeps them from outliving a mutation or sort.
//!
//! The same view types are handed out by the read-only [`GraphView`] and by
//! [`MutableGraphView`](super::MutableGraphView).

use std::ptr;

use indexmap::IndexMap;

use super::mutable::{NodeHandle, Stamp};
use super::node::{Edge, NodeLinks, Topology};
use super::node_def::{AttrValue, GraphDef, NodeDef};
use super::tensor_id::{TensorId, CONTROL_SLOT};
use crate::error::Result;

/// Producing side of an edge: `node`'s output `port`.
#[derive(Debug, Clone, Copy)]
pub struct FanoutView<'a> {
    graph: &'a GraphDef,
    topology: &'a Topology,
    stamp: Stamp,
    node_index: usize,
    port: i32,
}

impl<'a> FanoutView<'a> {
    fn new(node: &NodeView<'a>, node_index: usize, port: i32) -> Self {
        Self {
            graph: node.graph,
            topology: node.topology,
            stamp: node.stamp,
            node_index,
            port,
        }
    }

    pub fn node_index(&self) -> usize {
        self.node_index
    }

    /// Output port, or [`CONTROL_SLOT`] for a control edge.
    pub fn index(&self) -> i32 {
        self.port
    }

    pub fn is_control(&self) -> bool {
        self.port == CONTROL_SLOT
    }

    pub fn node_view(&self) -> NodeView<'a> {
        NodeView::new(self.graph, self.topology, self.stamp, self.node_index)
    }

    pub fn tensor_id(&self) -> TensorId<'a> {
        TensorId::new(&self.graph.node[self.node_index].name, self.port)
    }
}

/// Consuming side of an edge: `node`'s input `port`.
#[derive(Debug, Clone, Copy)]
pub struct FaninView<'a> {
    graph: &'a GraphDef,
    topology: &'a Topology,
    stamp: Stamp,
    node_index: usize,
    port: i32,
}

impl<'a> FaninView<'a> {
    fn new(node: &NodeView<'a>, node_index: usize, port: i32) -> Self {
        Self {
            graph: node.graph,
            topology: node.topology,
            stamp: node.stamp,
            node_index,
            port,
        }
    }

    pub fn node_index(&self) -> usize {
        self.node_index
    }

    /// Input index, or [`CONTROL_SLOT`] for a control edge.
    pub fn index(&self) -> i32 {
        self.port
    }

    pub fn is_control(&self) -> bool {
        self.port == CONTROL_SLOT
    }

    pub fn node_view(&self) -> NodeView<'a> {
        NodeView::new(self.graph, self.topology, self.stamp, self.node_index)
    }
}

/// A node together with its resolved fanins and fanouts.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    graph: &'a GraphDef,
    topology: &'a Topology,
    stamp: Stamp,
    index: usize,
}

impl<'a> NodeView<'a> {
    pub(crate) fn new(graph: &'a GraphDef, topology: &'a Topology, stamp: Stamp, index: usize) -> Self {
        Self {
            graph,
            topology,
            stamp,
            index,
        }
    }

    fn links(&self) -> &'a NodeLinks {
        &self.topology.links[self.index]
    }

    fn same_graph(&self, topology: &Topology) -> bool {
        ptr::eq(self.topology, topology)
    }

    /// Position of the node in storage.
    pub fn index(&self) -> usize {
        self.index
    }

    /// A detached handle that can be held across borrows and is checked
    /// against the issuing graph and its epoch on use. Handles from a
    /// read-only [`GraphView`] resolve nowhere.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.index, self.stamp)
    }

    /// The underlying record.
    pub fn node(&self) -> &'a NodeDef {
        &self.graph.node[self.index]
    }

    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    pub fn op(&self) -> &'a str {
        &self.node().op
    }

    pub fn device(&self) -> &'a str {
        &self.node().device
    }

    pub fn attr(&self, name: &str) -> Option<&'a AttrValue> {
        self.node().attr.get(name)
    }

    pub fn attrs(&self) -> &'a IndexMap<String, AttrValue> {
        &self.node().attr
    }

    pub fn num_attrs(&self) -> usize {
        self.node().attr.len()
    }

    pub fn num_regular_fanins(&self) -> usize {
        self.links().regular_fanins.len()
    }

    pub fn num_controlling_fanins(&self) -> usize {
        self.links().controlling_fanins.len()
    }

    /// Producer feeding regular input `i`.
    pub fn regular_fanin(&self, i: usize) -> Option<FanoutView<'a>> {
        self.links()
            .regular_fanins
            .get(i)
            .map(|e| FanoutView::new(self, e.node, e.port))
    }

    /// Producers of the regular inputs, in input-list order.
    pub fn regular_fanins(&self) -> impl Iterator<Item = FanoutView<'a>> + 'a {
        let this = *self;
        self.links()
            .regular_fanins
            .iter()
            .map(move |e| FanoutView::new(&this, e.node, e.port))
    }

    /// Nodes this node has a control dependency on, in input-list order.
    pub fn controlling_fanins(&self) -> impl Iterator<Item = FanoutView<'a>> + 'a {
        let this = *self;
        self.links()
            .controlling_fanins
            .iter()
            .map(move |e| FanoutView::new(&this, e.node, CONTROL_SLOT))
    }

    pub fn num_regular_fanouts(&self) -> usize {
        self.links().num_regular_fanouts
    }

    pub fn num_controlled_fanouts(&self) -> usize {
        self.links().controlled_fanouts.len()
    }

    /// One past the highest output port with a recorded consumer.
    pub fn num_fanout_ports(&self) -> usize {
        self.links().regular_fanouts_by_port.len()
    }

    /// Consumers of output `port`, in insertion order.
    pub fn regular_fanouts(&self, port: usize) -> impl Iterator<Item = FaninView<'a>> + 'a {
        let this = *self;
        self.links()
            .regular_fanouts_by_port
            .get(port)
            .into_iter()
            .flatten()
            .map(move |e| FaninView::new(&this, e.node, e.port))
    }

    /// Consumers of every output, grouped by port.
    pub fn all_regular_fanouts(&self) -> impl Iterator<Item = (usize, FaninView<'a>)> + 'a {
        let this = *self;
        self.links()
            .regular_fanouts_by_port
            .iter()
            .enumerate()
            .flat_map(move |(port, fanouts)| {
                fanouts
                    .iter()
                    .map(move |e| (port, FaninView::new(&this, e.node, e.port)))
            })
    }

    /// Nodes with a control dependency on this node.
    pub fn controlled_fanouts(&self) -> impl Iterator<Item = FaninView<'a>> + 'a {
        let this = *self;
        self.links()
            .controlled_fanouts
            .iter()
            .map(move |e| FaninView::new(&this, e.node, CONTROL_SLOT))
    }

    /// Whether `fanin` (a producer endpoint) feeds this node.
    pub fn has_fanin(&self, fanin: &FanoutView<'_>) -> bool {
        self.same_graph(fanin.topology)
            && self.links().has_fanin(Edge::new(fanin.node_index, fanin.port))
    }

    /// Whether `fanout` (a consumer endpoint) is fed by this node.
    pub fn has_fanout(&self, fanout: &FaninView<'_>) -> bool {
        if !self.same_graph(fanout.topology) {
            return false;
        }
        let consumer = &self.topology.links[fanout.node_index];
        if fanout.port == CONTROL_SLOT {
            consumer.has_fanin(Edge::control(self.index))
        } else {
            usize::try_from(fanout.port)
                .ok()
                .and_then(|input| consumer.regular_fanins.get(input))
                .is_some_and(|e| e.node == self.index)
        }
    }

    /// Whether this node consumes the tensor (or control output) named by `id`.
    pub fn has_fanin_tensor(&self, id: TensorId<'_>) -> bool {
        self.topology
            .index_by_name
            .get(id.node())
            .is_some_and(|&source| self.links().has_fanin(Edge::new(source, id.index())))
    }
}

/// Read-only view over borrowed storage.
///
/// Supports lookups and traversals only. Any number of `GraphView`s may
/// share the same storage.
#[derive(Debug)]
pub struct GraphView<'g> {
    graph: &'g GraphDef,
    topology: Topology,
}

impl<'g> GraphView<'g> {
    /// Index `graph`.
    ///
    /// Fails if names are not unique, an input cannot be parsed or resolved,
    /// a node feeds itself, or a control dependency is repeated.
    pub fn new(graph: &'g GraphDef) -> Result<Self> {
        let topology = Topology::build(graph)?;
        tracing::debug!(
            nodes = graph.len(),
            edges = topology.num_edges(),
            "built graph view"
        );
        Ok(Self { graph, topology })
    }

    pub fn graph(&self) -> &'g GraphDef {
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
            .then(|| NodeView::new(self.graph, &self.topology, Stamp::DETACHED, index))
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeView<'_>> {
        let index = *self.topology.index_by_name.get(name)?;
        self.node(index)
    }

    /// All nodes in storage order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeView<'_>> + '_ {
        (0..self.graph.len())
            .map(move |i| NodeView::new(self.graph, &self.topology, Stamp::DETACHED, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample() -> GraphDef {
        GraphDef::new(vec![
            NodeDef::new("a", "Const"),
            NodeDef::new("b", "Identity").with_input("a:0"),
            NodeDef::new("c", "Identity").with_inputs(["a:0", "^b"]),
        ])
    }

    #[test]
    fn fanins_and_fanouts_of_sample() {
        let graph = sample();
        let view = GraphView::new(&graph).unwrap();
        assert_eq!(view.num_nodes(), 3);

        let a = view.node_by_name("a").unwrap();
        let consumers: Vec<_> = a
            .regular_fanouts(0)
            .map(|f| (f.node_view().name(), f.index()))
            .collect();
        assert_eq!(consumers, vec![("b", 0), ("c", 0)]);
        assert_eq!(a.num_regular_fanouts(), 2);
        assert_eq!(a.num_controlled_fanouts(), 0);

        let b = view.node_by_name("b").unwrap();
        let controlled: Vec<_> = b.controlled_fanouts().map(|f| f.node_view().name()).collect();
        assert_eq!(controlled, vec!["c"]);

        let c = view.node_by_name("c").unwrap();
        assert_eq!(c.num_regular_fanins(), 1);
        assert_eq!(c.num_controlling_fanins(), 1);
        let fanin = c.regular_fanin(0).unwrap();
        assert_eq!(fanin.node_view().name(), "a");
        assert_eq!(fanin.index(), 0);
        assert!(c.regular_fanin(1).is_none());
        assert!(c.controlling_fanins().all(|f| f.is_control()));
    }

    #[test]
    fn has_fanin_and_has_fanout_agree() {
        let graph = sample();
        let view = GraphView::new(&graph).unwrap();
        let b = view.node_by_name("b").unwrap();
        let c = view.node_by_name("c").unwrap();

        for node in view.nodes() {
            for fanin in node.regular_fanins().chain(node.controlling_fanins()) {
                assert!(node.has_fanin(&fanin));
            }
            for (port, fanout) in node.all_regular_fanouts() {
                assert!(node.has_fanout(&fanout));
                let producer = FanoutView::new(&node, node.index(), port as i32);
                assert!(fanout.node_view().has_fanin(&producer));
            }
            for fanout in node.controlled_fanouts() {
                assert!(node.has_fanout(&fanout));
                let producer = FanoutView::new(&node, node.index(), CONTROL_SLOT);
                assert!(fanout.node_view().has_fanin(&producer));
            }
        }

        assert!(c.has_fanin_tensor(TensorId::control("b")));
        assert!(!c.has_fanin_tensor(TensorId::new("b", 0)));
        assert!(!c.has_fanin_tensor(TensorId::control("missing")));
        let control_from_b = c.controlling_fanins().next().unwrap();
        assert!(!b.has_fanin(&control_from_b));
    }

    #[test]
    fn views_from_other_graphs_never_match() {
        let first = sample();
        let second = sample();
        let v1 = GraphView::new(&first).unwrap();
        let v2 = GraphView::new(&second).unwrap();
        let c1 = v1.node_by_name("c").unwrap();
        let fanin_from_v2 = v2.node_by_name("c").unwrap().regular_fanin(0).unwrap();
        assert!(!c1.has_fanin(&fanin_from_v2));
    }

    #[test]
    fn read_only_view_rejects_repeated_control_dependency() {
        let graph = GraphDef::new(vec![
            NodeDef::new("a", "Const"),
            NodeDef::new("b", "NoOp").with_inputs(["^a", "^a"]),
        ]);
        let err = GraphView::new(&graph).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateControlDependency);
    }

    #[test]
    fn lookups() {
        let graph = sample();
        let view = GraphView::new(&graph).unwrap();
        assert!(view.has_node("a"));
        assert!(!view.has_node("z"));
        assert!(view.node(3).is_none());
        let b = view.node(1).unwrap();
        assert_eq!(b.name(), "b");
        assert_eq!(b.op(), "Identity");
        assert_eq!(b.device(), "");
        assert_eq!(b.num_attrs(), 0);
        assert!(ptr::eq(view.graph(), &graph));
    }
}
