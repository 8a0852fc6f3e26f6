//! Node Adjacency
//!
//! Every node view is backed by a [`NodeLinks`] entry holding the node's
//! resolved fanins and the fanouts accumulated from its consumers. All
//! entries of a graph are built together by [`Topology::build`] in one pass
//! over the records plus one reverse pass for the fanouts.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node_def::{GraphDef, NodeDef};
use super::tensor_id::{check_node_name, parse_tensor_name, CONTROL_SLOT};
use crate::error::{GraphError, Result};

/// One endpoint of an edge: a node index and a port on that node.
///
/// For fanins the port is the producer's output port. For fanouts it is the
/// consumer's input index. Control edges use [`CONTROL_SLOT`] either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub node: usize,
    pub port: i32,
}

impl Edge {
    pub fn new(node: usize, port: i32) -> Self {
        Self { node, port }
    }

    pub fn control(node: usize) -> Self {
        Self::new(node, CONTROL_SLOT)
    }
}

/// Fanin and fanout adjacency of a single node.
#[derive(Debug, Clone, Default)]
pub struct NodeLinks {
    /// Producer endpoint feeding each regular input, in input-list order.
    pub regular_fanins: SmallVec<[Edge; 4]>,
    /// Nodes this node has a control dependency on, in input-list order.
    pub controlling_fanins: SmallVec<[Edge; 2]>,
    /// Multiplicity of every fanin endpoint, control edges included.
    pub fanins_count: HashMap<Edge, usize>,
    /// Consumers of each output port.
    pub regular_fanouts_by_port: Vec<Vec<Edge>>,
    pub num_regular_fanouts: usize,
    /// Nodes holding a control dependency on this node.
    pub controlled_fanouts: Vec<Edge>,
}

impl NodeLinks {
    pub fn has_fanin(&self, fanin: Edge) -> bool {
        self.fanins_count.contains_key(&fanin)
    }

    fn add_regular_fanin(&mut self, fanin: Edge) {
        self.regular_fanins.push(fanin);
        *self.fanins_count.entry(fanin).or_insert(0) += 1;
    }

    fn add_controlling_fanin(&mut self, fanin: Edge) {
        self.controlling_fanins.push(fanin);
        *self.fanins_count.entry(fanin).or_insert(0) += 1;
    }

    fn add_regular_fanout(&mut self, port: usize, fanout: Edge) {
        if self.regular_fanouts_by_port.len() <= port {
            self.regular_fanouts_by_port.resize_with(port + 1, Vec::new);
        }
        self.regular_fanouts_by_port[port].push(fanout);
        self.num_regular_fanouts += 1;
    }
}

/// Adjacency of a whole graph plus its name table.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub links: Vec<NodeLinks>,
    pub index_by_name: HashMap<String, usize>,
}

impl Topology {
    /// Index `graph`, resolving every input against the name table.
    ///
    /// Fails on invalid or duplicate names, unparsable or misordered inputs,
    /// dangling references, self loops and repeated control dependencies.
    pub fn build(graph: &GraphDef) -> Result<Self> {
        let mut index_by_name = HashMap::with_capacity(graph.len());
        for (index, node) in graph.node.iter().enumerate() {
            check_node_name(&node.name)
                .map_err(|reason| GraphError::malformed(&node.name, &node.name, reason))?;
            if index_by_name.insert(node.name.clone(), index).is_some() {
                return Err(GraphError::DuplicateNodeName {
                    name: node.name.clone(),
                });
            }
        }

        let mut links = Vec::with_capacity(graph.len());
        for (index, node) in graph.node.iter().enumerate() {
            links.push(resolve_fanins(node, index, &index_by_name)?);
        }

        let mut topology = Self {
            links,
            index_by_name,
        };
        topology.populate_fanouts();
        Ok(topology)
    }

    /// Reverse pass: every fanin becomes a fanout on its producer.
    fn populate_fanouts(&mut self) {
        for consumer in 0..self.links.len() {
            for input in 0..self.links[consumer].regular_fanins.len() {
                let fanin = self.links[consumer].regular_fanins[input];
                self.links[fanin.node]
                    .add_regular_fanout(fanin.port as usize, Edge::new(consumer, input as i32));
            }
            for i in 0..self.links[consumer].controlling_fanins.len() {
                let fanin = self.links[consumer].controlling_fanins[i];
                self.links[fanin.node]
                    .controlled_fanouts
                    .push(Edge::control(consumer));
            }
        }
    }

    pub fn num_edges(&self) -> usize {
        self.links
            .iter()
            .map(|l| l.regular_fanins.len() + l.controlling_fanins.len())
            .sum()
    }
}

fn resolve_fanins(
    node: &NodeDef,
    index: usize,
    index_by_name: &HashMap<String, usize>,
) -> Result<NodeLinks> {
    let mut links = NodeLinks::default();
    let mut seen_control = false;

    for input in &node.input {
        let id = parse_tensor_name(input)
            .map_err(|e| GraphError::malformed(&node.name, input, e.reason))?;
        if id.is_control() {
            seen_control = true;
        } else if seen_control {
            return Err(GraphError::malformed(
                &node.name,
                input,
                "regular input after control dependency",
            ));
        }

        let Some(&source) = index_by_name.get(id.node()) else {
            return Err(GraphError::MissingFanin {
                node: node.name.clone(),
                fanin: input.clone(),
            });
        };
        if source == index {
            return Err(GraphError::SelfLoop {
                node: node.name.clone(),
                fanin: input.clone(),
            });
        }

        if id.is_control() {
            let fanin = Edge::control(source);
            if links.has_fanin(fanin) {
                return Err(GraphError::DuplicateControlDependency {
                    node: node.name.clone(),
                    fanin: input.clone(),
                });
            }
            links.add_controlling_fanin(fanin);
        } else {
            links.add_regular_fanin(Edge::new(source, id.index()));
        }
    }

    Ok(links)
}

/// Drop repeated `^name` entries, keeping the first occurrence.
///
/// Returns the number of entries removed.
pub(crate) fn dedup_control_dependencies(node: &mut NodeDef) -> usize {
    let before = node.input.len();
    let mut seen = std::collections::HashSet::new();
    node.input
        .retain(|input| !input.starts_with('^') || seen.insert(input.clone()));
    before - node.input.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn graph(nodes: Vec<NodeDef>) -> GraphDef {
        GraphDef::new(nodes)
    }

    #[test]
    fn fanouts_are_transpose_of_fanins() {
        let g = graph(vec![
            NodeDef::new("a", "Const"),
            NodeDef::new("b", "Identity").with_input("a"),
            NodeDef::new("c", "AddN").with_inputs(["a:0", "b", "^b"]),
        ]);
        let topo = Topology::build(&g).unwrap();

        let a = &topo.links[0];
        assert_eq!(a.regular_fanouts_by_port.len(), 1);
        assert_eq!(a.regular_fanouts_by_port[0], vec![Edge::new(1, 0), Edge::new(2, 0)]);
        assert_eq!(a.num_regular_fanouts, 2);

        let b = &topo.links[1];
        assert_eq!(b.regular_fanouts_by_port[0], vec![Edge::new(2, 1)]);
        assert_eq!(b.controlled_fanouts, vec![Edge::control(2)]);

        let c = &topo.links[2];
        assert!(c.has_fanin(Edge::new(0, 0)));
        assert!(c.has_fanin(Edge::control(1)));
        assert!(!c.has_fanin(Edge::control(0)));
        assert_eq!(topo.num_edges(), 4);
    }

    #[test]
    fn sparse_output_ports_allocate_buckets() {
        let g = graph(vec![
            NodeDef::new("split", "Split"),
            NodeDef::new("use", "Identity").with_input("split:2"),
        ]);
        let topo = Topology::build(&g).unwrap();
        let split = &topo.links[0];
        assert_eq!(split.regular_fanouts_by_port.len(), 3);
        assert!(split.regular_fanouts_by_port[0].is_empty());
        assert_eq!(split.regular_fanouts_by_port[2], vec![Edge::new(1, 0)]);
    }

    #[test]
    fn construction_errors() {
        let cases = [
            (
                vec![NodeDef::new("a", "Const"), NodeDef::new("a", "Const")],
                ErrorKind::DuplicateNodeName,
            ),
            (
                vec![NodeDef::new("a", "Identity").with_input("missing")],
                ErrorKind::MissingFanin,
            ),
            (
                vec![NodeDef::new("a", "Identity").with_input("^a")],
                ErrorKind::SelfLoop,
            ),
            (
                vec![
                    NodeDef::new("a", "Const"),
                    NodeDef::new("b", "NoOp").with_inputs(["^a", "^a"]),
                ],
                ErrorKind::DuplicateControlDependency,
            ),
            (
                vec![
                    NodeDef::new("a", "Const"),
                    NodeDef::new("b", "Identity").with_inputs(["^a", "a"]),
                ],
                ErrorKind::MalformedInputSpec,
            ),
            (
                vec![
                    NodeDef::new("a", "Const"),
                    NodeDef::new("b", "Identity").with_input("a:x"),
                ],
                ErrorKind::MalformedInputSpec,
            ),
            (vec![NodeDef::new("a:1", "Const")], ErrorKind::MalformedInputSpec),
            (vec![NodeDef::new("^a", "Const")], ErrorKind::MalformedInputSpec),
            (vec![NodeDef::new("", "Const")], ErrorKind::MalformedInputSpec),
        ];

        for (nodes, kind) in cases {
            let err = Topology::build(&graph(nodes)).unwrap_err();
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn dedup_keeps_first_control_dependency() {
        let mut node = NodeDef::new("n", "NoOp").with_inputs(["x", "^a", "^b", "^a", "^b", "^c"]);
        assert_eq!(dedup_control_dependencies(&mut node), 2);
        assert_eq!(node.input, vec!["x", "^a", "^b", "^c"]);
    }
}
