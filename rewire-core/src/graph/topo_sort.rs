//! Topological Sort
//!
//! Reorders the storage of a [`MutableGraphView`] so every node comes after
//! its producers.
//!
//! # Algorithm
//!
//! Kahn's algorithm over three kinds of edges:
//!
//! 1. Regular fanins
//! 2. Control fanins
//! 3. Extra `(from, to)` dependencies supplied by the caller, for orderings
//!    a pass wants without adding an edge to the graph
//!
//! Ready nodes are emitted first-in first-out, seeded in current index
//! order, so the result is deterministic. When the ready queue drains before
//! every node is placed the graph has a cycle: a strict sort fails, while
//! `ignore_cycles` forces the lowest-index remaining node out and carries
//! on. Order inside a cycle is best-effort only.

use std::collections::VecDeque;

use super::mutable::{MutableGraphView, NodeHandle};
use super::node::Topology;
use super::node_def::GraphDef;
use crate::error::{GraphError, Result};

/// Extra ordering constraint: `from` must be placed before `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopologicalDependency {
    from: NodeHandle,
    to: NodeHandle,
}

impl TopologicalDependency {
    pub fn new(from: NodeHandle, to: NodeHandle) -> Self {
        Self { from, to }
    }

    pub fn from_node(&self) -> NodeHandle {
        self.from
    }

    pub fn to_node(&self) -> NodeHandle {
        self.to
    }
}

/// Compute a topological order of `topology`, as a list of current node
/// indices.
fn compute_order(
    topology: &Topology,
    graph: &GraphDef,
    ignore_cycles: bool,
    extra: &[(usize, usize)],
) -> Result<Vec<usize>> {
    let num_nodes = topology.links.len();
    let mut in_degree: Vec<usize> = topology
        .links
        .iter()
        .map(|l| l.regular_fanins.len() + l.controlling_fanins.len())
        .collect();
    let mut extra_fanouts: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];
    for &(from, to) in extra {
        if from != to {
            extra_fanouts[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..num_nodes).filter(|&i| in_degree[i] == 0).collect();
    let mut emitted = vec![false; num_nodes];
    let mut order = Vec::with_capacity(num_nodes);
    let mut next_forced = 0;

    loop {
        while let Some(node) = queue.pop_front() {
            emitted[node] = true;
            order.push(node);

            let links = &topology.links[node];
            let consumers = links
                .regular_fanouts_by_port
                .iter()
                .flatten()
                .chain(&links.controlled_fanouts)
                .map(|e| e.node)
                .chain(extra_fanouts[node].iter().copied());
            for consumer in consumers {
                let degree = &mut in_degree[consumer];
                *degree = degree.saturating_sub(1);
                if *degree == 0 && !emitted[consumer] {
                    queue.push_back(consumer);
                }
            }
        }

        if order.len() == num_nodes {
            return Ok(order);
        }
        if !ignore_cycles {
            return Err(GraphError::CycleDetected {
                unsorted: num_nodes - order.len(),
                total: num_nodes,
            });
        }

        while emitted[next_forced] {
            next_forced += 1;
        }
        tracing::warn!(node = %graph.node[next_forced].name, "breaking cycle during topological sort");
        in_degree[next_forced] = 0;
        queue.push_back(next_forced);
    }
}

impl MutableGraphView {
    /// Sort storage topologically in place.
    ///
    /// With `ignore_cycles` unset a cycle fails with `CycleDetected` and the
    /// order is left untouched. On success every outstanding handle goes
    /// stale, and any buffered mutation is discarded since its handles no
    /// longer address the same nodes.
    pub fn sort_topologically(
        &mut self,
        ignore_cycles: bool,
        extra_dependencies: &[TopologicalDependency],
    ) -> Result<()> {
        let extra = extra_dependencies
            .iter()
            .map(|dep| -> Result<(usize, usize)> {
                Ok((self.check_handle(dep.from)?, self.check_handle(dep.to)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let order = compute_order(self.topology(), self.graph(), ignore_cycles, &extra)?;

        let graph: GraphDef = order.iter().map(|&i| self.graph().node[i].clone()).collect();
        let topology = Topology::build(&graph)?;

        if !self.pending().is_empty() {
            tracing::warn!("topological sort discards a pending mutation");
        }
        self.commit(graph, topology);
        tracing::debug!(nodes = order.len(), epoch = self.epoch(), "sorted graph topologically");
        Ok(())
    }
}
