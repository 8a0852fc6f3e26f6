//! Mutation Apply
//!
//! Turns a buffered batch into a new storage snapshot without touching the
//! current one. The caller swaps the snapshot in only if every phase passes.
//!
//! # Phases
//!
//! 1. Replay: every edit is replayed onto a pending copy of its node.
//!    Existing fanins are tracked by producer identity, fanins added by the
//!    batch by name. Removing a regular fanin the node does not have fails.
//! 2. Names: build the post-mutation name table. An incoming name (rename
//!    or new node) that an existing node still holds overwrites that node.
//! 3. Fanins: every by-name fanin must resolve in the post-mutation table,
//!    regular inputs must stay dense, and no node may feed itself.
//! 4. Liveness: no surviving node may still consume a removed node that was
//!    not overwritten.
//! 5. Validation: the injected validator sees each new or edited record in
//!    its final form.
//!
//! The first failure is returned and nothing is committed.

use std::collections::{HashMap, HashSet};

use super::mutable::MutableGraphView;
use super::mutation::{Edit, NodeRef};
use super::node::Topology;
use super::node_def::{GraphDef, NodeDef};
use super::tensor_id::{parse_tensor_name, SafeTensorId, TensorId, CONTROL_SLOT};
use crate::error::{GraphError, Result};

/// Identity of a node while a batch is being staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Existing(usize),
    New(usize),
}

/// What happens to an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Kept,
    Removed,
    /// Removed, and its consumers now read from the node that took its name.
    Overwritten(Slot),
}

#[derive(Debug, Clone)]
enum PendingFanin {
    /// Edge that existed before the batch, tracked by producer index. Keeps
    /// the original input string so unchanged entries are not rewritten.
    Existing { node: usize, port: i32, input: String },
    /// Edge added by the batch, resolved by post-mutation name.
    Named(SafeTensorId),
}

impl PendingFanin {
    /// Whether this fanin names `name`, using pre-mutation names for
    /// existing edges.
    fn refers_to(&self, name: &str, graph: &GraphDef) -> bool {
        match self {
            PendingFanin::Existing { node, .. } => graph.node[*node].name == name,
            PendingFanin::Named(id) => id.node() == name,
        }
    }

    fn port(&self) -> i32 {
        match self {
            PendingFanin::Existing { port, .. } => *port,
            PendingFanin::Named(id) => id.index(),
        }
    }

    /// Input-list entry for this fanin once its producer is named `source`.
    fn render(&self, source: &str) -> String {
        if let PendingFanin::Existing { input, .. } = self {
            if parse_tensor_name(input).is_ok_and(|id| id.node() == source) {
                return input.clone();
            }
        }
        TensorId::new(source, self.port()).to_input_string()
    }

    fn describe(&self, graph: &GraphDef) -> String {
        match self {
            PendingFanin::Existing { node, port, .. } => TensorId::new(&graph.node[*node].name, *port).to_string(),
            PendingFanin::Named(id) => id.to_string(),
        }
    }
}

/// A node as it will look after the batch.
#[derive(Debug, Clone)]
struct PendingNode {
    record: NodeDef,
    regular: Vec<Option<PendingFanin>>,
    controlling: Vec<PendingFanin>,
    removed: bool,
    edited: bool,
}

impl PendingNode {
    fn existing(graph: &GraphDef, topology: &Topology, index: usize) -> Self {
        let record = graph.node[index].clone();
        let links = &topology.links[index];
        let num_regular = links.regular_fanins.len();

        let regular = links
            .regular_fanins
            .iter()
            .zip(&record.input)
            .map(|(edge, input)| {
                Some(PendingFanin::Existing {
                    node: edge.node,
                    port: edge.port,
                    input: input.clone(),
                })
            })
            .collect();
        let controlling = links
            .controlling_fanins
            .iter()
            .zip(&record.input[num_regular..])
            .map(|(edge, input)| PendingFanin::Existing {
                node: edge.node,
                port: CONTROL_SLOT,
                input: input.clone(),
            })
            .collect();

        Self {
            record,
            regular,
            controlling,
            removed: false,
            edited: false,
        }
    }

    fn added(record: NodeDef) -> Result<Self> {
        let mut regular = Vec::new();
        let mut controlling = Vec::new();
        for input in &record.input {
            let id = parse_tensor_name(input).map_err(|e| GraphError::malformed(&record.name, input, e.reason))?;
            if id.is_control() {
                controlling.push(PendingFanin::Named(id.to_safe()));
            } else {
                regular.push(Some(PendingFanin::Named(id.to_safe())));
            }
        }
        Ok(Self {
            record,
            regular,
            controlling,
            removed: false,
            edited: true,
        })
    }

    fn replay(&mut self, edit: &Edit, graph: &GraphDef) -> Result<()> {
        self.edited = true;
        match edit {
            Edit::RemoveNode => self.removed = true,
            Edit::SetName(name) => self.record.name.clone_from(name),
            Edit::SetOp(op) => self.record.op.clone_from(op),
            Edit::SetDevice(device) => self.record.device.clone_from(device),
            Edit::SetRegularFanin { index, fanin } => {
                if self.regular.len() <= *index {
                    self.regular.resize(index + 1, None);
                }
                self.regular[*index] = Some(PendingFanin::Named(fanin.clone()));
            }
            Edit::RemoveRegularFanin { index } => match self.regular.get_mut(*index) {
                Some(slot) => *slot = None,
                None => {
                    return Err(GraphError::malformed(
                        &self.record.name,
                        format!("#{index}"),
                        format!("no regular fanin to remove, node has {}", self.regular.len()),
                    ))
                }
            },
            Edit::AddControllingFanin(name) => {
                if !self.controlling.iter().any(|f| f.refers_to(name, graph)) {
                    self.controlling
                        .push(PendingFanin::Named(SafeTensorId::control(name.as_str())));
                }
            }
            Edit::RemoveControllingFanin(name) => {
                self.controlling.retain(|f| !f.refers_to(name, graph));
            }
            Edit::SetAttr { name, value } => {
                self.record.attr.insert(name.clone(), value.clone());
            }
            Edit::RemoveAttr(name) => {
                self.record.attr.shift_remove(name);
            }
        }
        Ok(())
    }

    /// Regular fanins with trailing removals dropped, or the index of the
    /// first hole.
    fn dense_regular(&self) -> std::result::Result<&[Option<PendingFanin>], usize> {
        let len = self
            .regular
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1);
        let regular = &self.regular[..len];
        match regular.iter().position(Option::is_none) {
            Some(hole) => Err(hole),
            None => Ok(regular),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Summary {
    pub removed: usize,
    pub overwritten: usize,
    pub renamed: usize,
    pub added: usize,
}

/// Storage and index ready to be committed.
pub(crate) struct Staged {
    pub graph: GraphDef,
    pub topology: Topology,
    pub summary: Summary,
}

struct Stage<'v> {
    graph: &'v GraphDef,
    existing: Vec<PendingNode>,
    added: Vec<PendingNode>,
    names: HashMap<String, Slot>,
    fates: Vec<Fate>,
}

/// Validate the view's pending batch and build the post-mutation storage.
pub(crate) fn stage(view: &MutableGraphView) -> Result<Staged> {
    let graph = view.graph();
    let log = view.pending();

    let mut existing: Vec<PendingNode> = (0..graph.len())
        .map(|i| PendingNode::existing(graph, view.topology(), i))
        .collect();
    let mut added = log
        .new_nodes
        .iter()
        .cloned()
        .map(PendingNode::added)
        .collect::<Result<Vec<_>>>()?;

    for record in &log.edits {
        let node = match record.target {
            NodeRef::Existing(handle) => &mut existing[handle.index()],
            NodeRef::New(handle) => &mut added[handle.index()],
        };
        node.replay(&record.edit, graph)?;
    }

    let mut stage = Stage {
        graph,
        existing,
        added,
        names: HashMap::new(),
        fates: vec![Fate::Kept; graph.len()],
    };
    let summary = stage.resolve_names(view.options().overwrite_on_name_collision)?;
    let order = stage.survivors();
    stage.check_named_fanins(&order)?;
    let (nodes, edited) = stage.build_records(&order)?;

    let validator = view.validator();
    for &index in &edited {
        validator.validate(&nodes[index])?;
    }

    let graph = GraphDef::new(nodes);
    let topology = Topology::build(&graph)?;
    Ok(Staged {
        graph,
        topology,
        summary,
    })
}

impl Stage<'_> {
    fn pending(&self, slot: Slot) -> &PendingNode {
        match slot {
            Slot::Existing(i) => &self.existing[i],
            Slot::New(i) => &self.added[i],
        }
    }

    fn is_renamed(&self, index: usize) -> bool {
        self.existing[index].record.name != self.graph.node[index].name
    }

    /// Build the post-mutation name table and decide the fate of every
    /// existing node.
    fn resolve_names(&mut self, overwrite: bool) -> Result<Summary> {
        let mut summary = Summary::default();

        for (i, node) in self.existing.iter().enumerate() {
            if !node.removed && !self.is_renamed(i) {
                self.names.insert(node.record.name.clone(), Slot::Existing(i));
            }
        }

        let renamed = (0..self.existing.len())
            .filter(|&i| !self.existing[i].removed && self.is_renamed(i))
            .map(Slot::Existing);
        let added = (0..self.added.len())
            .filter(|&i| !self.added[i].removed)
            .map(Slot::New);
        let incoming: Vec<Slot> = renamed.chain(added).collect();

        let mut claimed = HashSet::new();
        for slot in incoming {
            let name = self.pending(slot).record.name.clone();
            match slot {
                Slot::Existing(_) => summary.renamed += 1,
                Slot::New(_) => summary.added += 1,
            }
            if !claimed.insert(name.clone()) {
                return Err(GraphError::DuplicateNodeName { name });
            }
            if let Some(Slot::Existing(previous)) = self.names.insert(name.clone(), slot) {
                if !overwrite {
                    return Err(GraphError::DuplicateNodeName { name });
                }
                tracing::warn!(node = %name, "mutation overwrites existing node with the same name");
                self.fates[previous] = Fate::Overwritten(slot);
                summary.overwritten += 1;
            }
        }

        for i in 0..self.existing.len() {
            if !self.existing[i].removed {
                continue;
            }
            self.fates[i] = match self.names.get(&self.graph.node[i].name) {
                Some(&slot) => {
                    tracing::trace!(node = %self.graph.node[i].name, "removed node's name taken over");
                    summary.overwritten += 1;
                    Fate::Overwritten(slot)
                }
                None => {
                    summary.removed += 1;
                    Fate::Removed
                }
            };
        }

        Ok(summary)
    }

    /// Surviving nodes in post-mutation storage order: kept existing nodes
    /// in their current order, then new nodes in the order they were added.
    fn survivors(&self) -> Vec<Slot> {
        let kept = (0..self.existing.len())
            .filter(|&i| self.fates[i] == Fate::Kept)
            .map(Slot::Existing);
        let added = (0..self.added.len())
            .filter(|&i| !self.added[i].removed)
            .map(Slot::New);
        kept.chain(added).collect()
    }

    /// Producer of `fanin` after the batch.
    fn resolve(&self, owner: Slot, fanin: &PendingFanin) -> Result<Slot> {
        let node = &self.pending(owner).record.name;
        let source = match fanin {
            PendingFanin::Named(id) => match self.names.get(id.node()) {
                Some(&slot) => slot,
                None => {
                    return Err(GraphError::MissingFanin {
                        node: node.clone(),
                        fanin: id.to_string(),
                    })
                }
            },
            PendingFanin::Existing { node: producer, .. } => match self.fates[*producer] {
                Fate::Kept => Slot::Existing(*producer),
                Fate::Overwritten(slot) => slot,
                Fate::Removed => {
                    return Err(GraphError::NodeStillReferenced {
                        node: self.graph.node[*producer].name.clone(),
                        consumer: node.clone(),
                    })
                }
            },
        };
        if source == owner {
            return Err(GraphError::SelfLoop {
                node: node.clone(),
                fanin: fanin.describe(self.graph),
            });
        }
        Ok(source)
    }

    /// Fanins phase: dense regular inputs and resolvable by-name fanins.
    fn check_named_fanins(&self, order: &[Slot]) -> Result<()> {
        for &slot in order {
            let node = self.pending(slot);
            if !node.edited {
                continue;
            }
            let regular = node.dense_regular().map_err(|hole| {
                GraphError::malformed(
                    &node.record.name,
                    format!("#{hole}"),
                    "regular fanin removed without a replacement",
                )
            })?;
            let named = regular
                .iter()
                .flatten()
                .chain(&node.controlling)
                .filter(|f| matches!(f, PendingFanin::Named(_)));
            for fanin in named {
                self.resolve(slot, fanin)?;
            }
        }
        Ok(())
    }

    /// Liveness phase and record assembly. Returns the final records and the
    /// positions of the new or edited ones.
    fn build_records(&self, order: &[Slot]) -> Result<(Vec<NodeDef>, Vec<usize>)> {
        let mut nodes = Vec::with_capacity(order.len());
        let mut edited = Vec::new();

        for &slot in order {
            let node = self.pending(slot);
            let regular = node.dense_regular().map_err(|hole| {
                GraphError::malformed(
                    &node.record.name,
                    format!("#{hole}"),
                    "regular fanin removed without a replacement",
                )
            })?;

            let mut input = Vec::with_capacity(regular.len() + node.controlling.len());
            for fanin in regular.iter().flatten() {
                let source = self.resolve(slot, fanin)?;
                input.push(fanin.render(&self.pending(source).record.name));
            }

            let mut controls = HashSet::new();
            for fanin in &node.controlling {
                let source = self.resolve(slot, fanin)?;
                if !controls.insert(source) {
                    tracing::trace!(node = %node.record.name, fanin = %fanin.describe(self.graph), "dropped repeated control dependency");
                    continue;
                }
                input.push(fanin.render(&self.pending(source).record.name));
            }

            if node.edited {
                edited.push(nodes.len());
            }
            let mut record = node.record.clone();
            record.input = input;
            nodes.push(record);
        }

        Ok((nodes, edited))
    }
}
