//! Mutation Builder
//!
//! A [`Mutation`] buffers edits against a [`MutableGraphView`] and commits
//! them together with [`Mutation::apply`]. Nothing touches storage until
//! then, and a failed `apply` leaves storage exactly as it was.
//!
//! Buffered edits live in the view as a plain list of [`EditRecord`]s, so a
//! batch survives the builder being dropped and can be inspected, corrected
//! and re-applied, or thrown away with [`Mutation::reset`].
//!
//! # Naming
//!
//! Renaming a node keeps its identity: its consumers follow it to the new
//! name. If a renamed or newly added node takes a name that an existing node
//! still holds, the existing node is removed and its consumers are handed to
//! the newcomer (unless disabled in
//! [`GraphViewOptions`](crate::config::GraphViewOptions)).
//!
//! Fanins added by the batch name their producers by post-mutation names.

use std::collections::HashSet;

use super::apply;
use super::mutable::{MutableGraphView, NodeHandle};
use super::node_def::{AttrValue, NodeDef};
use super::tensor_id::{check_node_name, parse_tensor_name, SafeTensorId, TensorId};
use crate::error::{GraphError, Result};

/// Handle to a node added by the current batch.
///
/// Goes stale when the batch is applied or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewNodeHandle {
    index: usize,
    graph: u64,
    generation: u64,
}

impl NewNodeHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// The node an edit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Existing(NodeHandle),
    New(NewNodeHandle),
}

impl From<NodeHandle> for NodeRef {
    fn from(handle: NodeHandle) -> Self {
        NodeRef::Existing(handle)
    }
}

impl From<NewNodeHandle> for NodeRef {
    fn from(handle: NewNodeHandle) -> Self {
        NodeRef::New(handle)
    }
}

/// One buffered edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    RemoveNode,
    SetName(String),
    SetOp(String),
    SetDevice(String),
    /// Replace regular input `index`, or append it when `index` is one past
    /// the end.
    SetRegularFanin { index: usize, fanin: SafeTensorId },
    RemoveRegularFanin { index: usize },
    AddControllingFanin(String),
    RemoveControllingFanin(String),
    SetAttr { name: String, value: AttrValue },
    RemoveAttr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditRecord {
    pub target: NodeRef,
    pub edit: Edit,
}

/// Buffered batch stored in the view.
#[derive(Debug, Default)]
pub(crate) struct EditLog {
    pub new_nodes: Vec<NodeDef>,
    pub edits: Vec<EditRecord>,
    pub generation: u64,
}

impl EditLog {
    pub fn is_empty(&self) -> bool {
        self.new_nodes.is_empty() && self.edits.is_empty()
    }

    /// Drop every buffered edit and invalidate outstanding new-node handles.
    pub fn clear(&mut self) {
        self.new_nodes.clear();
        self.edits.clear();
        self.generation += 1;
    }
}

/// Builder for a batch of edits. Obtained from
/// [`MutableGraphView::mutation_builder`].
pub struct Mutation<'g> {
    view: &'g mut MutableGraphView,
}

impl<'g> Mutation<'g> {
    pub(super) fn new(view: &'g mut MutableGraphView) -> Self {
        Self { view }
    }

    /// The graph as it is before this batch.
    pub fn graph(&self) -> &MutableGraphView {
        &*self.view
    }

    pub fn edits(&self) -> &[EditRecord] {
        &self.view.pending().edits
    }

    pub fn new_nodes(&self) -> &[NodeDef] {
        &self.view.pending().new_nodes
    }

    pub fn is_empty(&self) -> bool {
        self.view.pending().is_empty()
    }

    /// Queue a new node.
    ///
    /// Fails right away if its name is not a valid node name or its input
    /// list is malformed: unparsable entries, a regular input after a
    /// control dependency, an input naming the node itself, or a repeated
    /// control dependency.
    pub fn add_node(&mut self, node: NodeDef) -> Result<NewNodeHandle> {
        check_new_node_inputs(&node)?;
        let graph = self.view.id();
        let log = self.view.pending_mut();
        log.new_nodes.push(node);
        Ok(NewNodeHandle {
            index: log.new_nodes.len() - 1,
            graph,
            generation: log.generation,
        })
    }

    pub fn remove_node(&mut self, node: impl Into<NodeRef>) -> Result<()> {
        self.record(node.into(), Edit::RemoveNode)
    }

    /// Rename a node. Fails right away if `name` could not be written as an
    /// input-list entry (empty, containing `:`, or starting with `^`).
    pub fn update_node_name(&mut self, node: impl Into<NodeRef>, name: impl Into<String>) -> Result<()> {
        let node = node.into();
        let name = name.into();
        if let Err(reason) = check_node_name(&name) {
            return Err(GraphError::malformed(self.target_name(node)?, name, reason));
        }
        self.record(node, Edit::SetName(name))
    }

    pub fn update_node_op(&mut self, node: impl Into<NodeRef>, op: impl Into<String>) -> Result<()> {
        self.record(node.into(), Edit::SetOp(op.into()))
    }

    pub fn update_node_device(&mut self, node: impl Into<NodeRef>, device: impl Into<String>) -> Result<()> {
        self.record(node.into(), Edit::SetDevice(device.into()))
    }

    /// Set regular input `index` to `fanin`. `index` may be one past the
    /// current last input to append.
    pub fn add_or_update_regular_fanin(
        &mut self,
        node: impl Into<NodeRef>,
        index: usize,
        fanin: TensorId<'_>,
    ) -> Result<()> {
        let node = node.into();
        if fanin.is_control() {
            return Err(GraphError::malformed(
                self.target_name(node)?,
                fanin.to_string(),
                "control dependency used as a regular fanin",
            ));
        }
        self.record(
            node,
            Edit::SetRegularFanin {
                index,
                fanin: fanin.to_safe(),
            },
        )
    }

    /// Drop regular input `index`. Only trailing inputs may be dropped
    /// without a replacement; a hole fails at `apply`.
    pub fn remove_regular_fanin(&mut self, node: impl Into<NodeRef>, index: usize) -> Result<()> {
        self.record(node.into(), Edit::RemoveRegularFanin { index })
    }

    pub fn add_controlling_fanin(&mut self, node: impl Into<NodeRef>, fanin_node: impl Into<String>) -> Result<()> {
        self.record(node.into(), Edit::AddControllingFanin(fanin_node.into()))
    }

    /// Drop the control dependency on `fanin_node`, named as it is in the
    /// graph before this batch or as it was added in this batch.
    pub fn remove_controlling_fanin(&mut self, node: impl Into<NodeRef>, fanin_node: impl Into<String>) -> Result<()> {
        self.record(node.into(), Edit::RemoveControllingFanin(fanin_node.into()))
    }

    pub fn add_or_update_node_attr(
        &mut self,
        node: impl Into<NodeRef>,
        name: impl Into<String>,
        value: AttrValue,
    ) -> Result<()> {
        self.record(
            node.into(),
            Edit::SetAttr {
                name: name.into(),
                value,
            },
        )
    }

    pub fn remove_node_attr(&mut self, node: impl Into<NodeRef>, name: impl Into<String>) -> Result<()> {
        self.record(node.into(), Edit::RemoveAttr(name.into()))
    }

    /// Discard the batch. Storage is untouched.
    pub fn reset(&mut self) {
        self.view.pending_mut().clear();
    }

    /// Validate and commit the batch.
    ///
    /// On success every outstanding [`NodeHandle`] and [`NewNodeHandle`]
    /// goes stale. On failure storage is unchanged and the batch is kept.
    pub fn apply(&mut self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let staged = apply::stage(&*self.view)?;
        tracing::debug!(
            removed = staged.summary.removed,
            overwritten = staged.summary.overwritten,
            renamed = staged.summary.renamed,
            added = staged.summary.added,
            nodes = staged.graph.len(),
            epoch = self.view.epoch() + 1,
            "applied mutation"
        );
        self.view.commit(staged.graph, staged.topology);
        Ok(())
    }

    fn record(&mut self, target: NodeRef, edit: Edit) -> Result<()> {
        self.check_target(target)?;
        self.view.pending_mut().edits.push(EditRecord { target, edit });
        Ok(())
    }

    fn check_target(&self, target: NodeRef) -> Result<()> {
        match target {
            NodeRef::Existing(handle) => self.view.check_handle(handle).map(|_| ()),
            NodeRef::New(handle) => {
                if handle.graph != self.view.id() {
                    return Err(GraphError::ForeignHandle { what: "new node" });
                }
                let log = self.view.pending();
                if handle.generation != log.generation || handle.index >= log.new_nodes.len() {
                    return Err(GraphError::StaleHandle {
                        what: "new node",
                        issued: handle.generation,
                        current: log.generation,
                    });
                }
                Ok(())
            }
        }
    }

    fn target_name(&self, target: NodeRef) -> Result<String> {
        self.check_target(target)?;
        Ok(match target {
            NodeRef::Existing(handle) => self.view.graph().node[handle.index()].name.clone(),
            NodeRef::New(handle) => self.view.pending().new_nodes[handle.index].name.clone(),
        })
    }
}

fn check_new_node_inputs(node: &NodeDef) -> Result<()> {
    check_node_name(&node.name)
        .map_err(|reason| GraphError::malformed(&node.name, &node.name, reason))?;

    let mut seen_control = false;
    let mut controls = HashSet::new();

    for input in &node.input {
        let id = parse_tensor_name(input).map_err(|e| GraphError::malformed(&node.name, input, e.reason))?;
        if id.node() == node.name {
            return Err(GraphError::SelfLoop {
                node: node.name.clone(),
                fanin: input.clone(),
            });
        }
        if id.is_control() {
            seen_control = true;
            if !controls.insert(id.node()) {
                return Err(GraphError::DuplicateControlDependency {
                    node: node.name.clone(),
                    fanin: input.clone(),
                });
            }
        } else if seen_control {
            return Err(GraphError::malformed(
                &node.name,
                input,
                "regular input after control dependency",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::graph::GraphDef;

    fn view() -> MutableGraphView {
        MutableGraphView::new(GraphDef::new(vec![
            NodeDef::new("a", "Const"),
            NodeDef::new("b", "Identity").with_input("a"),
        ]))
        .unwrap()
    }

    #[test]
    fn add_node_rejects_malformed_inputs() {
        let mut view = view();
        let mut mutation = view.mutation_builder();

        let cases = [
            (NodeDef::new("n", "Identity").with_input("^n"), ErrorKind::SelfLoop),
            (NodeDef::new("n", "Identity").with_input("n:1"), ErrorKind::SelfLoop),
            (
                NodeDef::new("n", "NoOp").with_inputs(["^a", "^b", "^a"]),
                ErrorKind::DuplicateControlDependency,
            ),
            (
                NodeDef::new("n", "Identity").with_inputs(["^a", "b"]),
                ErrorKind::MalformedInputSpec,
            ),
            (NodeDef::new("n", "Identity").with_input("a:"), ErrorKind::MalformedInputSpec),
        ];
        for (node, kind) in cases {
            assert_eq!(mutation.add_node(node).unwrap_err().kind(), kind);
        }
        assert!(mutation.is_empty());
    }

    #[test]
    fn edits_are_recorded_in_order() {
        let mut view = view();
        let b = view.node_handle("b").unwrap();
        let mut mutation = view.mutation_builder();

        let c = mutation.add_node(NodeDef::new("c", "Relu").with_input("b")).unwrap();
        mutation.update_node_op(b, "Snapshot").unwrap();
        mutation.add_controlling_fanin(c, "a").unwrap();

        assert_eq!(mutation.new_nodes().len(), 1);
        let edits = mutation.edits();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].target, NodeRef::Existing(b));
        assert_eq!(edits[0].edit, Edit::SetOp("Snapshot".into()));
        assert_eq!(edits[1].target, NodeRef::New(c));
        assert_eq!(edits[1].edit, Edit::AddControllingFanin("a".into()));
    }

    #[test]
    fn batch_survives_builder_drop_and_reset_invalidates_new_handles() {
        let mut view = view();
        let a = view.node_handle("a").unwrap();

        let c = {
            let mut mutation = view.mutation_builder();
            mutation.update_node_device(a, "/device:CPU:0").unwrap();
            mutation.add_node(NodeDef::new("c", "NoOp")).unwrap()
        };

        let mut mutation = view.mutation_builder();
        assert_eq!(mutation.edits().len(), 1);
        mutation.reset();
        assert!(mutation.is_empty());

        let err = mutation.update_node_op(c, "Relu").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleHandle);
        assert_eq!(view.graph().node[0].device, "");
    }

    #[test]
    fn control_tensor_is_not_a_regular_fanin() {
        let mut view = view();
        let b = view.node_handle("b").unwrap();
        let mut mutation = view.mutation_builder();
        let err = mutation
            .add_or_update_regular_fanin(b, 0, TensorId::control("a"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInputSpec);
        assert!(mutation.is_empty());
    }

    #[test]
    fn empty_batch_applies_without_new_epoch() {
        let mut view = view();
        view.mutation_builder().apply().unwrap();
        assert_eq!(view.epoch(), 0);
    }
}
