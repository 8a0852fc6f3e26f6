//! Dataflow Graph Views
//!
//! This module implements indexed views over a dataflow program: a list of
//! operation nodes connected by data edges (`node:port` inputs) and control
//! edges (`^node` inputs).
//!
//! # Overview
//!
//! - [`GraphDef`] / [`NodeDef`]: the storage. A node's index is its position.
//! - [`GraphView`]: read-only view over borrowed storage.
//! - [`MutableGraphView`]: owns its storage and rewrites it through
//!   [`Mutation`] batches and [`MutableGraphView::sort_topologically`].
//! - [`NodeView`], [`FaninView`], [`FanoutView`]: per-node and per-edge
//!   accessors handed out by either view.
//!
//! # Design Decisions
//!
//! 1. A view is built in one pass over the records plus one reverse pass
//!    for fanouts, and edge membership queries are O(1) hash lookups.
//!
//! 2. Views borrow the graph they came from, so they cannot be held across a
//!    rewrite. Detached [`NodeHandle`]s can, and carry the graph epoch so a
//!    handle from before a rewrite is rejected instead of misread.
//!
//! 3. A mutation is a list of edit records replayed at apply time. The new
//!    storage is staged off to the side and swapped in only if every check
//!    passes.

mod apply;
mod mutable;
mod mutation;
mod node;
mod node_def;
mod tensor_id;
mod topo_sort;
mod view;

pub use mutable::{MutableGraphView, NodeHandle};
pub use mutation::{Edit, EditRecord, Mutation, NewNodeHandle, NodeRef};
pub use node_def::{AttrValue, GraphDef, NodeDef};
pub use tensor_id::{
    as_control_dependency, parse_tensor_name, InvalidTensorName, SafeTensorId, TensorId, CONTROL_SLOT,
};
pub use topo_sort::TopologicalDependency;
pub use view::{FaninView, FanoutView, GraphView, NodeView};
