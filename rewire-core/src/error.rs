//! Errors
//!
//! Every fallible operation in the crate returns [`Result`]. Construction
//! failures abort view creation entirely and mutation failures abort the
//! whole batch, so a [`GraphError`] always means "nothing changed".

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// The kind of a [`GraphError`], without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateNodeName,
    MissingFanin,
    SelfLoop,
    DuplicateControlDependency,
    NodeStillReferenced,
    CycleDetected,
    KernelNotRegistered,
    MalformedInputSpec,
    StaleHandle,
    ForeignHandle,
}

/// Errors produced while building, mutating or sorting a graph view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two nodes claim the same name.
    #[error("duplicate node name '{name}'")]
    DuplicateNodeName { name: String },

    /// An input refers to a node that does not exist.
    #[error("node '{node}' has missing fanin '{fanin}'")]
    MissingFanin { node: String, fanin: String },

    /// A node lists itself as one of its inputs.
    #[error("node '{node}' has self cycle fanin '{fanin}'")]
    SelfLoop { node: String, fanin: String },

    /// A node lists the same control dependency more than once.
    #[error("node '{node}' has duplicate control dependency '{fanin}'")]
    DuplicateControlDependency { node: String, fanin: String },

    /// A removed node is still consumed by a surviving node.
    #[error("removed node '{node}' is still referenced by '{consumer}'")]
    NodeStillReferenced { node: String, consumer: String },

    /// A strict topological sort found a cycle.
    #[error("graph contains a cycle ({unsorted} of {total} nodes could not be ordered)")]
    CycleDetected { unsorted: usize, total: usize },

    /// The injected validator rejected a node.
    #[error("no kernel registered for node '{node}' (op '{op}'): {message}")]
    KernelNotRegistered {
        node: String,
        op: String,
        message: String,
    },

    /// An input-list entry or fanin edit could not be interpreted.
    #[error("node '{node}' has malformed input '{input}': {reason}")]
    MalformedInputSpec {
        node: String,
        input: String,
        reason: String,
    },

    /// A handle was issued before the last Apply, sort or reset.
    #[error("stale {what} handle: issued at epoch {issued}, current epoch is {current}")]
    StaleHandle {
        what: &'static str,
        issued: u64,
        current: u64,
    },

    /// A handle was issued by a different graph, or by a read-only view.
    #[error("{what} handle was not issued by this graph")]
    ForeignHandle { what: &'static str },
}

impl GraphError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::DuplicateNodeName { .. } => ErrorKind::DuplicateNodeName,
            GraphError::MissingFanin { .. } => ErrorKind::MissingFanin,
            GraphError::SelfLoop { .. } => ErrorKind::SelfLoop,
            GraphError::DuplicateControlDependency { .. } => ErrorKind::DuplicateControlDependency,
            GraphError::NodeStillReferenced { .. } => ErrorKind::NodeStillReferenced,
            GraphError::CycleDetected { .. } => ErrorKind::CycleDetected,
            GraphError::KernelNotRegistered { .. } => ErrorKind::KernelNotRegistered,
            GraphError::MalformedInputSpec { .. } => ErrorKind::MalformedInputSpec,
            GraphError::StaleHandle { .. } => ErrorKind::StaleHandle,
            GraphError::ForeignHandle { .. } => ErrorKind::ForeignHandle,
        }
    }

    pub(crate) fn malformed(
        node: impl Into<String>,
        input: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        GraphError::MalformedInputSpec {
            node: node.into(),
            input: input.into(),
            reason: reason.into(),
        }
    }
}
