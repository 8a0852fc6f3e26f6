//! Rewire Core
//!
//! This crate provides indexed views over dataflow programs for use by graph
//! rewriting passes. It implements:
//!
//! - Read-only and mutable graph views with O(1) edge lookups
//! - Batched, all-or-nothing graph mutations
//! - Deterministic topological sorting with caller-supplied constraints
//! - Pluggable kernel validation for rewritten nodes
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: storage records, tensor names, views, mutations and sorting
//! - `config`: options that control how views treat collisions and duplicates
//! - `validator`: the kernel-registration hook consulted on apply
//! - `sync`: a lock around a graph shared between threads
//! - `error`: the crate's error type
//!
//! # Example
//!
//! ```rust
//! use rewire_core::graph::{GraphDef, MutableGraphView, NodeDef};
//!
//! let graph = GraphDef::new(vec![
//!     NodeDef::new("a", "Const"),
//!     NodeDef::new("b", "Identity").with_input("a"),
//!     NodeDef::new("c", "NoOp").with_input("^b"),
//! ]);
//! let mut view = MutableGraphView::new(graph)?;
//!
//! let b = view.node_handle("b").unwrap();
//! let mut mutation = view.mutation_builder();
//! mutation.update_node_name(b, "d")?;
//! mutation.apply()?;
//!
//! assert_eq!(view.node_by_name("c").unwrap().node().input, vec!["^d"]);
//! # Ok::<(), rewire_core::error::GraphError>(())
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod sync;
pub mod validator;

pub use config::GraphViewOptions;
pub use error::{ErrorKind, GraphError, Result};
pub use graph::{GraphDef, GraphView, MutableGraphView, Mutation, NodeDef, NodeHandle, TensorId};
pub use sync::SharedGraph;
pub use validator::{KernelRegistry, KernelValidator};
