//! Directed graph infrastructure shared by the control flow and structuring code.
//!
//! - [`NodeId`] / [`EdgeId`] - strongly typed indices
//! - [`GraphBase`], [`Successors`], [`Predecessors`], [`RootedGraph`] - capability traits
//! - [`DirectedGraph`] - adjacency-list storage with node and edge payloads
//! - [`algorithms`] - traversals and dominator trees written against the traits

pub mod algorithms;
mod directed;
mod edge;
mod node;
mod traits;

pub use directed::DirectedGraph;
pub use edge::EdgeId;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
