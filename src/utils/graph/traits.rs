//! Core graph traits for generic graph algorithms.
//!
//! The traversal and dominator algorithms in [`crate::graph::algorithms`] are written against
//! these traits instead of a concrete graph type. The control flow graph, the directed graph
//! helper and the filtered views used by the structure builder (reversed graphs, graphs with
//! back edges removed) all implement them.

use crate::utils::graph::NodeId;

/// Base trait providing fundamental graph properties.
pub trait GraphBase {
    /// Returns the number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers in the graph, by ascending index.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
pub trait Successors: GraphBase {
    /// Returns an iterator over the direct successors of a node.
    ///
    /// Successors are yielded in edge insertion order, which for a control flow graph is
    /// the order of the branch targets of the terminating instruction.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the direct predecessors of a node.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs with a designated entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry (root) node of the graph.
    fn entry(&self) -> NodeId;
}
