//! Node identifier implementation for directed graphs.
//!
//! This module provides the [`NodeId`] type, a strongly-typed identifier for nodes
//! within a directed graph. In this crate the nodes are basic blocks, so a `NodeId`
//! doubles as the block id of a control flow graph.

use std::fmt;

/// A strongly-typed identifier for nodes within a directed graph.
///
/// `NodeId` wraps a `usize` index, providing type safety to prevent accidental
/// mixing of block indices with code addresses or arena indices of IR nodes.
/// Node IDs are assigned sequentially starting from 0 when nodes are added to a graph.
///
/// # Examples
///
/// ```rust
/// use smxscope::graph::NodeId;
///
/// let node = NodeId::new(3);
/// assert_eq!(node.index(), 3);
/// assert_eq!(format!("{node}"), "B3");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    ///
    /// # Arguments
    ///
    /// * `index` - The raw node index (0-based)
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_ordering() {
        let a = NodeId::new(1);
        let b = NodeId::new(2);
        assert!(a < b);
        assert_eq!(NodeId::from(2), b);
    }

    #[test]
    fn test_node_id_formatting() {
        let node = NodeId::new(7);
        assert_eq!(format!("{node:?}"), "NodeId(7)");
        assert_eq!(format!("{node}"), "B7");
    }

    #[test]
    fn test_node_id_hash() {
        let set: HashSet<NodeId> = [NodeId::new(0), NodeId::new(0), NodeId::new(1)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }
}
