//! Edge handles.

use std::fmt;

/// Handle of an edge in a [`DirectedGraph`](crate::graph::DirectedGraph), in insertion order.
///
/// A control flow graph adds its edges per block in successor order, so the handles of a
/// block's outgoing edges sort the same way as its successor list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub(crate) usize);

impl EdgeId {
    /// Wraps a raw edge index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        EdgeId(index)
    }

    /// The raw edge index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}
