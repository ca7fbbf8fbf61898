//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` passes
//! through `d`. The **immediate dominator** of `n` is the closest strict dominator.
//!
//! # Algorithm
//!
//! The iterative scheme of Cooper, Harvey and Kennedy ("A Simple, Fast Dominance
//! Algorithm"): nodes are processed in reverse postorder and each immediate dominator is
//! the intersection of the already-processed predecessors, walking up the partial tree by
//! postorder number. Control flow graphs of single functions are small, and the same routine
//! is reused on reversed views to obtain post-dominators, where nodes that cannot reach the
//! root simply stay unreachable.

use crate::utils::graph::{
    algorithms::traversal::postorder, NodeId, RootedGraph, Successors,
};

/// Result of dominator tree computation.
///
/// # Examples
///
/// ```rust
/// use smxscope::graph::{algorithms::compute_dominators, DirectedGraph};
///
/// // entry -> a -> b, entry -> b
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let entry = graph.add_node("entry");
/// let a = graph.add_node("a");
/// let b = graph.add_node("b");
/// graph.add_edge(entry, a, ())?;
/// graph.add_edge(a, b, ())?;
/// graph.add_edge(entry, b, ())?;
///
/// let dom_tree = compute_dominators(&graph, entry);
/// assert!(dom_tree.dominates(entry, b));
/// assert_eq!(dom_tree.immediate_dominator(b), Some(entry));
/// # Ok::<(), smxscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator per node; the entry maps to itself, unreachable nodes to `None`
    idom: Vec<Option<NodeId>>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node and for
    /// nodes unreachable from the entry.
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry {
            return None;
        }
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.idom.get(node.index()).is_some_and(Option::is_some)
    }

    /// Checks if node `a` dominates node `b`.
    ///
    /// A node dominates itself. Unreachable nodes are dominated by nothing.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        if a == b {
            return true;
        }

        let mut current = b;
        while let Some(idom) = self.immediate_dominator(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Depth of a node in the dominator tree; the entry has depth 0.
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut current = node;
        while let Some(idom) = self.immediate_dominator(current) {
            depth += 1;
            current = idom;
        }
        depth
    }

    /// Nodes whose immediate dominator is `node`, by ascending index.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.idom.len())
            .map(NodeId::new)
            .filter(|&n| n != self.entry && self.idom[n.index()] == Some(node))
            .collect()
    }

    /// Number of nodes covered by the tree, reachable or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
///
/// # Complexity
///
/// O(V * E) worst case, close to linear for the reducible graphs compilers emit.
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors,
{
    let node_count = graph.node_count();
    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    if entry.index() >= node_count {
        return DominatorTree { entry, idom };
    }

    let order = postorder(graph, entry);
    let mut po_number = vec![usize::MAX; node_count];
    for (number, node) in order.iter().enumerate() {
        po_number[node.index()] = number;
    }

    // Predecessors restricted to reachable nodes.
    let mut preds: Vec<Vec<NodeId>> = vec![Vec::new(); node_count];
    for &node in &order {
        for succ in graph.successors(node) {
            preds[succ.index()].push(node);
        }
    }

    idom[entry.index()] = Some(entry);
    let mut changed = true;
    while changed {
        changed = false;
        for &node in order.iter().rev() {
            if node == entry {
                continue;
            }

            let mut new_idom: Option<NodeId> = None;
            for &pred in &preds[node.index()] {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &po_number, pred, current),
                });
            }

            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    DominatorTree { entry, idom }
}

/// Convenience function to compute dominators for a [`RootedGraph`].
pub fn compute_dominators_rooted<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    compute_dominators(graph, graph.entry())
}

fn intersect(idom: &[Option<NodeId>], po_number: &[usize], a: NodeId, b: NodeId) -> NodeId {
    let mut finger1 = a;
    let mut finger2 = b;
    while finger1 != finger2 {
        while po_number[finger1.index()] < po_number[finger2.index()] {
            match idom[finger1.index()] {
                Some(next) => finger1 = next,
                None => return finger2,
            }
        }
        while po_number[finger2.index()] < po_number[finger1.index()] {
            match idom[finger2.index()] {
                Some(next) => finger2 = next,
                None => return finger1,
            }
        }
    }
    finger1
}
