//! Postorder numbering.
//!
//! The control flow recoverer numbers blocks in reverse postorder; the node-graph builder
//! and the forward type pass rely on that numbering to see definitions before uses.

use crate::utils::graph::{NodeId, Successors};

/// Computes the postorder of all nodes reachable from `start`.
///
/// Successors are explored in edge order, so the result is deterministic for a given
/// graph. An out-of-range start yields an empty order.
///
/// # Examples
///
/// ```rust
/// use smxscope::graph::{algorithms::postorder, DirectedGraph};
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let head = graph.add_node("head");
/// let body = graph.add_node("body");
/// let exit = graph.add_node("exit");
/// graph.add_edge(head, body, ())?;
/// graph.add_edge(body, head, ())?;
/// graph.add_edge(head, exit, ())?;
///
/// assert_eq!(postorder(&graph, head), vec![body, exit, head]);
/// # Ok::<(), smxscope::Error>(())
/// ```
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let count = graph.node_count();
    if start.index() >= count {
        return Vec::new();
    }

    let mut seen = vec![false; count];
    let mut order = Vec::with_capacity(count);
    // Each frame holds a node and the successors it has left to explore.
    let mut frames: Vec<(NodeId, std::vec::IntoIter<NodeId>)> = Vec::new();

    seen[start.index()] = true;
    frames.push((start, successor_list(graph, start)));
    while let Some((node, pending)) = frames.last_mut() {
        match pending.find(|s| !seen[s.index()]) {
            Some(next) => {
                seen[next.index()] = true;
                frames.push((next, successor_list(graph, next)));
            }
            None => {
                order.push(*node);
                frames.pop();
            }
        }
    }
    order
}

/// Computes the reverse postorder of all nodes reachable from `start`.
///
/// A node comes before all of its successors except along back edges.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = postorder(graph, start);
    order.reverse();
    order
}

fn successor_list<G: Successors>(graph: &G, node: NodeId) -> std::vec::IntoIter<NodeId> {
    graph
        .successors(node)
        .filter(|s| s.index() < graph.node_count())
        .collect::<Vec<_>>()
        .into_iter()
}

#[cfg(test)]
mod tests {
    use crate::utils::graph::{
        algorithms::{postorder, reverse_postorder},
        DirectedGraph, NodeId,
    };

    fn diamond() -> DirectedGraph<u32, ()> {
        let mut graph = DirectedGraph::new();
        let nodes: Vec<NodeId> = (0..4).map(|address| graph.add_node(address * 8)).collect();
        for (from, to) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
            graph.add_edge(nodes[from], nodes[to], ()).unwrap();
        }
        graph
    }

    #[test]
    fn test_reverse_postorder_puts_join_last() {
        let order = reverse_postorder(&diamond(), NodeId::new(0));
        assert_eq!(
            order,
            vec![NodeId::new(0), NodeId::new(2), NodeId::new(1), NodeId::new(3)]
        );
    }

    #[test]
    fn test_self_loop_visited_once() {
        let mut graph: DirectedGraph<u32, ()> = DirectedGraph::new();
        let a = graph.add_node(0);
        let b = graph.add_node(4);
        graph.add_edge(a, a, ()).unwrap();
        graph.add_edge(a, b, ()).unwrap();
        assert_eq!(postorder(&graph, a), vec![b, a]);
    }

    #[test]
    fn test_unreachable_and_invalid_start() {
        let mut graph = diamond();
        graph.add_node(99);
        assert_eq!(postorder(&graph, NodeId::new(0)).len(), 4);
        assert!(postorder(&graph, NodeId::new(10)).is_empty());
    }
}
