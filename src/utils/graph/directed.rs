//! Adjacency-list directed graph with typed node and edge payloads.

use crate::{
    utils::graph::{EdgeId, GraphBase, NodeId, Predecessors, Successors},
    Error, Result,
};

struct EdgeData<E> {
    source: NodeId,
    target: NodeId,
    data: E,
}

/// A directed graph storing node payloads `N` and edge payloads `E`.
///
/// Nodes and edges are never removed, so [`NodeId`] and [`EdgeId`] values stay valid for the
/// lifetime of the graph. Outgoing and incoming edge lists preserve insertion order, which the
/// control flow graph relies on to keep branch targets in operand order.
///
/// # Examples
///
/// ```rust
/// use smxscope::graph::DirectedGraph;
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let a = graph.add_node("A");
/// let b = graph.add_node("B");
/// graph.add_edge(a, b, ())?;
///
/// assert_eq!(graph.successors(a).collect::<Vec<_>>(), vec![b]);
/// assert_eq!(graph.predecessors(b).collect::<Vec<_>>(), vec![a]);
/// # Ok::<(), smxscope::Error>(())
/// ```
pub struct DirectedGraph<N, E> {
    nodes: Vec<N>,
    edges: Vec<EdgeData<E>>,
    outgoing: Vec<Vec<EdgeId>>,
    incoming: Vec<Vec<EdgeId>>,
}

impl<N, E> Default for DirectedGraph<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> DirectedGraph<N, E> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        DirectedGraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Creates an empty graph with preallocated capacity.
    #[must_use]
    pub fn with_capacity(node_capacity: usize, edge_capacity: usize) -> Self {
        DirectedGraph {
            nodes: Vec::with_capacity(node_capacity),
            edges: Vec::with_capacity(edge_capacity),
            outgoing: Vec::with_capacity(node_capacity),
            incoming: Vec::with_capacity(node_capacity),
        }
    }

    /// Adds a node and returns its identifier.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(data);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds an edge from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if either endpoint does not exist.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, data: E) -> Result<EdgeId> {
        if source.index() >= self.nodes.len() || target.index() >= self.nodes.len() {
            return Err(Error::Structural(format!(
                "edge {source} -> {target} references a missing node ({} nodes)",
                self.nodes.len()
            )));
        }

        let id = EdgeId::new(self.edges.len());
        self.edges.push(EdgeData {
            source,
            target,
            data,
        });
        self.outgoing[source.index()].push(id);
        self.incoming[target.index()].push(id);
        Ok(id)
    }

    /// Returns the payload of a node.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&N> {
        self.nodes.get(node.index())
    }

    /// Returns the mutable payload of a node.
    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut N> {
        self.nodes.get_mut(node.index())
    }

    /// Iterates over `(id, payload)` pairs in index order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, data)| (NodeId::new(index), data))
    }

    /// Returns the payload of an edge.
    #[must_use]
    pub fn edge(&self, edge: EdgeId) -> Option<&E> {
        self.edges.get(edge.index()).map(|e| &e.data)
    }

    /// Returns the `(source, target)` pair of an edge.
    #[must_use]
    pub fn edge_endpoints(&self, edge: EdgeId) -> Option<(NodeId, NodeId)> {
        self.edges.get(edge.index()).map(|e| (e.source, e.target))
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Iterates over the outgoing edges of a node as `(target, payload)`.
    pub fn outgoing_edges(&self, node: NodeId) -> impl Iterator<Item = (NodeId, &E)> + '_ {
        self.outgoing
            .get(node.index())
            .into_iter()
            .flatten()
            .map(|id| {
                let edge = &self.edges[id.index()];
                (edge.target, &edge.data)
            })
    }

    /// Iterates over the incoming edges of a node as `(source, payload)`.
    pub fn incoming_edges(&self, node: NodeId) -> impl Iterator<Item = (NodeId, &E)> + '_ {
        self.incoming
            .get(node.index())
            .into_iter()
            .flatten()
            .map(|id| {
                let edge = &self.edges[id.index()];
                (edge.source, &edge.data)
            })
    }

    /// Iterates over the successors of a node, in edge insertion order.
    pub fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing_edges(node).map(|(target, _)| target)
    }

    /// Iterates over the predecessors of a node, in edge insertion order.
    pub fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming_edges(node).map(|(source, _)| source)
    }

    /// Number of outgoing edges of a node.
    #[must_use]
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.outgoing.get(node.index()).map_or(0, Vec::len)
    }

    /// Number of incoming edges of a node.
    #[must_use]
    pub fn in_degree(&self, node: NodeId) -> usize {
        self.incoming.get(node.index()).map_or(0, Vec::len)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<N, E> GraphBase for DirectedGraph<N, E> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }
}

impl<N, E> Successors for DirectedGraph<N, E> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        DirectedGraph::successors(self, node)
    }
}

impl<N, E> Predecessors for DirectedGraph<N, E> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        DirectedGraph::predecessors(self, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_keep_insertion_order() {
        let mut graph: DirectedGraph<u32, &str> = DirectedGraph::new();
        let a = graph.add_node(0);
        let b = graph.add_node(1);
        let c = graph.add_node(2);
        graph.add_edge(a, c, "taken").unwrap();
        graph.add_edge(a, b, "fallthrough").unwrap();

        let out: Vec<_> = graph.outgoing_edges(a).collect();
        assert_eq!(out, vec![(c, &"taken"), (b, &"fallthrough")]);
        assert_eq!(graph.out_degree(a), 2);
        assert_eq!(graph.in_degree(c), 1);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_add_edge_to_missing_node() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        assert!(matches!(
            graph.add_edge(a, NodeId::new(5), ()),
            Err(Error::Structural(_))
        ));
    }

    #[test]
    fn test_node_mut() {
        let mut graph: DirectedGraph<u32, ()> = DirectedGraph::with_capacity(1, 0);
        let a = graph.add_node(1);
        *graph.node_mut(a).unwrap() = 5;
        assert_eq!(graph.node(a), Some(&5));
        assert!(!graph.is_empty());
    }
}
