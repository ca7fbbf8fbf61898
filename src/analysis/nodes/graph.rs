//! The per-function node arena.

use std::{fmt, ops::Index};

use crate::{
    analysis::{
        cfg::ControlFlowGraph,
        nodes::{Node, NodeFlags, NodeKind, NodeRef},
        types::Type,
    },
    compiler::Stage,
    program::Argument,
    utils::graph::{NodeId, Predecessors, Successors},
    Error, Result,
};

/// The node graph of one function.
///
/// Nodes live in an arena addressed by [`NodeRef`]; removal leaves a hole, so references held
/// by a pass stay valid for every node that still exists. Each block keeps its nodes in
/// evaluation order and every node keeps the list of its users, including repeated entries
/// when a user references it more than once.
///
/// The graph also carries the pipeline [`Stage`] it has reached. Passes advance it through
/// [`NodeGraph::advance`], which rejects any transition outside the fixed order.
pub struct NodeGraph {
    nodes: Vec<Option<Node>>,
    uses: Vec<Vec<NodeRef>>,
    blocks: Vec<Vec<NodeRef>>,
    cfg: ControlFlowGraph,
    arguments: Vec<Argument>,
    stage: Stage,
}

impl NodeGraph {
    /// Creates an empty graph with one node list per block of `cfg`.
    #[must_use]
    pub fn new(cfg: ControlFlowGraph, arguments: Vec<Argument>) -> Self {
        let block_count = cfg.block_count();
        NodeGraph {
            nodes: Vec::new(),
            uses: Vec::new(),
            blocks: vec![Vec::new(); block_count],
            cfg,
            arguments,
            stage: Stage::Built,
        }
    }

    /// The control flow graph the nodes are attached to.
    #[must_use]
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    /// Declared and synthesized arguments of the function.
    #[must_use]
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// The stage the graph has reached.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Moves the graph to `to`.
    ///
    /// Legal transitions go to the stage directly after the current one, or stay in a
    /// repeatable stage.
    ///
    /// # Errors
    /// Returns [`Error::PassOrder`] for any other transition.
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        if to == self.stage && to.is_repeatable() {
            return Ok(());
        }
        match self.stage.next() {
            Some(next) if next == to => {
                self.stage = to;
                Ok(())
            }
            next => Err(Error::PassOrder {
                expected: next.unwrap_or(self.stage),
                found: to,
            }),
        }
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The nodes of `block` in evaluation order.
    #[must_use]
    pub fn block_nodes(&self, block: usize) -> &[NodeRef] {
        self.blocks.get(block).map_or(&[], Vec::as_slice)
    }

    /// Predecessor blocks of `block`, in the order phi operands follow.
    #[must_use]
    pub fn predecessors(&self, block: usize) -> Vec<usize> {
        let mut preds: Vec<usize> = self
            .cfg
            .predecessors(NodeId::new(block))
            .map(NodeId::index)
            .collect();
        preds.sort_unstable();
        preds.dedup();
        preds
    }

    /// Successor blocks of `block`, in edge order.
    #[must_use]
    pub fn successors(&self, block: usize) -> Vec<usize> {
        self.cfg
            .successors(NodeId::new(block))
            .map(NodeId::index)
            .collect()
    }

    /// The node behind `node`, if it still exists.
    #[must_use]
    pub fn get(&self, node: NodeRef) -> Option<&Node> {
        self.nodes.get(node.index()).and_then(Option::as_ref)
    }

    /// Returns `true` if `node` exists.
    #[must_use]
    pub fn contains(&self, node: NodeRef) -> bool {
        self.get(node).is_some()
    }

    pub(crate) fn get_mut(&mut self, node: NodeRef) -> Option<&mut Node> {
        self.nodes.get_mut(node.index()).and_then(Option::as_mut)
    }

    fn live(&self, node: NodeRef) -> Result<&Node> {
        self.get(node)
            .ok_or_else(|| structural_error!("Reference to removed node {}", node))
    }

    /// Users of `node`, one entry per operand slot referencing it.
    #[must_use]
    pub fn uses(&self, node: NodeRef) -> &[NodeRef] {
        self.uses.get(node.index()).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if nothing references `node`.
    #[must_use]
    pub fn is_unused(&self, node: NodeRef) -> bool {
        self.uses(node).is_empty()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Returns `true` if the graph holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live nodes in block order, then evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &Node)> + '_ {
        self.blocks
            .iter()
            .flatten()
            .filter_map(move |&r| self.get(r).map(|n| (r, n)))
    }

    /// Snapshot of all live node references in block order.
    #[must_use]
    pub fn node_refs(&self) -> Vec<NodeRef> {
        self.blocks.iter().flatten().copied().collect()
    }

    fn create(&mut self, kind: NodeKind, operands: Vec<NodeRef>, block: usize) -> NodeRef {
        let node = NodeRef::new(self.nodes.len());
        for &operand in &operands {
            if let Some(users) = self.uses.get_mut(operand.index()) {
                users.push(node);
            }
        }
        self.nodes.push(Some(Node::new(kind, operands, block)));
        self.uses.push(Vec::new());
        node
    }

    /// Appends a node at the end of `block`.
    pub fn append(&mut self, block: usize, kind: NodeKind, operands: Vec<NodeRef>) -> NodeRef {
        let node = self.create(kind, operands, block);
        self.blocks[block].push(node);
        node
    }

    /// Inserts a node at `position` in `block`.
    pub fn insert_at(
        &mut self,
        block: usize,
        position: usize,
        kind: NodeKind,
        operands: Vec<NodeRef>,
    ) -> NodeRef {
        let node = self.create(kind, operands, block);
        let list = &mut self.blocks[block];
        list.insert(position.min(list.len()), node);
        node
    }

    /// Index of `node` within its block.
    #[must_use]
    pub fn position(&self, node: NodeRef) -> Option<usize> {
        let block = self.get(node)?.block;
        self.blocks[block].iter().position(|&r| r == node)
    }

    /// Inserts a node directly before `anchor`.
    ///
    /// # Errors
    /// Returns [`Error::Structural`] if `anchor` was removed.
    pub fn insert_before(
        &mut self,
        anchor: NodeRef,
        kind: NodeKind,
        operands: Vec<NodeRef>,
    ) -> Result<NodeRef> {
        let block = self.live(anchor)?.block;
        let position = self
            .position(anchor)
            .ok_or_else(|| structural_error!("Node {} is not placed in a block", anchor))?;
        Ok(self.insert_at(block, position, kind, operands))
    }

    /// Inserts a node before the control node ending `block`, or at its end.
    pub fn insert_before_control(
        &mut self,
        block: usize,
        kind: NodeKind,
        operands: Vec<NodeRef>,
    ) -> NodeRef {
        let position = match self.control(block) {
            Some(_) => self.blocks[block].len() - 1,
            None => self.blocks[block].len(),
        };
        self.insert_at(block, position, kind, operands)
    }

    /// Moves `node` directly before `anchor`, which must be in the same block.
    ///
    /// # Errors
    /// Returns [`Error::Structural`] if the nodes are in different blocks.
    pub fn move_before(&mut self, node: NodeRef, anchor: NodeRef) -> Result<()> {
        let block = self.live(node)?.block;
        if self.live(anchor)?.block != block {
            return Err(structural_error!(
                "Cannot move {} before {} across blocks",
                node,
                anchor
            ));
        }
        self.blocks[block].retain(|&r| r != node);
        let position = self
            .position(anchor)
            .ok_or_else(|| structural_error!("Node {} is not placed in a block", anchor))?;
        self.blocks[block].insert(position, node);
        Ok(())
    }

    /// The control node ending `block`, if it has one.
    #[must_use]
    pub fn control(&self, block: usize) -> Option<NodeRef> {
        let last = *self.blocks.get(block)?.last()?;
        self.get(last)
            .filter(|n| n.kind.is_control())
            .map(|_| last)
    }

    /// Replaces operand `index` of `user` with `new`.
    ///
    /// # Errors
    /// Returns [`Error::Structural`] if either node was removed or the index is out of range.
    pub fn replace_operand(&mut self, user: NodeRef, index: usize, new: NodeRef) -> Result<()> {
        self.live(new)?;
        let old = {
            let node = self
                .get_mut(user)
                .ok_or_else(|| structural_error!("Reference to removed node {}", user))?;
            let slot = node.operands.get_mut(index).ok_or_else(|| {
                structural_error!("Node {} has no operand {}", user, index)
            })?;
            std::mem::replace(slot, new)
        };
        self.drop_use(old, user);
        self.uses[new.index()].push(user);
        Ok(())
    }

    /// Replaces the whole operand list of `node`.
    pub fn set_operands(&mut self, node: NodeRef, operands: Vec<NodeRef>) -> Result<()> {
        for &operand in &operands {
            self.live(operand)?;
        }
        let old = match self.get_mut(node) {
            Some(n) => std::mem::replace(&mut n.operands, operands.clone()),
            None => return Err(structural_error!("Reference to removed node {}", node)),
        };
        for operand in old {
            self.drop_use(operand, node);
        }
        for operand in operands {
            self.uses[operand.index()].push(node);
        }
        Ok(())
    }

    fn drop_use(&mut self, definition: NodeRef, user: NodeRef) {
        if let Some(users) = self.uses.get_mut(definition.index()) {
            if let Some(pos) = users.iter().position(|&u| u == user) {
                users.swap_remove(pos);
            }
        }
    }

    /// Redirects every use of `old` to `new`; returns the number of rewritten operands.
    pub fn replace_all_uses(&mut self, old: NodeRef, new: NodeRef) -> usize {
        if old == new {
            return 0;
        }
        let users = std::mem::take(&mut self.uses[old.index()]);
        let mut count = 0;
        for &user in &users {
            if let Some(node) = self.nodes[user.index()].as_mut() {
                for operand in node.operands.iter_mut().filter(|o| **o == old) {
                    *operand = new;
                    count += 1;
                }
            }
        }
        let mut seen = Vec::new();
        for user in users {
            if seen.contains(&user) {
                continue;
            }
            seen.push(user);
            let references = self.nodes[user.index()]
                .as_ref()
                .map_or(0, |n| n.operands.iter().filter(|&&o| o == new).count());
            let known = self.uses[new.index()].iter().filter(|&&u| u == user).count();
            for _ in known..references {
                self.uses[new.index()].push(user);
            }
        }
        count
    }

    /// Removes an unused node.
    ///
    /// # Errors
    /// Returns [`Error::Structural`] if the node still has users.
    pub fn remove(&mut self, node: NodeRef) -> Result<()> {
        if !self.is_unused(node) {
            return Err(structural_error!(
                "Cannot remove {} with {} remaining uses",
                node,
                self.uses(node).len()
            ));
        }
        let Some(removed) = self.nodes.get_mut(node.index()).and_then(Option::take) else {
            return Err(structural_error!("Node {} removed twice", node));
        };
        for operand in removed.operands {
            self.drop_use(operand, node);
        }
        self.blocks[removed.block].retain(|&r| r != node);
        Ok(())
    }

    /// Changes the operation of a node, keeping operands and uses.
    pub fn set_kind(&mut self, node: NodeRef, kind: NodeKind) -> Result<()> {
        let n = self
            .get_mut(node)
            .ok_or_else(|| structural_error!("Reference to removed node {}", node))?;
        n.kind = kind;
        Ok(())
    }

    /// Joins `ty` into the type of `node`; returns `true` if the type changed.
    pub fn join_type(&mut self, node: NodeRef, ty: &Type) -> bool {
        let Some(n) = self.get_mut(node) else {
            return false;
        };
        let joined = n.ty.join(ty);
        if joined == n.ty {
            return false;
        }
        n.ty = joined;
        true
    }

    /// Adds `flags` to a node.
    pub fn add_flags(&mut self, node: NodeRef, flags: NodeFlags) {
        if let Some(n) = self.get_mut(node) {
            n.flags |= flags;
        }
    }

    /// Sets the source name of a node.
    pub fn set_name(&mut self, node: NodeRef, name: String) {
        if let Some(n) = self.get_mut(node) {
            n.name = Some(name);
        }
    }

    /// Returns `true` if two address expressions denote the same location.
    ///
    /// Variables compare by identity; constants, globals and address arithmetic compare by
    /// structure.
    #[must_use]
    pub fn same_location(&self, a: NodeRef, b: NodeRef) -> bool {
        if a == b {
            return true;
        }
        let (Some(na), Some(nb)) = (self.get(a), self.get(b)) else {
            return false;
        };
        if na.kind != nb.kind || na.operands.len() != nb.operands.len() {
            return false;
        }
        match na.kind {
            NodeKind::Constant(_) | NodeKind::GlobalRef(_) => true,
            NodeKind::LocalRef
            | NodeKind::Index
            | NodeKind::ArrayRef
            | NodeKind::Load
            | NodeKind::Binary(_)
            | NodeKind::Unary(_) => na
                .operands
                .iter()
                .zip(&nb.operands)
                .all(|(&x, &y)| self.same_location(x, y)),
            _ => false,
        }
    }

    /// The variable a `LocalRef` points at.
    #[must_use]
    pub fn referenced_variable(&self, address: NodeRef) -> Option<NodeRef> {
        let node = self.get(address)?;
        match node.kind {
            NodeKind::LocalRef => node.operand(0),
            _ => None,
        }
    }

    /// The variable at the root of an address expression (`a` in `a[i][j]`).
    #[must_use]
    pub fn root_variable(&self, address: NodeRef) -> Option<NodeRef> {
        let node = self.get(address)?;
        match node.kind {
            NodeKind::LocalRef => node.operand(0),
            NodeKind::Index | NodeKind::ArrayRef | NodeKind::Load => {
                self.root_variable(node.operand(0)?)
            }
            _ => None,
        }
    }

    /// Checks the structural invariants of the graph.
    ///
    /// - every operand references a live node and is recorded in its use list
    /// - every phi has exactly one operand per predecessor
    /// - every block ends with exactly one control node
    /// - operand edges form no cycle except through phi operands
    ///
    /// # Errors
    /// Returns [`Error::Structural`] describing the first violation.
    pub fn verify(&self) -> Result<()> {
        for (block, list) in self.blocks.iter().enumerate() {
            let preds = self.predecessors(block).len();
            for (position, &r) in list.iter().enumerate() {
                let node = self.live(r)?;
                if node.block != block {
                    return Err(structural_error!(
                        "Node {} listed in block {} but owned by {}",
                        r,
                        block,
                        node.block
                    ));
                }
                for &operand in &node.operands {
                    if self.get(operand).is_none() {
                        return Err(structural_error!(
                            "Node {} references removed node {}",
                            r,
                            operand
                        ));
                    }
                    if !self.uses(operand).contains(&r) {
                        return Err(structural_error!(
                            "Use of {} by {} is not recorded",
                            operand,
                            r
                        ));
                    }
                }
                if node.kind == NodeKind::Phi && node.operands.len() != preds {
                    return Err(structural_error!(
                        "Phi {} has {} operands for {} predecessors",
                        r,
                        node.operands.len(),
                        preds
                    ));
                }
                let is_last = position + 1 == list.len();
                if node.kind.is_control() != is_last {
                    return Err(structural_error!(
                        "Block {} does not end in exactly one control node",
                        block
                    ));
                }
            }
            if list.is_empty() {
                return Err(structural_error!("Block {} has no nodes", block));
            }
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        for start in self.node_refs() {
            if marks[start.index()] != Mark::New {
                continue;
            }
            let mut stack: Vec<(NodeRef, usize)> = vec![(start, 0)];
            marks[start.index()] = Mark::Active;
            while let Some(&(node, next)) = stack.last() {
                let n = self.live(node)?;
                let operand = if n.kind == NodeKind::Phi {
                    None
                } else {
                    n.operands.get(next).copied()
                };
                let Some(operand) = operand else {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks[operand.index()] {
                    Mark::Active => {
                        return Err(structural_error!(
                            "Operand cycle through {} and {}",
                            node,
                            operand
                        ));
                    }
                    Mark::New => {
                        marks[operand.index()] = Mark::Active;
                        stack.push((operand, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGraph")
            .field("stage", &self.stage)
            .field("cfg", &self.cfg)
            .field("blocks", &self.blocks.len())
            .field("nodes", &self.len())
            .finish_non_exhaustive()
    }
}

impl Index<NodeRef> for NodeGraph {
    type Output = Node;

    /// # Panics
    /// Panics if the node was removed.
    fn index(&self, node: NodeRef) -> &Node {
        match self.get(node) {
            Some(n) => n,
            None => panic!("access to removed node {node}"),
        }
    }
}
