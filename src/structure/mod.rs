//! Control flow structuring.
//!
//! Turns the basic blocks of a fully processed node graph into a tree of high level
//! constructs:
//!
//! - [`ControlBlock`] / [`Condition`] / [`SwitchCase`] - the structured tree
//! - [`StructureBuilder`] - recovers conditionals, loops and switches from the graph
//!
//! # Approach
//!
//! Structuring walks the blocks from the entry and places each one exactly once:
//!
//! 1. Conditions made of several blocks are folded into `&&` and `||` first.
//! 2. Two-way branches become [`ControlBlock::If`], rejoining at the immediate
//!    post-dominator of the branch computed without back edges.
//! 3. Natural loops become [`ControlBlock::While`]; inside a loop, edges to its header
//!    and its follow block become `continue` and `break`. Loops whose header only tests
//!    are turned into pre-tested loops and counting loops into [`ControlBlock::For`].
//! 4. Switches dispatch to one arm per distinct target.
//!
//! Values merged by phis are assigned on the edge that reaches the phi: inside the arm
//! taking the edge, or just before the jump or fallthrough that follows it.
//!
//! Anything else, such as a jump into the middle of an already placed region, becomes a
//! [`ControlBlock::Goto`] to a [`ControlBlock::Labeled`] block.

mod block;
mod builder;
mod simplify;

pub use block::{Condition, ControlBlock, SwitchCase};
pub use builder::StructureBuilder;

use crate::analysis::{Node, NodeFlags, NodeGraph, NodeKind, NodeRef};

/// Returns `true` if `node` is printed inside its user rather than as a statement.
pub(crate) fn is_inline_value(node: &Node) -> bool {
    !(node.kind.is_effect()
        || node.kind.is_variable()
        || node.kind == NodeKind::Phi
        || node.flags.contains(NodeFlags::MATERIALIZED))
}

/// Returns `true` if `block` has phis.
pub(crate) fn has_phis(graph: &NodeGraph, block: usize) -> bool {
    graph
        .block_nodes(block)
        .iter()
        .any(|&n| graph[n].kind == NodeKind::Phi)
}

/// The `(phi, value)` assignments the edge from `from` to `to` performs, skipping phis
/// that receive themselves.
pub(crate) fn edge_moves(graph: &NodeGraph, from: usize, to: usize) -> Vec<(NodeRef, NodeRef)> {
    let Some(index) = graph.predecessors(to).iter().position(|&p| p == from) else {
        return Vec::new();
    };
    graph
        .block_nodes(to)
        .iter()
        .filter(|&&phi| graph[phi].kind == NodeKind::Phi)
        .filter_map(|&phi| {
            graph[phi]
                .operand(index)
                .filter(|&value| value != phi)
                .map(|value| (phi, value))
        })
        .collect()
}

/// Returns `true` if `block` computes nothing but the value of its conditional branch.
///
/// Such a block can be evaluated as part of a condition expression. Its successors must
/// not merge values, since the moves into their phis would have nowhere to go.
pub(crate) fn is_condition_block(graph: &NodeGraph, block: usize) -> bool {
    let Some(control) = graph.control(block) else {
        return false;
    };
    if !matches!(graph[control].kind, NodeKind::JumpCondition { .. }) {
        return false;
    }
    graph
        .block_nodes(block)
        .iter()
        .all(|&n| n == control || is_inline_value(&graph[n]))
        && graph
            .successors(block)
            .into_iter()
            .all(|s| !has_phis(graph, s))
}
