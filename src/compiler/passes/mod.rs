//! Node graph passes.
//!
//! Each pass completes one [`crate::compiler::Stage`] of the pipeline:
//!
//! - [`DeadCodeEliminationPass`] - removes unreferenced pure nodes (runs twice)
//! - [`RewritePass`] - turns stack slots into locals or inlined values, normalizes branches
//! - [`ArrayCollapsePass`] - recognizes element accesses, syntactically and by type
//! - [`LoadStoreCoalescingPass`] - `x = x op v` into `x op= v`, `x++`, `x--`
//! - [`MemCopyPass`] - block copies and fills into aggregate initializers
//! - [`HeapAnalysisPass`] - heap temporaries passed to a call become plain values
//! - [`GuardRemovalPass`] - drops bounds checks the source would not show
//! - [`RenamePass`] - final names for variables and materialized temporaries
//! - [`DeclarationCoalescingPass`] - `new x; x = v` into `new x = v`
//!
//! Type propagation lives with the type lattice in [`crate::analysis`].

mod arrays;
mod coalesce;
mod deadcode;
mod declarations;
mod guards;
mod heap;
mod memcopy;
mod rename;
mod rewrite;

pub use arrays::ArrayCollapsePass;
pub use coalesce::LoadStoreCoalescingPass;
pub use deadcode::DeadCodeEliminationPass;
pub use declarations::DeclarationCoalescingPass;
pub use guards::GuardRemovalPass;
pub use heap::HeapAnalysisPass;
pub use memcopy::MemCopyPass;
pub use rename::RenamePass;
pub use rewrite::RewritePass;

use crate::analysis::{NodeGraph, NodeKind, NodeRef};

/// Returns `true` if a node between `from` and `to` (exclusive) in their shared block may
/// write memory. Nodes in different blocks are always considered separated by a write.
pub(crate) fn write_between(graph: &NodeGraph, from: NodeRef, to: NodeRef) -> bool {
    let (Some(a), Some(b)) = (graph.get(from), graph.get(to)) else {
        return true;
    };
    if a.block != b.block {
        return true;
    }
    let (Some(start), Some(end)) = (graph.position(from), graph.position(to)) else {
        return true;
    };
    if start > end {
        return true;
    }
    graph.block_nodes(a.block)[start + 1..end]
        .iter()
        .any(|&n| graph.get(n).is_some_and(|n| n.kind.writes_memory()))
}

/// Removes `node` and then every operand left unused and removable by that removal.
pub(crate) fn remove_with_operands(graph: &mut NodeGraph, node: NodeRef) -> crate::Result<()> {
    let operands = graph
        .get(node)
        .map(|n| n.operands().to_vec())
        .unwrap_or_default();
    graph.remove(node)?;
    for operand in operands {
        let removable = graph
            .get(operand)
            .is_some_and(|n| n.kind.is_removable() && !matches!(n.kind, NodeKind::Phi));
        if removable && graph.is_unused(operand) {
            remove_with_operands(graph, operand)?;
        }
    }
    Ok(())
}
