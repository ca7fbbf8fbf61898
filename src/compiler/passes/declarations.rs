//! Declaration coalescing pass.
//!
//! Locals are allocated at the top of their scope and assigned later. When nothing can
//! observe the variable in between, the first assignment is folded into the declaration.
//!
//! # Example
//!
//! Before:
//! ```text
//! n2 = local -4
//! n5 = add n3, n4
//! n6 = localref n2
//! n7 = store n6, n5
//! ```
//!
//! After:
//! ```text
//! n5 = add n3, n4
//! n2 = local -4 [n5]        // new x = a + b
//! ```
//!
//! Scanning starts at the declaration and stops at the first effect, control node, or
//! read of the variable. An aggregate initializer folds the same way as a store.

use log::debug;

use crate::{
    analysis::{NodeGraph, NodeKind, NodeRef},
    compiler::{NodePass, PassContext, Stage},
    Result,
};

/// Declaration coalescing pass.
pub struct DeclarationCoalescingPass;

impl Default for DeclarationCoalescingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl DeclarationCoalescingPass {
    /// Creates a new declaration coalescing pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Finds the first write of `declaration` that can become its initializer.
    ///
    /// Returns the writing node and the value to fold.
    fn first_write(graph: &NodeGraph, declaration: NodeRef) -> Option<(NodeRef, NodeRef)> {
        let d = graph.get(declaration)?;
        if !matches!(d.kind, NodeKind::DeclareLocal { .. }) || !d.operands().is_empty() {
            return None;
        }
        let start = graph.position(declaration)?;

        for &node in &graph.block_nodes(d.block)[start + 1..] {
            let n = graph.get(node)?;
            let target = n
                .operand(0)
                .and_then(|address| graph.referenced_variable(address));

            match n.kind {
                NodeKind::Store | NodeKind::Initialize if target == Some(declaration) => {
                    let value = n.operand(1)?;
                    if graph.root_variable(value) == Some(declaration) {
                        return None;
                    }
                    return Some((node, value));
                }
                NodeKind::Load if graph.root_variable(node) == Some(declaration) => return None,
                ref kind if kind.is_effect() || kind.is_control() => return None,
                _ => {}
            }
        }
        None
    }

    fn fold(graph: &mut NodeGraph, declaration: NodeRef, write: NodeRef, value: NodeRef) -> Result<()> {
        let address = graph[write].operand(0);
        graph.move_before(declaration, write)?;
        graph.set_operands(declaration, vec![value])?;
        graph.set_operands(write, Vec::new())?;
        graph.remove(write)?;
        if let Some(address) = address {
            if graph.contains(address) && graph.is_unused(address) {
                graph.remove(address)?;
            }
        }
        Ok(())
    }
}

impl NodePass for DeclarationCoalescingPass {
    fn name(&self) -> &'static str {
        "declaration-coalescing"
    }

    fn stage(&self) -> Stage {
        Stage::DeclarationsCoalesced
    }

    fn description(&self) -> &'static str {
        "Folds the first assignment of a local into its declaration"
    }

    fn run(&self, graph: &mut NodeGraph, _ctx: &PassContext<'_>) -> Result<bool> {
        let declarations: Vec<NodeRef> = graph
            .iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::DeclareLocal { .. }))
            .map(|(r, _)| r)
            .collect();

        let mut count = 0;
        for declaration in declarations {
            if let Some((write, value)) = Self::first_write(graph, declaration) {
                Self::fold(graph, declaration, write, value)?;
                count += 1;
            }
        }
        debug!("coalesced {count} declarations");
        Ok(count > 0)
    }
}
