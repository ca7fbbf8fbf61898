//! Dead code elimination pass.
//!
//! Removes pure nodes whose values are never observed. Liveness is computed by marking,
//! rather than by counting uses, so that phi cycles kept alive only by each other are
//! removed as well.
//!
//! # Example
//!
//! Before:
//! ```text
//! n3 = phi(n1, n5)
//! n5 = add n3, 1      // only used by n3
//! n7 = const 4
//! ret n1
//! ```
//!
//! After:
//! ```text
//! ret n1
//! ```
//!
//! # Roots
//!
//! Everything that is not [`NodeKind::is_removable`] is live: control nodes, effects,
//! arguments and declared locals. A node is live if a live node uses it. The pass is
//! idempotent; a second run on its own output finds nothing to remove.

use std::collections::HashSet;

use log::debug;

use crate::{
    analysis::{NodeGraph, NodeRef},
    compiler::{NodePass, PassContext, Stage},
    Result,
};

/// Dead code elimination pass.
pub struct DeadCodeEliminationPass {
    stage: Stage,
}

impl Default for DeadCodeEliminationPass {
    fn default() -> Self {
        Self::new(Stage::Cleaned)
    }
}

impl DeadCodeEliminationPass {
    /// Creates a pass completing `stage`.
    ///
    /// The pipeline runs it as [`Stage::Cleaned`] right after building and as
    /// [`Stage::Pruned`] after guard removal.
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self { stage }
    }

    /// Computes the set of live nodes.
    fn mark(graph: &NodeGraph) -> HashSet<NodeRef> {
        let mut live = HashSet::new();
        let mut worklist: Vec<NodeRef> = graph
            .iter()
            .filter(|(_, n)| !n.kind.is_removable())
            .map(|(r, _)| r)
            .collect();

        while let Some(node) = worklist.pop() {
            if !live.insert(node) {
                continue;
            }
            if let Some(n) = graph.get(node) {
                worklist.extend(n.operands().iter().filter(|o| !live.contains(o)));
            }
        }
        live
    }
}

impl NodePass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn description(&self) -> &'static str {
        "Removes pure nodes whose value is never used"
    }

    fn run(&self, graph: &mut NodeGraph, _ctx: &PassContext<'_>) -> Result<bool> {
        let live = Self::mark(graph);
        let dead: Vec<NodeRef> = graph
            .node_refs()
            .into_iter()
            .filter(|r| !live.contains(r))
            .collect();
        if dead.is_empty() {
            return Ok(false);
        }

        // Dead nodes are only used by other dead nodes; cut those edges first.
        for &node in &dead {
            graph.set_operands(node, Vec::new())?;
        }
        for &node in &dead {
            graph.remove(node)?;
        }
        debug!("removed {} dead nodes", dead.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{NodeBuilder, NodeKind},
        assembly::Assembler,
        disassembler::Opcode,
        program::Program,
    };

    fn looping_program() -> Program {
        // i = 0; do { i++ } while (i < 10); return 0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.define_label("top").unwrap();
        asm.emit(Opcode::IncPri, &[]).unwrap();
        asm.emit(Opcode::ConstAlt, &[10]).unwrap();
        asm.emit_branch(Opcode::Jsless, "top").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build()
    }

    #[test]
    fn test_removes_unused_constants() {
        let program = looping_program();
        let function = &program.functions()[0];
        let mut graph = NodeBuilder::new(&program, function).build().unwrap();
        let ctx = PassContext::new(&program, function);
        let before = graph.len();

        // The loop counter feeds the branch and survives.
        let pass = DeadCodeEliminationPass::new(Stage::Cleaned);
        pass.apply(&mut graph, &ctx).unwrap();
        assert!(graph.len() <= before);
        assert!(graph
            .iter()
            .any(|(_, n)| matches!(n.kind, NodeKind::Phi)));
        graph.verify().unwrap();
    }

    #[test]
    fn test_idempotent() {
        let program = looping_program();
        let function = &program.functions()[0];
        let mut graph = NodeBuilder::new(&program, function).build().unwrap();
        let ctx = PassContext::new(&program, function);

        let pass = DeadCodeEliminationPass::new(Stage::Cleaned);
        pass.apply(&mut graph, &ctx).unwrap();
        let after_first = graph.len();
        assert!(!pass.run(&mut graph, &ctx).unwrap());
        assert_eq!(graph.len(), after_first);
    }

    #[test]
    fn test_dead_phi_cycle_removed() {
        let program = looping_program();
        let function = &program.functions()[0];
        let mut graph = NodeBuilder::new(&program, function).build().unwrap();
        let ctx = PassContext::new(&program, function);

        // Detach the branch from the counter: the phi and its increment only keep each
        // other alive.
        let header = graph.cfg().loops()[0].header.index();
        let branch = graph.control(header).unwrap();
        let zero = graph.insert_before_control(0, NodeKind::Constant(0), vec![]);
        graph.set_operands(branch, vec![zero]).unwrap();

        let pass = DeadCodeEliminationPass::new(Stage::Cleaned);
        assert!(pass.apply(&mut graph, &ctx).unwrap());
        assert!(!graph.iter().any(|(_, n)| matches!(n.kind, NodeKind::Phi)));
    }
}
