//! Bounds guard removal pass.
//!
//! Array indexing is compiled with an explicit bounds check on the index. The check is
//! implied by the element access in source, so it is dropped when:
//!
//! - the index is a constant, checked at compile time already
//! - the index feeds an element access (`Index` or `ArrayRef` index operand)
//!
//! Guards on values that never reach an element access are kept and printed as comments.

use log::debug;

use crate::{
    analysis::{NodeGraph, NodeKind, NodeRef},
    compiler::{NodePass, PassContext, Stage},
    Result,
};

/// Bounds guard removal pass.
pub struct GuardRemovalPass;

impl Default for GuardRemovalPass {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardRemovalPass {
    /// Creates a new guard removal pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_redundant(graph: &NodeGraph, guard: NodeRef) -> bool {
        let Some(index) = graph.get(guard).and_then(|g| g.operand(0)) else {
            return false;
        };
        if graph[index].as_constant().is_some() {
            return true;
        }
        graph.uses(index).iter().any(|&user| {
            let u = &graph[user];
            u.kind.is_element_address() && u.operand(1) == Some(index)
        })
    }
}

impl NodePass for GuardRemovalPass {
    fn name(&self) -> &'static str {
        "guard-removal"
    }

    fn stage(&self) -> Stage {
        Stage::GuardsRemoved
    }

    fn description(&self) -> &'static str {
        "Removes bounds checks implied by element accesses"
    }

    fn run(&self, graph: &mut NodeGraph, _ctx: &PassContext<'_>) -> Result<bool> {
        let guards: Vec<NodeRef> = graph
            .iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Bounds(_)))
            .map(|(r, _)| r)
            .filter(|&r| Self::is_redundant(graph, r))
            .collect();
        for &guard in &guards {
            graph.remove(guard)?;
        }
        debug!("removed {} bounds guards", guards.len());
        Ok(!guards.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::Assembler, disassembler::Opcode, program::Program, test::graph_at};

    fn program(asm: Assembler) -> Program {
        Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build()
    }

    #[test]
    fn test_guard_on_element_index_removed() {
        // return arg0[arg1] with bounds check
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[16]).unwrap();
        asm.emit(Opcode::Bounds, &[9]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[12]).unwrap();
        asm.emit(Opcode::Lidx, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let graph = graph_at(&program(asm), 0, Stage::GuardsRemoved).unwrap();
        assert!(!graph.iter().any(|(_, n)| matches!(n.kind, NodeKind::Bounds(_))));
    }

    #[test]
    fn test_unrelated_guard_kept() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::Bounds, &[9]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let graph = graph_at(&program(asm), 0, Stage::GuardsRemoved).unwrap();
        assert!(graph.iter().any(|(_, n)| n.kind == NodeKind::Bounds(9)));
    }
}
