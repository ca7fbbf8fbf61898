//! Stack slot and branch rewriting pass.
//!
//! The builder models every push as a stack slot. Most of them are transient: call
//! arguments, saved registers, spilled temporaries. This pass separates those from real
//! local variables and normalizes conditional branches.
//!
//! # Example
//!
//! Before:
//! ```text
//! n4 = slot -4 [n2]          // never addressed
//! n5 = slot -8               // addressed below
//! n6 = localref n5
//! n7 = store n6, n3
//! n8 = call 0x40 [n4]
//! n9 = jcond.zero n1
//! ```
//!
//! After:
//! ```text
//! n5 = local -8
//! n6 = localref n5
//! n7 = store n6, n3
//! n8 = call 0x40 [n2]
//! n10 = not n1
//! n9 = jcond n10
//! ```
//!
//! # Rules
//!
//! - a slot whose address is taken becomes a [`NodeKind::DeclareLocal`], keeping its
//!   initial value as operand
//! - any other slot is replaced by its initial value in all uses and removed
//! - a branch taken on zero is rewritten to branch on the negated condition, negating a
//!   comparison operator in place where possible

use log::debug;

use crate::{
    analysis::{NodeGraph, NodeKind, NodeRef, UnaryOp},
    compiler::{NodePass, PassContext, Stage},
    Result,
};

/// Stack slot and branch rewriting pass.
pub struct RewritePass;

impl Default for RewritePass {
    fn default() -> Self {
        Self::new()
    }
}

impl RewritePass {
    /// Creates a new rewriting pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_addressed(graph: &NodeGraph, slot: NodeRef) -> bool {
        graph
            .uses(slot)
            .iter()
            .any(|&u| graph.get(u).is_some_and(|n| n.kind == NodeKind::LocalRef))
    }

    /// Rewrites one stack slot. Returns `true` if the graph changed.
    fn rewrite_slot(graph: &mut NodeGraph, slot: NodeRef) -> Result<bool> {
        let (offset, cells, init) = match graph.get(slot) {
            Some(n) => match n.kind {
                NodeKind::StackSlot { offset, cells } => (offset, cells, n.operand(0)),
                _ => return Ok(false),
            },
            None => return Ok(false),
        };

        if Self::is_addressed(graph, slot) {
            graph.set_kind(slot, NodeKind::DeclareLocal { offset, cells })?;
            return Ok(true);
        }
        match init {
            Some(value) => {
                graph.replace_all_uses(slot, value);
                graph.remove(slot)?;
            }
            None if graph.is_unused(slot) => graph.remove(slot)?,
            None => graph.set_kind(slot, NodeKind::DeclareLocal { offset, cells })?,
        }
        Ok(true)
    }

    /// Normalizes a branch taken on zero. Returns `true` if the graph changed.
    fn normalize_branch(graph: &mut NodeGraph, branch: NodeRef) -> Result<bool> {
        let condition = match graph.get(branch) {
            Some(n) if n.kind == (NodeKind::JumpCondition { on_zero: true }) => n.operand(0),
            _ => return Ok(false),
        };
        let Some(condition) = condition else {
            return Ok(false);
        };

        let (kind, operands) = {
            let c = &graph[condition];
            (c.kind.clone(), c.operands().to_vec())
        };
        let shared = graph.uses(condition).len() > 1;

        let negated = match kind {
            NodeKind::Binary(op) => op.negated().map(|neg| (neg, operands.clone())),
            _ => None,
        };

        match (negated, kind) {
            (Some((op, _)), _) if !shared => {
                graph.set_kind(condition, NodeKind::Binary(op))?;
            }
            (Some((op, operands)), _) => {
                let fresh = graph.insert_before(branch, NodeKind::Binary(op), operands)?;
                graph.replace_operand(branch, 0, fresh)?;
            }
            (None, NodeKind::Unary(UnaryOp::Not)) => {
                // Branching on zero of `!x` is branching on `x`.
                graph.replace_operand(branch, 0, operands[0])?;
                if graph.is_unused(condition) {
                    graph.remove(condition)?;
                }
            }
            (None, _) => {
                let not = graph.insert_before(branch, NodeKind::Unary(UnaryOp::Not), vec![condition])?;
                graph.replace_operand(branch, 0, not)?;
            }
        }
        graph.set_kind(branch, NodeKind::JumpCondition { on_zero: false })?;
        Ok(true)
    }
}

impl NodePass for RewritePass {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    fn stage(&self) -> Stage {
        Stage::Rewritten
    }

    fn description(&self) -> &'static str {
        "Turns stack slots into locals or inlined values and normalizes branches"
    }

    fn run(&self, graph: &mut NodeGraph, _ctx: &PassContext<'_>) -> Result<bool> {
        let mut slots = 0;
        let mut branches = 0;

        for node in graph.node_refs() {
            if Self::rewrite_slot(graph, node)? {
                slots += 1;
            }
        }
        for block in 0..graph.block_count() {
            if let Some(branch) = graph.control(block) {
                if Self::normalize_branch(graph, branch)? {
                    branches += 1;
                }
            }
        }

        debug!("rewrote {slots} stack slots and {branches} branches");
        Ok(slots + branches > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::BinaryOp, assembly::Assembler, disassembler::Opcode, program::Program,
        test::graph_at,
    };

    #[test]
    fn test_call_argument_slots_are_inlined() {
        // new x = 5; f(x)
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::PushC, &[5]).unwrap();
        asm.emit(Opcode::PushS, &[-4]).unwrap();
        asm.emit(Opcode::PushC, &[4]).unwrap();
        asm.emit_branch(Opcode::Call, "callee").unwrap();
        asm.emit(Opcode::Stack, &[4]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("callee").unwrap();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::Rewritten).unwrap();
        assert!(!graph
            .iter()
            .any(|(_, n)| matches!(n.kind, NodeKind::StackSlot { .. })));

        let (local, init) = graph
            .iter()
            .find_map(|(r, n)| match n.kind {
                NodeKind::DeclareLocal { offset: -4, cells: 1 } => Some((r, n.operand(0))),
                _ => None,
            })
            .unwrap();
        assert_eq!(graph[init.unwrap()].as_constant(), Some(5));

        let call = graph
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::Call(_)))
            .map(|(r, _)| r)
            .unwrap();
        let argument = graph[call].operand(0).unwrap();
        assert_eq!(graph[argument].kind, NodeKind::Load);
        let address = graph[argument].operand(0).unwrap();
        assert_eq!(graph.referenced_variable(address), Some(local));
    }

    #[test]
    fn test_branch_on_zero_negates_comparison() {
        // if (arg0 < 3) return 1; return 0   compiled as  jzer over the then-branch
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::ConstAlt, &[3]).unwrap();
        asm.emit(Opcode::Sless, &[]).unwrap();
        asm.emit_branch(Opcode::Jzer, "else").unwrap();
        asm.emit(Opcode::ConstPri, &[1]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("else").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::Rewritten).unwrap();
        let branch = graph.control(0).unwrap();
        assert_eq!(graph[branch].kind, NodeKind::JumpCondition { on_zero: false });
        let condition = graph[branch].operand(0).unwrap();
        assert_eq!(graph[condition].kind, NodeKind::Binary(BinaryOp::Ge));
    }

    #[test]
    fn test_branch_on_zero_of_plain_value() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit_branch(Opcode::Jzer, "else").unwrap();
        asm.emit(Opcode::ConstPri, &[1]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("else").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let mut graph = graph_at(&program, 0, Stage::Rewritten).unwrap();
        let branch = graph.control(0).unwrap();
        let condition = graph[branch].operand(0).unwrap();
        assert_eq!(graph[condition].kind, NodeKind::Unary(UnaryOp::Not));

        // Running again finds nothing left to do.
        let ctx = PassContext::new(&program, &program.functions()[0]);
        assert!(!RewritePass::new().run(&mut graph, &ctx).unwrap());
    }
}
