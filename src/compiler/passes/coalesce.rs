//! Load/store coalescing pass.
//!
//! Recognizes read-modify-write sequences on one location and folds them into compound
//! assignments.
//!
//! # Example
//!
//! Before:
//! ```text
//! n4 = load n3
//! n6 = add n4, n5
//! n7 = store n3', n6      // n3' denotes the same location as n3
//! ```
//!
//! After:
//! ```text
//! n7 = store.add n3', n5  // x += v
//! ```
//!
//! A step of one becomes an increment or decrement (`x++`, `x--`).
//!
//! # Conditions
//!
//! - the loaded and the stored address denote the same location
//! - the load and the operation each have exactly one use
//! - load and store are in the same block with no memory write in between
//!
//! For commutative operators the loaded value may be either operand.

use log::debug;

use crate::{
    analysis::{BinaryOp, NodeGraph, NodeKind, NodeRef},
    compiler::{passes::write_between, NodePass, PassContext, Stage},
    Result,
};

/// Load/store coalescing pass.
pub struct LoadStoreCoalescingPass;

impl Default for LoadStoreCoalescingPass {
    fn default() -> Self {
        Self::new()
    }
}

/// A matched `store addr, (load addr') op value`.
struct Candidate {
    store: NodeRef,
    address: NodeRef,
    operation: NodeRef,
    load: NodeRef,
    op: BinaryOp,
    value: NodeRef,
}

impl LoadStoreCoalescingPass {
    /// Creates a new coalescing pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_commutative(op: BinaryOp) -> bool {
        matches!(
            op,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::FloatAdd
                | BinaryOp::FloatMul
        )
    }

    fn single_use(graph: &NodeGraph, node: NodeRef, user: NodeRef) -> bool {
        graph.uses(node) == [user]
    }

    fn match_store(graph: &NodeGraph, store: NodeRef) -> Option<Candidate> {
        let s = graph.get(store)?;
        if s.kind != NodeKind::Store {
            return None;
        }
        let (address, operation) = (s.operand(0)?, s.operand(1)?);
        let o = graph.get(operation)?;
        let NodeKind::Binary(op) = o.kind else {
            return None;
        };
        if !op.is_compound_assignable() || !Self::single_use(graph, operation, store) {
            return None;
        }

        let (lhs, rhs) = (o.operand(0)?, o.operand(1)?);
        let reads_target = |load: NodeRef| {
            graph.get(load).is_some_and(|l| {
                l.kind == NodeKind::Load
                    && l.operand(0)
                        .is_some_and(|a| graph.same_location(a, address))
                    && Self::single_use(graph, load, operation)
                    && !write_between(graph, load, store)
            })
        };

        if reads_target(lhs) {
            Some(Candidate {
                store,
                address,
                operation,
                load: lhs,
                op,
                value: rhs,
            })
        } else if Self::is_commutative(op) && reads_target(rhs) {
            Some(Candidate {
                store,
                address,
                operation,
                load: rhs,
                op,
                value: lhs,
            })
        } else {
            None
        }
    }

    fn coalesce(graph: &mut NodeGraph, candidate: &Candidate) -> Result<()> {
        let address = candidate.address;
        let step = graph[candidate.value].as_constant().filter(|&c| c == 1);

        match (candidate.op, step) {
            (BinaryOp::Add, Some(_)) => {
                graph.set_operands(candidate.store, vec![address])?;
                graph.set_kind(candidate.store, NodeKind::IncDec(1))?;
            }
            (BinaryOp::Sub, Some(_)) => {
                graph.set_operands(candidate.store, vec![address])?;
                graph.set_kind(candidate.store, NodeKind::IncDec(-1))?;
            }
            (op, _) => {
                graph.set_operands(candidate.store, vec![address, candidate.value])?;
                graph.set_kind(candidate.store, NodeKind::CompoundStore(op))?;
            }
        }

        // The operation and the load are now unused; their own operands may be shared.
        graph.set_operands(candidate.operation, Vec::new())?;
        graph.remove(candidate.operation)?;
        if graph.is_unused(candidate.load) {
            let load_address = graph[candidate.load].operand(0);
            graph.remove(candidate.load)?;
            if let Some(load_address) = load_address {
                let dead = graph.is_unused(load_address)
                    && graph
                        .get(load_address)
                        .is_some_and(|n| n.kind.is_removable());
                if dead {
                    super::remove_with_operands(graph, load_address)?;
                }
            }
        }
        let value = candidate.value;
        let dead_value = graph.contains(value)
            && graph.is_unused(value)
            && graph[value].kind.is_removable();
        if dead_value {
            super::remove_with_operands(graph, value)?;
        }
        Ok(())
    }
}

impl NodePass for LoadStoreCoalescingPass {
    fn name(&self) -> &'static str {
        "load-store-coalescing"
    }

    fn stage(&self) -> Stage {
        Stage::LoadStoresCoalesced
    }

    fn description(&self) -> &'static str {
        "Folds read-modify-write sequences into compound assignments"
    }

    fn run(&self, graph: &mut NodeGraph, _ctx: &PassContext<'_>) -> Result<bool> {
        let mut count = 0;
        for node in graph.node_refs() {
            if let Some(candidate) = Self::match_store(graph, node) {
                Self::coalesce(graph, &candidate)?;
                count += 1;
            }
        }
        debug!("coalesced {count} load/store pairs");
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Assembler,
        disassembler::Opcode,
        program::{Global, Program},
        test::graph_at,
    };

    fn global_program(asm: Assembler) -> Program {
        Program::builder()
            .code(asm.finalize().unwrap())
            .data(vec![0; 16])
            .global(Global::new("counter", 0))
            .function("f", 0)
            .build()
    }

    #[test]
    fn test_add_becomes_compound_store() {
        // counter = counter + arg0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadPri, &[0]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[12]).unwrap();
        asm.emit(Opcode::Add, &[]).unwrap();
        asm.emit(Opcode::StorPri, &[0]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = global_program(asm);

        let graph = graph_at(&program, 0, Stage::LoadStoresCoalesced).unwrap();
        let store = graph
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::CompoundStore(_)))
            .map(|(r, _)| r)
            .unwrap();
        assert_eq!(graph[store].kind, NodeKind::CompoundStore(BinaryOp::Add));
        let value = graph[store].operand(1).unwrap();
        assert_eq!(graph[value].kind, NodeKind::Load);
        graph.verify().unwrap();
    }

    #[test]
    fn test_step_of_one_becomes_increment() {
        // counter = counter - 1
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadPri, &[0]).unwrap();
        asm.emit(Opcode::ConstAlt, &[1]).unwrap();
        asm.emit(Opcode::Sub, &[]).unwrap();
        asm.emit(Opcode::StorPri, &[0]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = global_program(asm);

        let graph = graph_at(&program, 0, Stage::LoadStoresCoalesced).unwrap();
        assert!(graph.iter().any(|(_, n)| n.kind == NodeKind::IncDec(-1)));
    }

    #[test]
    fn test_intervening_call_blocks_coalescing() {
        // t = counter; g(); counter = t + arg0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadPri, &[0]).unwrap();
        asm.emit(Opcode::PushPri, &[]).unwrap();
        asm.emit(Opcode::PushC, &[0]).unwrap();
        asm.emit_branch(Opcode::Call, "g").unwrap();
        asm.emit(Opcode::PopPri, &[]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[12]).unwrap();
        asm.emit(Opcode::Add, &[]).unwrap();
        asm.emit(Opcode::StorPri, &[0]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("g").unwrap();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = global_program(asm);

        let graph = graph_at(&program, 0, Stage::LoadStoresCoalesced).unwrap();
        assert!(graph.iter().any(|(_, n)| n.kind == NodeKind::Store));
        assert!(!graph
            .iter()
            .any(|(_, n)| matches!(n.kind, NodeKind::CompoundStore(_))));
    }
}
