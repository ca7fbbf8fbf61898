//! Heap temporary analysis.
//!
//! The compiler passes values to by-reference parameters through short-lived heap cells:
//! the value is stored into a fresh heap allocation and the allocation's address is
//! pushed. In source the call simply takes the value.
//!
//! # Example
//!
//! Before:
//! ```text
//! n2 = heap 1
//! n3 = localref n2
//! n5 = store n3, n4
//! n6 = call 0x80 [n3]
//! ```
//!
//! After:
//! ```text
//! n6 = call 0x80 [n4]
//! ```
//!
//! A heap allocation qualifies when it is written exactly once, never read, and every
//! other use of its address is a call argument reached only after the write. Any other
//! allocation is flagged [`NodeFlags::HEAP`] and stays a variable.
//!
//! The pass also flags locals whose address is passed to a call or stored as
//! [`NodeFlags::ESCAPES`]. From this stage on types are frozen.

use log::debug;

use crate::{
    analysis::{NodeFlags, NodeGraph, NodeKind, NodeRef},
    compiler::{NodePass, PassContext, Stage},
    utils::graph::NodeId,
    Result,
};

/// Heap temporary analysis pass.
pub struct HeapAnalysisPass;

impl Default for HeapAnalysisPass {
    fn default() -> Self {
        Self::new()
    }
}

/// How the address of a heap allocation is used.
struct HeapUses {
    references: Vec<NodeRef>,
    store: NodeRef,
    value: NodeRef,
    calls: Vec<(NodeRef, usize)>,
}

impl HeapAnalysisPass {
    /// Creates a new heap analysis pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns `true` if `first` executes before `second` on every path reaching it.
    fn precedes(graph: &NodeGraph, first: NodeRef, second: NodeRef) -> bool {
        let (a, b) = (graph[first].block, graph[second].block);
        if a == b {
            return matches!(
                (graph.position(first), graph.position(second)),
                (Some(x), Some(y)) if x < y
            );
        }
        graph.cfg().dominates(NodeId::new(a), NodeId::new(b))
    }

    /// Classifies the uses of `heap`; `None` if it must stay a variable.
    fn classify(graph: &NodeGraph, heap: NodeRef) -> Option<HeapUses> {
        let mut references = graph.uses(heap).to_vec();
        references.sort_unstable();
        references.dedup();
        if references
            .iter()
            .any(|&r| graph.get(r).map_or(true, |n| n.kind != NodeKind::LocalRef))
        {
            return None;
        }

        let mut store = None;
        let mut calls = Vec::new();
        for &reference in &references {
            let mut users = graph.uses(reference).to_vec();
            users.sort_unstable();
            users.dedup();
            for user in users {
                let node = graph.get(user)?;
                for (position, _) in node
                    .operands()
                    .iter()
                    .enumerate()
                    .filter(|&(_, &o)| o == reference)
                {
                    match node.kind {
                        NodeKind::Store if position == 0 && store.is_none() => {
                            store = Some((user, node.operand(1)?));
                        }
                        NodeKind::Call(_) | NodeKind::SysReq(_) => calls.push((user, position)),
                        _ => return None,
                    }
                }
            }
        }

        let (store, value) = store?;
        if calls.is_empty()
            || !calls
                .iter()
                .all(|&(call, _)| Self::precedes(graph, store, call) && Self::precedes(graph, value, call))
        {
            return None;
        }
        Some(HeapUses {
            references,
            store,
            value,
            calls,
        })
    }

    fn resolve(graph: &mut NodeGraph, heap: NodeRef, uses: HeapUses) -> Result<()> {
        for (call, position) in uses.calls {
            graph.replace_operand(call, position, uses.value)?;
        }
        graph.remove(uses.store)?;
        for reference in uses.references {
            if graph.contains(reference) {
                graph.remove(reference)?;
            }
        }
        graph.remove(heap)
    }

    fn flag_escaping_locals(graph: &mut NodeGraph) -> usize {
        let mut escaping = Vec::new();
        for (node, n) in graph.iter() {
            if !matches!(n.kind, NodeKind::DeclareLocal { .. }) {
                continue;
            }
            let escapes = graph.uses(node).iter().any(|&reference| {
                graph[reference].kind == NodeKind::LocalRef
                    && graph.uses(reference).iter().any(|&user| {
                        let u = &graph[user];
                        u.kind.is_call()
                            || (u.kind == NodeKind::Store && u.operand(1) == Some(reference))
                    })
            });
            if escapes {
                escaping.push(node);
            }
        }
        for &node in &escaping {
            graph.add_flags(node, NodeFlags::ESCAPES);
        }
        escaping.len()
    }
}

impl NodePass for HeapAnalysisPass {
    fn name(&self) -> &'static str {
        "heap-analysis"
    }

    fn stage(&self) -> Stage {
        Stage::HeapAnalyzed
    }

    fn description(&self) -> &'static str {
        "Replaces heap temporaries passed to calls by their values"
    }

    fn run(&self, graph: &mut NodeGraph, _ctx: &PassContext<'_>) -> Result<bool> {
        let heaps: Vec<NodeRef> = graph
            .iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Heap { .. }))
            .map(|(r, _)| r)
            .collect();

        let mut resolved = 0;
        let mut kept = 0;
        for heap in heaps {
            match Self::classify(graph, heap) {
                Some(uses) => {
                    Self::resolve(graph, heap, uses)?;
                    resolved += 1;
                }
                None => {
                    if !graph[heap].flags.contains(NodeFlags::HEAP) {
                        graph.add_flags(heap, NodeFlags::HEAP);
                        kept += 1;
                    }
                }
            }
        }
        let escaping = Self::flag_escaping_locals(graph);

        debug!("resolved {resolved} heap temporaries, kept {kept}, {escaping} escaping locals");
        Ok(resolved + kept > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Assembler,
        disassembler::Opcode,
        program::{Argument, Program, VariableKind},
        test::graph_at,
    };

    #[test]
    fn test_reference_temporary_becomes_value() {
        // SetRef(5) where SetRef(&value)
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Heap, &[4]).unwrap();
        asm.emit(Opcode::ConstPri, &[5]).unwrap();
        asm.emit(Opcode::StorI, &[]).unwrap();
        asm.emit(Opcode::PushAlt, &[]).unwrap();
        asm.emit(Opcode::SysreqN, &[0, 1]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .native(
                "SetRef",
                vec![Argument::new(VariableKind::Reference, "value")],
                None,
            )
            .build();

        let graph = graph_at(&program, 0, Stage::HeapAnalyzed).unwrap();
        assert!(!graph.iter().any(|(_, n)| matches!(n.kind, NodeKind::Heap { .. })));
        let call = graph
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::SysReq(0)))
            .map(|(r, _)| r)
            .unwrap();
        let argument = graph[call].operand(0).unwrap();
        assert_eq!(graph[argument].as_constant(), Some(5));
        graph.verify().unwrap();
    }

    #[test]
    fn test_read_back_temporary_is_kept() {
        // heap cell written, passed, then read back
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Heap, &[4]).unwrap();
        asm.emit(Opcode::ConstPri, &[5]).unwrap();
        asm.emit(Opcode::StorI, &[]).unwrap();
        asm.emit(Opcode::PushAlt, &[]).unwrap();
        asm.emit(Opcode::PushAlt, &[]).unwrap();
        asm.emit(Opcode::SysreqN, &[0, 1]).unwrap();
        asm.emit(Opcode::PopPri, &[]).unwrap();
        asm.emit(Opcode::LoadI, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .native(
                "SetRef",
                vec![Argument::new(VariableKind::Reference, "value")],
                None,
            )
            .build();

        let graph = graph_at(&program, 0, Stage::HeapAnalyzed).unwrap();
        let heap = graph
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::Heap { .. }))
            .map(|(_, n)| n.flags)
            .unwrap();
        assert!(heap.contains(NodeFlags::HEAP));
    }
}
