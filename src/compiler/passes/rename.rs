//! Final naming pass.
//!
//! Assigns the source names the emitter prints and decides which values are printed
//! through a temporary rather than inline.
//!
//! # Names
//!
//! | Node | Name |
//! |------|------|
//! | argument | declared name, or `_argN` |
//! | local | debug symbol name, or `localN` |
//! | heap temporary | `heapN` |
//! | phi | `tmpN` |
//! | materialized value | `tN` |
//!
//! # Materialization
//!
//! A value is inlined at its single use unless that would change what it computes or how
//! often. It is materialized into a temporary when:
//!
//! - it is a call with more than one use
//! - it is used in another block (a phi operand is used at the end of its predecessor)
//! - it reads memory and a write happens between definition and use
//! - it is used more than once and contains a call

use std::collections::HashMap;

use log::debug;

use crate::{
    analysis::{NodeFlags, NodeGraph, NodeKind, NodeRef},
    compiler::{NodePass, PassContext, Stage},
    Result,
};

/// Final naming pass.
pub struct RenamePass;

impl Default for RenamePass {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run memo of which values transitively read memory or call.
#[derive(Default)]
struct Effects {
    reads_memory: HashMap<NodeRef, bool>,
    calls: HashMap<NodeRef, bool>,
}

impl Effects {
    /// Returns `true` if evaluating `node` reads memory.
    fn reads_memory(&mut self, graph: &NodeGraph, node: NodeRef) -> bool {
        self.transitive(graph, node, true)
    }

    /// Returns `true` if evaluating `node` performs a call.
    fn contains_call(&mut self, graph: &NodeGraph, node: NodeRef) -> bool {
        self.transitive(graph, node, false)
    }

    fn transitive(&mut self, graph: &NodeGraph, node: NodeRef, memory: bool) -> bool {
        let memo = if memory {
            &self.reads_memory
        } else {
            &self.calls
        };
        if let Some(&known) = memo.get(&node) {
            return known;
        }
        let Some(n) = graph.get(node) else {
            return false;
        };
        let own = match n.kind {
            NodeKind::Call(_) | NodeKind::SysReq(_) => true,
            NodeKind::Load => memory,
            _ => false,
        };
        // Variables, phis and materialized values are read by name.
        let opaque = n.kind.is_variable()
            || n.kind == NodeKind::Phi
            || n.flags.contains(NodeFlags::MATERIALIZED);
        let mut result = own;
        if !result && !opaque {
            let operands = n.operands().to_vec();
            result = operands.into_iter().any(|o| self.transitive(graph, o, memory));
        }
        let memo = if memory {
            &mut self.reads_memory
        } else {
            &mut self.calls
        };
        memo.insert(node, result);
        result
    }
}

impl RenamePass {
    /// Creates a new naming pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns `true` for nodes that may be printed through a temporary.
    fn is_materializable(graph: &NodeGraph, node: NodeRef) -> bool {
        match graph[node].kind {
            NodeKind::Load
            | NodeKind::Binary(_)
            | NodeKind::Unary(_)
            | NodeKind::Call(_)
            | NodeKind::SysReq(_) => !graph.is_unused(node),
            _ => false,
        }
    }

    /// The block and position at which `user` consumes operand `node`.
    fn use_points(graph: &NodeGraph, node: NodeRef, user: NodeRef) -> Vec<(usize, usize)> {
        let u = &graph[user];
        if u.kind == NodeKind::Phi {
            let preds = graph.predecessors(u.block);
            return u
                .operands()
                .iter()
                .zip(preds)
                .filter(|(&o, _)| o == node)
                .map(|(_, pred)| (pred, graph.block_nodes(pred).len()))
                .collect();
        }
        graph
            .position(user)
            .map(|p| vec![(u.block, p)])
            .unwrap_or_default()
    }

    fn must_materialize(graph: &NodeGraph, effects: &mut Effects, node: NodeRef) -> bool {
        let n = &graph[node];
        let mut users = graph.uses(node).to_vec();
        let use_count = users.len();
        users.sort_unstable();
        users.dedup();

        if n.kind.is_call() && use_count > 1 {
            return true;
        }
        if use_count > 1 && effects.contains_call(graph, node) {
            return true;
        }

        let Some(position) = graph.position(node) else {
            return false;
        };
        let reads = effects.reads_memory(graph, node);
        for user in users {
            for (block, at) in Self::use_points(graph, node, user) {
                if block != n.block {
                    return true;
                }
                let writes = graph.block_nodes(block)[position + 1..at.max(position + 1)]
                    .iter()
                    .any(|&w| graph[w].kind.writes_memory());
                if (reads || n.kind.is_call()) && writes {
                    return true;
                }
            }
        }
        false
    }
}

impl NodePass for RenamePass {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn stage(&self) -> Stage {
        Stage::Renamed
    }

    fn description(&self) -> &'static str {
        "Assigns final names and materializes temporaries"
    }

    fn run(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<bool> {
        let mut locals = 0;
        let mut heaps = 0;
        let mut phis = 0;
        let mut temporaries = 0;
        let mut effects = Effects::default();

        for node in graph.node_refs() {
            let kind = graph[node].kind.clone();
            let name = match kind {
                NodeKind::Argument(index) => graph.arguments().get(index).map(|a| a.name.clone()),
                NodeKind::DeclareLocal { offset, .. } | NodeKind::StackSlot { offset, .. } => {
                    Some(match ctx.function.local_at(offset) {
                        Some(symbol) => symbol.name.clone(),
                        None => {
                            locals += 1;
                            format!("local{}", locals - 1)
                        }
                    })
                }
                NodeKind::Heap { .. } => {
                    heaps += 1;
                    Some(format!("heap{}", heaps - 1))
                }
                NodeKind::Phi => {
                    phis += 1;
                    Some(format!("tmp{}", phis - 1))
                }
                _ if Self::is_materializable(graph, node)
                    && Self::must_materialize(graph, &mut effects, node) =>
                {
                    graph.add_flags(node, NodeFlags::MATERIALIZED);
                    temporaries += 1;
                    Some(format!("t{}", temporaries - 1))
                }
                _ => None,
            };
            if let Some(name) = name {
                graph.set_name(node, name);
            }
        }

        debug!(
            "named {locals} anonymous locals, {heaps} heap temporaries, {phis} phis, \
             {temporaries} materialized values"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Assembler,
        disassembler::Opcode,
        program::{Argument, Function, LocalSymbol, Program, VariableKind},
        test::graph_at,
    };

    #[test]
    fn test_declared_and_anonymous_names() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Stack, &[-4]).unwrap();
        asm.emit(Opcode::Stack, &[-4]).unwrap();
        asm.emit(Opcode::ConstS, &[-4, 1]).unwrap();
        asm.emit(Opcode::ConstS, &[-8, 2]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::AddrAlt, &[-4]).unwrap();
        asm.emit(Opcode::StorI, &[]).unwrap();
        asm.emit(Opcode::Stack, &[8]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let mut function = Function::new("f", 0, 0);
        function.args = vec![Argument::new(VariableKind::Scalar, "count")];
        function.locals = vec![LocalSymbol {
            offset: -8,
            name: "total".into(),
            kind: VariableKind::Scalar,
            tag: None,
        }];
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function_with(function)
            .build();

        let graph = graph_at(&program, 0, Stage::Renamed).unwrap();
        let names: Vec<String> = graph
            .iter()
            .filter(|(_, n)| n.kind.is_variable())
            .filter_map(|(_, n)| n.name.clone())
            .collect();
        assert!(names.contains(&"count".to_string()));
        assert!(names.contains(&"total".to_string()));
        assert!(names.contains(&"local0".to_string()));
    }

    #[test]
    fn test_call_used_twice_is_materialized() {
        // x = g(); return x + x   (value kept in PRI and ALT)
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::PushC, &[0]).unwrap();
        asm.emit_branch(Opcode::Call, "g").unwrap();
        asm.emit(Opcode::MoveAlt, &[]).unwrap();
        asm.emit(Opcode::Add, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("g").unwrap();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::Renamed).unwrap();
        let call = graph
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::Call(_)))
            .map(|(_, n)| n.clone())
            .unwrap();
        assert!(call.flags.contains(NodeFlags::MATERIALIZED));
        assert_eq!(call.name.as_deref(), Some("t0"));
    }

    #[test]
    fn test_load_across_store_is_materialized() {
        // t = g_value; g_value = 1; return t
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadPri, &[0]).unwrap();
        asm.emit(Opcode::Const, &[0, 1]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .data(vec![0; 4])
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::Renamed).unwrap();
        let load = graph
            .iter()
            .find(|(_, n)| n.kind == NodeKind::Load)
            .map(|(_, n)| n.flags)
            .unwrap();
        assert!(load.contains(NodeFlags::MATERIALIZED));
    }
}
