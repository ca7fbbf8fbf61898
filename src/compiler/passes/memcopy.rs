//! Aggregate initializer recognition.
//!
//! Array locals are initialized by block operations or by runs of element stores. This
//! pass turns them into [`NodeKind::Initialize`] nodes holding a [`Literal`], which
//! declaration coalescing later folds into the declaration itself.
//!
//! # Example
//!
//! Before:
//! ```text
//! n2 = local -8 (2 cells)
//! n3 = localref n2
//! n4 = const 0x40            // data address of "hi"
//! n5 = memcopy 8 n3, n4
//! ```
//!
//! After:
//! ```text
//! n2 = local -8 (2 cells)
//! n3 = localref n2
//! n6 = literal "hi"
//! n5 = initialize n3, n6
//! ```
//!
//! # Handled Cases
//!
//! - a block copy from a constant data address: a string literal if the data holds one,
//!   an explicit cell list otherwise
//! - a fill of a fresh array: dropped for zero, a repeated cell list otherwise
//! - consecutive constant stores to elements `0, 1, 2, ...` of a fresh array

use log::debug;

use crate::{
    analysis::{Literal, NodeGraph, NodeKind, NodeRef},
    compiler::{
        passes::{remove_with_operands, write_between},
        NodePass, PassContext, Stage,
    },
    program::Program,
    Result,
};

/// Aggregate initializer recognition pass.
pub struct MemCopyPass;

impl Default for MemCopyPass {
    fn default() -> Self {
        Self::new()
    }
}

/// A run of constant stores to consecutive elements of one array.
struct StoreRun {
    variable: NodeRef,
    base: NodeRef,
    stores: Vec<NodeRef>,
    values: Vec<i32>,
}

impl MemCopyPass {
    /// Creates a new initializer recognition pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decodes the data at `address` as the literal a copy of `bytes` bytes transfers.
    fn literal_at(program: &Program, address: u32, bytes: u32) -> Result<Literal> {
        if let Some(text) = program.string_at(address) {
            let start = address as usize;
            let end = start + bytes as usize;
            let terminated = text.len() < bytes as usize;
            let printable = !text
                .chars()
                .any(|c| c == char::REPLACEMENT_CHARACTER || (c.is_control() && !c.is_whitespace()));
            let padded = program
                .data()
                .get(start + text.len()..end)
                .is_some_and(|rest| rest.iter().all(|&b| b == 0));
            if terminated && printable && padded {
                return Ok(Literal::String(text));
            }
        }

        let mut cells = program.data_cells(address, (bytes / 4) as usize)?;
        while cells.len() > 1 && cells.last() == Some(&0) {
            cells.pop();
        }
        Ok(Literal::Cells(cells))
    }

    /// The declared array behind `address`, if `address` is the address of a local array.
    fn local_array(graph: &NodeGraph, address: NodeRef) -> Option<(NodeRef, u32)> {
        let variable = graph.referenced_variable(address)?;
        match graph.get(variable)?.kind {
            NodeKind::DeclareLocal { cells, .. } => Some((variable, cells)),
            _ => None,
        }
    }

    /// Returns `true` if nothing wrote `variable` between its declaration and `at`.
    fn is_fresh(graph: &NodeGraph, variable: NodeRef, at: NodeRef) -> bool {
        graph
            .get(variable)
            .is_some_and(|v| v.operands().is_empty())
            && !write_between(graph, variable, at)
    }

    fn replace_with_initializer(
        graph: &mut NodeGraph,
        node: NodeRef,
        destination: NodeRef,
        literal: Literal,
    ) -> Result<()> {
        let old = graph[node].operands().to_vec();
        let literal = graph.insert_before(node, NodeKind::Literal(literal), vec![])?;
        graph.set_operands(node, vec![destination, literal])?;
        graph.set_kind(node, NodeKind::Initialize)?;
        for operand in old {
            let dead = graph
                .get(operand)
                .is_some_and(|n| n.kind.is_removable())
                && graph.is_unused(operand);
            if dead {
                remove_with_operands(graph, operand)?;
            }
        }
        Ok(())
    }

    fn rewrite_block_operations(graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<usize> {
        let mut count = 0;
        for node in graph.node_refs() {
            let Some(n) = graph.get(node) else {
                continue;
            };
            let (Some(destination), Some(source)) = (n.operand(0), n.operand(1)) else {
                continue;
            };
            let Some((variable, cells)) = Self::local_array(graph, destination) else {
                continue;
            };
            let source_value = graph[source].as_constant();

            match (n.kind.clone(), source_value) {
                (NodeKind::MemCopy(bytes), Some(address)) if address >= 0 => {
                    let literal = Self::literal_at(ctx.program, address as u32, bytes)?;
                    Self::replace_with_initializer(graph, node, destination, literal)?;
                    count += 1;
                }
                (NodeKind::Fill(bytes), Some(value))
                    if bytes == cells * 4 && Self::is_fresh(graph, variable, node) =>
                {
                    if value == 0 {
                        remove_with_operands(graph, node)?;
                    } else {
                        let literal = Literal::Cells(vec![value; cells as usize]);
                        Self::replace_with_initializer(graph, node, destination, literal)?;
                    }
                    count += 1;
                }
                _ => {}
            }
        }
        Ok(count)
    }

    /// Splits an element address into its array base, the array, and the element index.
    fn element(graph: &NodeGraph, address: NodeRef) -> Option<(NodeRef, NodeRef, i32)> {
        let node = graph.get(address)?;
        let (base, index) = match node.kind {
            NodeKind::LocalRef => (address, 0),
            NodeKind::Index | NodeKind::ArrayRef => {
                (node.operand(0)?, graph.get(node.operand(1)?)?.as_constant()?)
            }
            _ => return None,
        };
        let (variable, cells) = Self::local_array(graph, base)?;
        (cells > 1 && index >= 0).then_some((base, variable, index))
    }

    fn find_runs(graph: &NodeGraph, block: usize) -> Vec<StoreRun> {
        let mut runs = Vec::new();
        let mut current: Option<StoreRun> = None;

        for &node in graph.block_nodes(block) {
            let Some(n) = graph.get(node) else {
                continue;
            };
            let step = if n.kind == NodeKind::Store {
                n.operand(0)
                    .and_then(|a| Self::element(graph, a))
                    .zip(n.operand(1).and_then(|v| graph.get(v)?.as_constant()))
            } else {
                None
            };

            match step {
                Some(((base, variable, index), value)) => {
                    let extends = current.as_ref().is_some_and(|run| {
                        run.variable == variable && run.stores.len() == index as usize
                    });
                    if extends {
                        if let Some(run) = current.as_mut() {
                            run.stores.push(node);
                            run.values.push(value);
                        }
                        continue;
                    }
                    runs.extend(current.take());
                    if index == 0 && Self::is_fresh(graph, variable, node) {
                        current = Some(StoreRun {
                            variable,
                            base,
                            stores: vec![node],
                            values: vec![value],
                        });
                    }
                }
                None if n.kind.is_effect() || n.kind.is_control() => {
                    runs.extend(current.take());
                }
                None => {}
            }
        }
        runs.extend(current);
        runs.retain(|run| run.stores.len() >= 2);
        runs
    }

    fn rewrite_store_runs(graph: &mut NodeGraph) -> Result<usize> {
        let mut count = 0;
        for block in 0..graph.block_count() {
            for run in Self::find_runs(graph, block) {
                let Some((&first, rest)) = run.stores.split_first() else {
                    continue;
                };
                for &store in rest {
                    remove_with_operands(graph, store)?;
                }
                Self::replace_with_initializer(graph, first, run.base, Literal::Cells(run.values))?;
                count += 1;
            }
        }
        Ok(count)
    }
}

impl NodePass for MemCopyPass {
    fn name(&self) -> &'static str {
        "memcopy"
    }

    fn stage(&self) -> Stage {
        Stage::MemCopiesRecognized
    }

    fn description(&self) -> &'static str {
        "Recognizes string and array initializers"
    }

    fn run(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<bool> {
        let operations = Self::rewrite_block_operations(graph, ctx)?;
        let runs = Self::rewrite_store_runs(graph)?;
        debug!("recognized {operations} block initializers and {runs} element runs");
        Ok(operations + runs > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::Assembler, disassembler::Opcode, test::graph_at};

    fn literals(graph: &NodeGraph) -> Vec<Literal> {
        graph
            .iter()
            .filter_map(|(_, n)| match &n.kind {
                NodeKind::Literal(literal) => Some(literal.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_string_copy_becomes_literal() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Stack, &[-8]).unwrap();
        asm.emit(Opcode::ConstPri, &[0]).unwrap();
        asm.emit(Opcode::AddrAlt, &[-8]).unwrap();
        asm.emit(Opcode::Movs, &[8]).unwrap();
        asm.emit(Opcode::Stack, &[8]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let mut data = b"hi".to_vec();
        data.resize(8, 0);
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .data(data)
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::MemCopiesRecognized).unwrap();
        assert_eq!(literals(&graph), vec![Literal::String("hi".into())]);
        assert!(graph.iter().any(|(_, n)| n.kind == NodeKind::Initialize));
        assert!(!graph.iter().any(|(_, n)| matches!(n.kind, NodeKind::MemCopy(_))));
        graph.verify().unwrap();
    }

    #[test]
    fn test_binary_copy_becomes_cells() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Stack, &[-8]).unwrap();
        asm.emit(Opcode::ConstPri, &[0]).unwrap();
        asm.emit(Opcode::AddrAlt, &[-8]).unwrap();
        asm.emit(Opcode::Movs, &[8]).unwrap();
        asm.emit(Opcode::Stack, &[8]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let mut data = 1_i32.to_le_bytes().to_vec();
        data.extend_from_slice(&(-1_i32).to_le_bytes());
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .data(data)
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::MemCopiesRecognized).unwrap();
        assert_eq!(literals(&graph), vec![Literal::Cells(vec![1, -1])]);
    }

    #[test]
    fn test_zero_fill_of_fresh_array_is_dropped() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Stack, &[-16]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::AddrAlt, &[-16]).unwrap();
        asm.emit(Opcode::Fill, &[16]).unwrap();
        asm.emit(Opcode::Stack, &[16]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::MemCopiesRecognized).unwrap();
        assert!(!graph.iter().any(|(_, n)| matches!(n.kind, NodeKind::Fill(_))));
        assert!(graph
            .iter()
            .any(|(_, n)| matches!(n.kind, NodeKind::DeclareLocal { cells: 4, .. })));
    }

    #[test]
    fn test_element_store_run_becomes_cells() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Stack, &[-12]).unwrap();
        asm.emit(Opcode::ConstS, &[-12, 1]).unwrap();
        asm.emit(Opcode::ConstS, &[-8, 2]).unwrap();
        asm.emit(Opcode::ConstS, &[-4, 3]).unwrap();
        asm.emit(Opcode::Stack, &[12]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::MemCopiesRecognized).unwrap();
        assert_eq!(literals(&graph), vec![Literal::Cells(vec![1, 2, 3])]);
        assert!(!graph.iter().any(|(_, n)| n.kind == NodeKind::Store));
        graph.verify().unwrap();
    }
}
