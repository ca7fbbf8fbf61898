//! Array element access recognition.
//!
//! Address arithmetic `base + 4 * index` is printed as `base[index]` once it is known to
//! designate an element rather than a pointer value. The pass runs twice.
//!
//! The **syntactic** run turns an [`NodeKind::Index`] into an [`NodeKind::ArrayRef`] when
//! every use dereferences it: it is the address of a load, or the written address of a
//! store, compound store or increment.
//!
//! The **type-directed** run repeats that, then makes element zero explicit: a memory
//! access whose address is itself an array (`a` rather than `a[i]`) is rewritten to go
//! through `a[0]`.
//!
//! # Example
//!
//! Before:
//! ```text
//! n5 = index n3, n4
//! n6 = load n5
//! n7 = load n3          // n3 : int[]
//! ```
//!
//! After:
//! ```text
//! n5 = arrayref n3, n4
//! n6 = load n5
//! n8 = const 0
//! n9 = arrayref n3, n8
//! n7 = load n9
//! ```

use log::debug;

use crate::{
    analysis::{NodeGraph, NodeKind, NodeRef},
    compiler::{NodePass, PassContext, Stage},
    Result,
};

/// Array element access recognition pass.
pub struct ArrayCollapsePass {
    typed: bool,
}

impl ArrayCollapsePass {
    /// The syntactic run, completing [`Stage::ArraysCollapsed`].
    #[must_use]
    pub fn syntactic() -> Self {
        Self { typed: false }
    }

    /// The type-directed run, completing [`Stage::ArraysRetyped`].
    #[must_use]
    pub fn typed() -> Self {
        Self { typed: true }
    }

    /// Returns `true` if every use of `node` dereferences it.
    fn only_dereferenced(graph: &NodeGraph, node: NodeRef) -> bool {
        let users = graph.uses(node);
        !users.is_empty()
            && users.iter().all(|&user| {
                let Some(u) = graph.get(user) else {
                    return false;
                };
                let dereferencing = match u.kind {
                    NodeKind::Load => true,
                    NodeKind::Store | NodeKind::CompoundStore(_) | NodeKind::IncDec(_) => {
                        u.operand(0) == Some(node)
                            && u.operands().iter().filter(|&&o| o == node).count() == 1
                    }
                    _ => false,
                };
                dereferencing
            })
    }

    fn collapse_indices(graph: &mut NodeGraph) -> Result<usize> {
        let mut count = 0;
        for node in graph.node_refs() {
            let is_index = graph.get(node).is_some_and(|n| n.kind == NodeKind::Index);
            if is_index && Self::only_dereferenced(graph, node) {
                graph.set_kind(node, NodeKind::ArrayRef)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Routes accesses through whole arrays via an explicit element zero.
    fn expose_first_elements(graph: &mut NodeGraph) -> Result<usize> {
        let mut count = 0;
        for node in graph.node_refs() {
            let Some(n) = graph.get(node) else {
                continue;
            };
            let position = match n.kind {
                NodeKind::Load => 0,
                NodeKind::Store | NodeKind::CompoundStore(_) | NodeKind::IncDec(_) => 0,
                _ => continue,
            };
            let Some(address) = n.operand(position) else {
                continue;
            };
            let a = &graph[address];
            if !a.ty().is_array() || a.kind.is_element_address() {
                continue;
            }

            let zero = graph.insert_before(node, NodeKind::Constant(0), vec![])?;
            let element = graph.insert_before(node, NodeKind::ArrayRef, vec![address, zero])?;
            graph.replace_operand(node, position, element)?;
            count += 1;
        }
        Ok(count)
    }
}

impl NodePass for ArrayCollapsePass {
    fn name(&self) -> &'static str {
        if self.typed {
            "array-collapse-typed"
        } else {
            "array-collapse"
        }
    }

    fn stage(&self) -> Stage {
        if self.typed {
            Stage::ArraysRetyped
        } else {
            Stage::ArraysCollapsed
        }
    }

    fn description(&self) -> &'static str {
        "Recognizes array element accesses"
    }

    fn run(&self, graph: &mut NodeGraph, _ctx: &PassContext<'_>) -> Result<bool> {
        let mut count = Self::collapse_indices(graph)?;
        if self.typed {
            count += Self::expose_first_elements(graph)?;
        }
        debug!("{}: {} element accesses", self.name(), count);
        Ok(count > 0)
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
    fn test_loaded_index_becomes_element() {
        // return arg0[arg1]
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[12]).unwrap();
        asm.emit(Opcode::LoadSPri, &[16]).unwrap();
        asm.emit(Opcode::Lidx, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = program(asm);

        let graph = graph_at(&program, 0, Stage::ArraysCollapsed).unwrap();
        assert!(graph.iter().any(|(_, n)| n.kind == NodeKind::ArrayRef));
        assert!(!graph.iter().any(|(_, n)| n.kind == NodeKind::Index));
    }

    #[test]
    fn test_escaping_index_stays_arithmetic() {
        // return &arg0[arg1]
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[12]).unwrap();
        asm.emit(Opcode::LoadSPri, &[16]).unwrap();
        asm.emit(Opcode::Idxaddr, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = program(asm);

        let graph = graph_at(&program, 0, Stage::ArraysCollapsed).unwrap();
        assert!(graph.iter().any(|(_, n)| n.kind == NodeKind::Index));
    }

    #[test]
    fn test_whole_array_access_goes_through_element_zero() {
        // new a[4]; a[0] = 7 written through the base address
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Stack, &[-16]).unwrap();
        asm.emit(Opcode::ConstS, &[-16, 7]).unwrap();
        asm.emit(Opcode::Stack, &[16]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = program(asm);

        let graph = graph_at(&program, 0, Stage::ArraysRetyped).unwrap();
        let store = graph
            .iter()
            .find(|(_, n)| n.kind == NodeKind::Store)
            .map(|(r, _)| r)
            .unwrap();
        let address = graph[store].operand(0).unwrap();
        assert_eq!(graph[address].kind, NodeKind::ArrayRef);
        let index = graph[address].operand(1).unwrap();
        assert_eq!(graph[index].as_constant(), Some(0));
    }
}
