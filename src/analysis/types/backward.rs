//! Backward type propagation.
//!
//! Walks the graph in reverse order and joins what each user expects into its operands:
//! float operands, parameter types of the callee, integer indices, values stored through a
//! typed address, and the declared return type. Addresses then hand their knowledge down to
//! the variables they point at.

use crate::{
    analysis::{
        nodes::{NodeGraph, NodeKind, NodeRef},
        types::{address_type, expected_operand_type, is_inplace_array, Type},
    },
    compiler::{NodePass, PassContext, Stage},
    Error, Result,
};

/// Backward type propagation round.
pub struct BackwardTypePass {
    stage: Stage,
}

impl BackwardTypePass {
    /// Creates a round completing `stage`, either [`Stage::Typed`] or
    /// [`Stage::TypesRefined`].
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self { stage }
    }
}

impl Default for BackwardTypePass {
    fn default() -> Self {
        Self::new(Stage::Typed)
    }
}

impl NodePass for BackwardTypePass {
    fn name(&self) -> &'static str {
        "backward-types"
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn description(&self) -> &'static str {
        "Propagates the types expected by users into their operands"
    }

    fn run(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<bool> {
        if !graph.stage().allows_typing() {
            return Err(Error::PassOrder {
                expected: self.stage,
                found: graph.stage(),
            });
        }

        let mut changed = false;
        for node in graph.node_refs().into_iter().rev() {
            for (operand, ty) in constraints(graph, ctx, node) {
                changed |= graph.join_type(operand, &ty);
            }
        }
        Ok(changed)
    }
}

/// The `(operand, type)` pairs `node` imposes on its operands.
fn constraints(graph: &NodeGraph, ctx: &PassContext<'_>, node: NodeRef) -> Vec<(NodeRef, Type)> {
    let Some(n) = graph.get(node) else {
        return Vec::new();
    };
    let mut out: Vec<(NodeRef, Type)> = n
        .operands()
        .iter()
        .enumerate()
        .filter_map(|(position, &operand)| {
            expected_operand_type(graph, ctx, node, position).map(|ty| (operand, ty))
        })
        .collect();

    let ty = n.ty();
    match n.kind {
        NodeKind::LocalRef => {
            if let Some(variable) = n.operand(0) {
                if is_inplace_array(graph, variable) || ty.is_array() {
                    if !matches!(graph[variable].kind, NodeKind::Argument(_)) {
                        out.push((variable, ty.clone()));
                    }
                } else if let Type::Reference(target) = ty {
                    out.push((variable, target.as_ref().clone()));
                }
            }
        }
        NodeKind::Load if !ty.is_bottom() => {
            if let Some(address) = n.operand(0) {
                out.push((address, address_type(graph, ctx, address, ty.clone())));
            }
        }
        NodeKind::Index | NodeKind::ArrayRef => {
            if let Some(base) = n.operand(0) {
                let element = match ty {
                    Type::Reference(element) => element.as_ref().clone(),
                    _ => Type::Bottom,
                };
                out.push((base, Type::array(element)));
            }
        }
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Assembler,
        disassembler::Opcode,
        program::{Argument, Program, Tag, VariableKind},
        test::graph_at,
    };

    #[test]
    fn test_parameter_types_flow_into_untyped_arguments() {
        // f(a) { SetFloat(a); }   native SetFloat(Float:value)
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::PushS, &[12]).unwrap();
        asm.emit(Opcode::SysreqN, &[0, 1]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .native(
                "SetFloat",
                vec![Argument::new(VariableKind::Scalar, "value").with_tag(Tag::Float)],
                None,
            )
            .build();

        let graph = graph_at(&program, 0, Stage::TypesRefined).unwrap();
        let argument = graph
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::Argument(0)))
            .map(|(_, n)| n.ty().clone())
            .unwrap();
        assert_eq!(argument, Type::Float);
    }

    #[test]
    fn test_indexing_makes_array_argument() {
        // return arg0[arg1]
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[12]).unwrap();
        asm.emit(Opcode::LoadSPri, &[16]).unwrap();
        asm.emit(Opcode::Lidx, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::TypesRefined).unwrap();
        let types: Vec<Type> = graph
            .iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Argument(_)))
            .map(|(_, n)| n.ty().clone())
            .collect();
        assert!(types[0].is_array(), "{}", types[0]);
        assert_eq!(types[1], Type::Int);
    }
}
