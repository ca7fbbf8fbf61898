//! Forward type propagation.
//!
//! Walks the graph in block order and derives each node's type from its operands and from
//! declarations. Stores additionally push the stored value's type into the variable they
//! write, which is how untyped locals pick up their type.
//!
//! Integer constants are seeded from the context they are used in when a user expects a
//! particular type (a float operator, a tagged parameter). Constants without such evidence
//! only default to `int` in the refining round, so that evidence discovered by earlier
//! rounds is never contradicted by a premature default.

use crate::{
    analysis::{
        nodes::{Literal, NodeGraph, NodeKind, NodeRef, UnaryOp},
        types::{expected_operand_type, is_inplace_array, Type},
    },
    compiler::{NodePass, PassContext, Stage},
    program::VariableKind,
    Error, Result,
};

/// Forward type propagation round.
pub struct ForwardTypePass {
    stage: Stage,
}

impl ForwardTypePass {
    /// Creates a round completing `stage`, either [`Stage::Typed`] or
    /// [`Stage::TypesRefined`].
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self { stage }
    }

    fn is_final_round(&self) -> bool {
        self.stage == Stage::TypesRefined
    }
}

impl Default for ForwardTypePass {
    fn default() -> Self {
        Self::new(Stage::Typed)
    }
}

impl NodePass for ForwardTypePass {
    fn name(&self) -> &'static str {
        "forward-types"
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn description(&self) -> &'static str {
        "Derives node types from operands and declarations"
    }

    fn run(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<bool> {
        if !graph.stage().allows_typing() {
            return Err(Error::PassOrder {
                expected: self.stage,
                found: graph.stage(),
            });
        }

        let mut changed = false;
        for node in graph.node_refs() {
            if let Some(ty) = node_type(graph, ctx, node, self.is_final_round()) {
                changed |= graph.join_type(node, &ty);
            }
            changed |= propagate_into_variable(graph, node);
        }
        Ok(changed)
    }
}

/// Joins the expectations of every user of `node`.
fn context_type(graph: &NodeGraph, ctx: &PassContext<'_>, node: NodeRef) -> Type {
    let mut users = graph.uses(node).to_vec();
    users.sort_unstable();
    users.dedup();

    let mut ty = Type::Bottom;
    for user in users {
        let positions: Vec<usize> = graph[user]
            .operands()
            .iter()
            .enumerate()
            .filter(|&(_, &o)| o == node)
            .map(|(i, _)| i)
            .collect();
        for position in positions {
            if let Some(expected) = expected_operand_type(graph, ctx, user, position) {
                ty = ty.join(&expected);
            }
        }
    }
    ty
}

fn operand_type(graph: &NodeGraph, node: NodeRef, index: usize) -> Type {
    graph
        .get(node)
        .and_then(|n| n.operand(index))
        .and_then(|o| graph.get(o))
        .map_or(Type::Bottom, |o| o.ty().clone())
}

fn node_type(
    graph: &NodeGraph,
    ctx: &PassContext<'_>,
    node: NodeRef,
    final_round: bool,
) -> Option<Type> {
    let n = graph.get(node)?;
    let ty = match &n.kind {
        NodeKind::Constant(_) => {
            let context = context_type(graph, ctx, node);
            match context {
                Type::Bottom if final_round => Type::Int,
                Type::Conflict => return None,
                other => other,
            }
        }
        NodeKind::Literal(Literal::String(_)) => Type::String,
        NodeKind::Literal(Literal::Cells(_)) => Type::array(Type::Int),
        NodeKind::Argument(index) => {
            let arg = graph.arguments().get(*index)?;
            if arg.synthesized {
                return None;
            }
            Type::from_declaration(arg.kind, arg.tag.as_ref())
        }
        NodeKind::StackSlot { offset, cells } | NodeKind::DeclareLocal { offset, cells } => {
            let mut ty = match ctx.function.local_at(*offset) {
                Some(symbol) => Type::from_declaration(symbol.kind, symbol.tag.as_ref()),
                None => Type::Bottom,
            };
            if *cells > 1 {
                ty = ty.join(&Type::array(Type::Bottom));
            }
            if n.operand(0).is_some() {
                ty = ty.join(&operand_type(graph, node, 0));
            }
            ty
        }
        NodeKind::Heap { cells } if *cells > 1 => Type::array(Type::Bottom),
        NodeKind::Heap { .. } => return None,
        NodeKind::LocalRef => {
            let variable = n.operand(0)?;
            let target = graph.get(variable)?.ty().clone();
            if target.is_bottom() {
                return None;
            }
            if is_inplace_array(graph, variable) {
                target
            } else {
                Type::reference(target)
            }
        }
        NodeKind::GlobalRef(address) => {
            let global = ctx.program.global_at(*address)?;
            let declared = Type::from_declaration(global.kind, global.tag.as_ref());
            if global.kind == VariableKind::Array {
                declared
            } else {
                Type::reference(declared)
            }
        }
        NodeKind::Index | NodeKind::ArrayRef => {
            let base = operand_type(graph, node, 0);
            if !base.is_array() {
                return None;
            }
            Type::reference(base.element())
        }
        NodeKind::Load => operand_type(graph, node, 0).element(),
        NodeKind::Binary(op) if op.is_comparison() => Type::Bool,
        NodeKind::Binary(op) if op.is_float() => Type::Float,
        NodeKind::Binary(_) => Type::Int,
        NodeKind::Unary(UnaryOp::Not) => Type::Bool,
        NodeKind::Unary(UnaryOp::IntToFloat) => Type::Float,
        NodeKind::Unary(_) => Type::Int,
        NodeKind::Phi => n
            .operands()
            .iter()
            .filter_map(|&o| graph.get(o))
            .fold(Type::Bottom, |acc, o| acc.join(o.ty())),
        NodeKind::Call(address) => {
            let callee = ctx.program.function_at(*address)?;
            Type::from_tag(callee.return_tag.as_ref())
        }
        NodeKind::SysReq(index) => {
            let native = ctx.program.native(*index)?;
            Type::from_tag(native.return_tag.as_ref())
        }
        _ => return None,
    };
    (!ty.is_bottom()).then_some(ty)
}

/// Pushes the type of a stored or initializing value into the written variable.
fn propagate_into_variable(graph: &mut NodeGraph, node: NodeRef) -> bool {
    let Some(n) = graph.get(node) else {
        return false;
    };
    let (Some(address), Some(value)) = (n.operand(0), n.operand(1)) else {
        return false;
    };
    if !matches!(
        n.kind,
        NodeKind::Store | NodeKind::CompoundStore(_) | NodeKind::Initialize
    ) {
        return false;
    }
    let value_ty = graph[value].ty().clone();
    if value_ty.is_bottom() {
        return false;
    }
    let is_initializer = n.kind == NodeKind::Initialize;

    let Some(address_node) = graph.get(address) else {
        return false;
    };
    match address_node.kind {
        NodeKind::LocalRef => {
            let Some(variable) = address_node.operand(0) else {
                return false;
            };
            if matches!(graph[variable].kind, NodeKind::Argument(_)) {
                return false;
            }
            if is_initializer || !is_inplace_array(graph, variable) {
                graph.join_type(variable, &value_ty)
            } else {
                graph.join_type(variable, &Type::array(value_ty))
            }
        }
        NodeKind::Index | NodeKind::ArrayRef => {
            let Some(variable) = address_node
                .operand(0)
                .and_then(|base| graph.referenced_variable(base))
            else {
                return false;
            };
            if is_initializer || !is_inplace_array(graph, variable) {
                return false;
            }
            graph.join_type(variable, &Type::array(value_ty))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Assembler,
        disassembler::Opcode,
        program::{Argument, Function, Program, Tag},
        test::graph_at,
    };

    #[test]
    fn test_float_arithmetic_types_argument_and_constant() {
        // return Float:arg0 * 2.0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::ConstAlt, &[2.0_f32.to_bits() as i32]).unwrap();
        asm.emit(Opcode::FloatMul, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let mut function = Function::new("scale", 0, 0);
        function.args = vec![Argument::new(VariableKind::Scalar, "x").with_tag(Tag::Float)];
        function.return_tag = Some(Tag::Float);
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function_with(function)
            .build();

        let graph = graph_at(&program, 0, Stage::TypesRefined).unwrap();
        for (_, node) in graph.iter() {
            match node.kind {
                NodeKind::Argument(_) | NodeKind::Constant(_) | NodeKind::Binary(_) => {
                    assert_eq!(node.ty(), &Type::Float, "{:?}", node.kind);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_store_types_untyped_local() {
        // new b = arg0 < 3; return b
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::Stack, &[-4]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::ConstAlt, &[3]).unwrap();
        asm.emit(Opcode::Sless, &[]).unwrap();
        asm.emit(Opcode::StorSPri, &[-4]).unwrap();
        asm.emit(Opcode::LoadSPri, &[-4]).unwrap();
        asm.emit(Opcode::Stack, &[4]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let graph = graph_at(&program, 0, Stage::TypesRefined).unwrap();
        let local = graph
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::DeclareLocal { .. }))
            .map(|(_, n)| n.ty().clone())
            .unwrap();
        assert_eq!(local, Type::Bool);
    }

    #[test]
    fn test_typing_after_heap_analysis_fails() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();

        let mut graph = graph_at(&program, 0, Stage::HeapAnalyzed).unwrap();
        let ctx = PassContext::new(&program, &program.functions()[0]);
        let pass = ForwardTypePass::new(Stage::TypesRefined);
        assert!(matches!(
            pass.apply(&mut graph, &ctx),
            Err(Error::PassOrder { .. })
        ));
        assert!(matches!(
            pass.run(&mut graph, &ctx),
            Err(Error::PassOrder { .. })
        ));
    }
}
