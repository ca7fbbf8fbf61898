//! Type inference over the node graph.
//!
//! Types live on the nodes and start at [`Type::Bottom`]. Two passes raise them:
//!
//! - [`ForwardTypePass`] derives the type of a node from its operands and from declarations
//!   (argument and local debug symbols, callee return tags, global tags)
//! - [`BackwardTypePass`] pushes the expectations of a user back into its operands (float
//!   operators, callee parameter tags, indexing, stores through typed references)
//!
//! Both only ever join, so alternating rounds converge. The scheduler runs a fixed number of
//! rounds rather than iterating to a fixpoint. Type propagation is legal only while
//! [`crate::compiler::Stage::allows_typing`] holds; afterwards types are frozen.

mod backward;
mod forward;
mod lattice;

pub use backward::BackwardTypePass;
pub use forward::ForwardTypePass;
pub use lattice::Type;

use crate::{
    analysis::nodes::{NodeGraph, NodeKind, NodeRef},
    compiler::PassContext,
    program::{Argument, VariableKind},
};

/// Returns `true` if the storage of `variable` is an array held in place, so that its
/// address is the array itself rather than a reference to it.
pub(crate) fn is_inplace_array(graph: &NodeGraph, variable: NodeRef) -> bool {
    let Some(node) = graph.get(variable) else {
        return false;
    };
    match node.kind {
        NodeKind::Argument(_) => false,
        NodeKind::StackSlot { cells, .. }
        | NodeKind::DeclareLocal { cells, .. }
        | NodeKind::Heap { cells } => cells > 1 || node.ty().is_array(),
        _ => false,
    }
}

/// Returns `true` if `address` designates a whole array rather than a single cell.
pub(crate) fn is_array_address(graph: &NodeGraph, ctx: &PassContext<'_>, address: NodeRef) -> bool {
    let Some(node) = graph.get(address) else {
        return false;
    };
    if node.ty().is_array() {
        return true;
    }
    match node.kind {
        NodeKind::LocalRef => node.operand(0).is_some_and(|v| is_inplace_array(graph, v)),
        NodeKind::GlobalRef(addr) => ctx
            .program
            .global_at(addr)
            .is_some_and(|g| g.address == addr && g.kind == VariableKind::Array),
        _ => false,
    }
}

/// The type an address must have to hold a value of type `target`.
pub(crate) fn address_type(
    graph: &NodeGraph,
    ctx: &PassContext<'_>,
    address: NodeRef,
    target: Type,
) -> Type {
    if is_array_address(graph, ctx, address) {
        Type::array(target)
    } else {
        Type::reference(target)
    }
}

/// The declared type of parameter `position` of a callee, if it is known.
///
/// Synthesized placeholders carry no evidence.
pub(crate) fn parameter_type(params: &[Argument], position: usize) -> Option<Type> {
    let param = params.get(position)?;
    if param.synthesized {
        return None;
    }
    Some(Type::from_declaration(param.kind, param.tag.as_ref()))
}

/// The type a user expects of its operand at `position`, from the user alone.
pub(crate) fn expected_operand_type(
    graph: &NodeGraph,
    ctx: &PassContext<'_>,
    user: NodeRef,
    position: usize,
) -> Option<Type> {
    let node = graph.get(user)?;
    match &node.kind {
        NodeKind::Binary(op) if op.is_float() => Some(Type::Float),
        NodeKind::Unary(crate::analysis::nodes::UnaryOp::FloatToInt) => Some(Type::Float),
        NodeKind::Index | NodeKind::ArrayRef if position == 1 => Some(Type::Int),
        NodeKind::Call(address) => {
            let callee = ctx.program.function_at(*address)?;
            parameter_type(&callee.args, position)
        }
        NodeKind::SysReq(index) => {
            let native = ctx.program.native(*index)?;
            parameter_type(&native.args, position)
        }
        NodeKind::Return => ctx
            .function
            .return_tag
            .as_ref()
            .map(|tag| Type::from_tag(Some(tag))),
        NodeKind::Store | NodeKind::CompoundStore(_) if position == 1 => {
            let target = graph.get(node.operand(0)?)?.ty().element();
            (!target.is_bottom()).then_some(target)
        }
        NodeKind::Phi
        | NodeKind::StackSlot { .. }
        | NodeKind::DeclareLocal { .. } => {
            let ty = node.ty();
            (!ty.is_bottom() && !ty.is_array()).then(|| ty.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Tag;

    #[test]
    fn test_parameter_type_skips_placeholders() {
        let params = vec![
            Argument::new(VariableKind::Scalar, "f").with_tag(Tag::Float),
            Argument::synthesized(1),
        ];
        assert_eq!(parameter_type(&params, 0), Some(Type::Float));
        assert_eq!(parameter_type(&params, 1), None);
        assert_eq!(parameter_type(&params, 2), None);
    }
}
