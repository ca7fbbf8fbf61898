//! Inline expression printing.

use std::collections::HashMap;

use crate::{
    analysis::{BinaryOp, Literal, NodeFlags, NodeGraph, NodeKind, NodeRef, Type, UnaryOp},
    program::Program,
    structure::Condition,
};

/// Binding strength of names, literals and calls.
const ATOM: u8 = 20;
/// Binding strength of prefix operators.
const PREFIX: u8 = 15;
/// Binding strength of `&&`.
const AND: u8 = 2;
/// Binding strength of `||`.
const OR: u8 = 1;

/// Prints node values as source expressions.
pub(crate) struct ExpressionPrinter<'a> {
    program: &'a Program,
    graph: &'a NodeGraph,
    /// Names read in place of a variable while its value lives in a temporary
    aliases: HashMap<NodeRef, String>,
}

impl<'a> ExpressionPrinter<'a> {
    pub(crate) fn new(program: &'a Program, graph: &'a NodeGraph) -> Self {
        ExpressionPrinter {
            program,
            graph,
            aliases: HashMap::new(),
        }
    }

    /// Reads `node` as `name` until [`ExpressionPrinter::clear_aliases`].
    pub(crate) fn alias(&mut self, node: NodeRef, name: String) {
        self.aliases.insert(node, name);
    }

    pub(crate) fn is_aliased(&self, node: NodeRef) -> bool {
        self.aliases.contains_key(&node)
    }

    pub(crate) fn clear_aliases(&mut self) {
        self.aliases.clear();
    }

    /// The name a node is referred to by, if it is printed by name.
    pub(crate) fn name(&self, node: NodeRef) -> Option<String> {
        if let Some(alias) = self.aliases.get(&node) {
            return Some(alias.clone());
        }
        self.variable(node)
    }

    /// The declared name of a node, ignoring aliases.
    pub(crate) fn variable(&self, node: NodeRef) -> Option<String> {
        let n = self.graph.get(node)?;
        let named = n.kind.is_variable()
            || n.kind == NodeKind::Phi
            || n.flags.contains(NodeFlags::MATERIALIZED);
        if !named {
            return None;
        }
        let fallback = match n.kind {
            NodeKind::Argument(index) => self
                .graph
                .arguments()
                .get(index)
                .map_or_else(|| format!("_arg{index}"), |a| a.name.clone()),
            _ => format!("v{}", node.index()),
        };
        Some(n.name.clone().unwrap_or(fallback))
    }

    /// The expression computing `node`, or its name.
    pub(crate) fn value(&self, node: NodeRef) -> String {
        self.name(node).unwrap_or_else(|| self.inner(node))
    }

    /// The expression computing `node`, even if it has a name.
    pub(crate) fn inner(&self, node: NodeRef) -> String {
        let Some(n) = self.graph.get(node) else {
            return format!("{node}");
        };
        let value_of = |i: usize| n.operand(i).map_or_else(String::new, |o| self.value(o));

        match &n.kind {
            NodeKind::Constant(value) => self.constant(*value, n.ty()),
            NodeKind::Literal(Literal::String(text)) => quote(text),
            NodeKind::Literal(Literal::Cells(cells)) => {
                let cells: Vec<String> = cells.iter().map(i32::to_string).collect();
                format!("{{{}}}", cells.join(", "))
            }
            NodeKind::LocalRef => value_of(0),
            NodeKind::GlobalRef(address) => self.global(*address),
            NodeKind::Index | NodeKind::ArrayRef => {
                let base = n.operand(0).map_or_else(String::new, |b| self.operand(b, ATOM));
                format!("{base}[{}]", value_of(1))
            }
            NodeKind::Load => n.operand(0).map_or_else(String::new, |a| self.place(a)),
            NodeKind::Binary(op) => match (n.operand(0), n.operand(1)) {
                (Some(lhs), Some(rhs)) => self.binary(*op, lhs, rhs),
                _ => format!("{node}"),
            },
            NodeKind::Unary(op) => {
                let Some(value) = n.operand(0) else {
                    return format!("{node}");
                };
                match op {
                    UnaryOp::Not => format!("!{}", self.operand(value, PREFIX)),
                    UnaryOp::Neg => format!("-{}", self.operand(value, PREFIX)),
                    UnaryOp::Invert => format!("~{}", self.operand(value, PREFIX)),
                    UnaryOp::IntToFloat => format!("float({})", self.value(value)),
                    UnaryOp::FloatToInt => format!("RoundToZero({})", self.value(value)),
                }
            }
            NodeKind::Call(address) => {
                let name = self
                    .program
                    .function_at(*address)
                    .map_or_else(|| format!("func_{address:x}"), |f| f.name.clone());
                format!("{name}({})", self.arguments(n.operands()))
            }
            NodeKind::SysReq(index) => {
                let name = self
                    .program
                    .native(*index)
                    .map_or_else(|| format!("native{index}"), |f| f.name.clone());
                format!("{name}({})", self.arguments(n.operands()))
            }
            NodeKind::Argument(_)
            | NodeKind::StackSlot { .. }
            | NodeKind::DeclareLocal { .. }
            | NodeKind::Heap { .. }
            | NodeKind::Phi => self.name(node).unwrap_or_else(|| format!("{node}")),
            _ => format!("{node}"),
        }
    }

    /// The storage written through `address`.
    ///
    /// References print as the referenced variable, so reading through a by-reference
    /// argument and reading the argument look the same.
    pub(crate) fn place(&self, address: NodeRef) -> String {
        if let Some(name) = self.name(address) {
            return name;
        }
        let Some(n) = self.graph.get(address) else {
            return format!("{address}");
        };
        match n.kind {
            NodeKind::Load => n.operand(0).map_or_else(String::new, |a| self.place(a)),
            _ => self.inner(address),
        }
    }

    pub(crate) fn global(&self, address: u32) -> String {
        self.program
            .global_at(address)
            .map_or_else(|| format!("g_{address:x}"), |g| g.name.clone())
    }

    fn constant(&self, value: i32, ty: &Type) -> String {
        match ty {
            Type::Float => float(f32::from_bits(value as u32)),
            Type::Bool => (value != 0).to_string(),
            Type::String => self
                .program
                .string_at(value as u32)
                .map_or_else(|| value.to_string(), |text| quote(&text)),
            _ => value.to_string(),
        }
    }

    fn arguments(&self, operands: &[NodeRef]) -> String {
        operands
            .iter()
            .map(|&o| self.value(o))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn binary(&self, op: BinaryOp, lhs: NodeRef, rhs: NodeRef) -> String {
        let precedence = op.precedence();
        format!(
            "{} {} {}",
            self.operand(lhs, precedence),
            op.symbol(),
            self.operand(rhs, precedence + 1)
        )
    }

    fn precedence(&self, node: NodeRef) -> u8 {
        if self.name(node).is_some() {
            return ATOM;
        }
        match self.graph.get(node).map(|n| &n.kind) {
            Some(NodeKind::Binary(op)) => op.precedence(),
            Some(NodeKind::Unary(UnaryOp::Not | UnaryOp::Neg | UnaryOp::Invert)) => PREFIX,
            _ => ATOM,
        }
    }

    /// Prints `node`, parenthesized if it binds weaker than `min`.
    fn operand(&self, node: NodeRef, min: u8) -> String {
        let text = self.value(node);
        if self.precedence(node) < min {
            format!("({text})")
        } else {
            text
        }
    }

    /// Prints a branch condition.
    pub(crate) fn condition(&self, condition: &Condition) -> String {
        self.condition_at(condition, 0)
    }

    fn condition_at(&self, condition: &Condition, min: u8) -> String {
        match condition {
            Condition::Test { value, .. } | Condition::Inline { value, .. } => self.value(*value),
            Condition::Not(inner) => match inner.as_ref() {
                Condition::Test { value, .. } | Condition::Inline { value, .. } => {
                    self.negation(*value)
                }
                other => format!("!({})", self.condition_at(other, 0)),
            },
            Condition::And(a, b) => {
                let text = format!("{} && {}", self.condition_at(a, AND), self.condition_at(b, AND));
                if AND < min {
                    format!("({text})")
                } else {
                    text
                }
            }
            Condition::Or(a, b) => {
                let text = format!("{} || {}", self.condition_at(a, OR), self.condition_at(b, OR));
                if OR < min {
                    format!("({text})")
                } else {
                    text
                }
            }
        }
    }

    /// `!value`, flipping a comparison instead where possible.
    fn negation(&self, value: NodeRef) -> String {
        if self.name(value).is_none() {
            if let Some(n) = self.graph.get(value) {
                if let (NodeKind::Binary(op), Some(lhs), Some(rhs)) =
                    (&n.kind, n.operand(0), n.operand(1))
                {
                    if let Some(negated) = op.negated() {
                        return self.binary(negated, lhs, rhs);
                    }
                }
                if let (NodeKind::Unary(UnaryOp::Not), Some(inner)) = (&n.kind, n.operand(0)) {
                    return self.value(inner);
                }
            }
        }
        format!("!{}", self.operand(value, PREFIX))
    }
}

/// A float literal that always reads back as a float.
pub(crate) fn float(value: f32) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// A quoted, escaped string literal.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_literals_keep_a_fraction() {
        assert_eq!(float(1.0), "1.0");
        assert_eq!(float(-2.5), "-2.5");
        assert_eq!(float(0.1), "0.1");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("say \"hi\"\n"), "\"say \\\"hi\\\"\\n\"");
    }
}
