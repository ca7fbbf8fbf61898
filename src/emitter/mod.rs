//! Source text output.
//!
//! [`SourceWriter`] prints the structured tree of each function as source code, reading
//! expressions straight from the function's node graph:
//!
//! - variables, phis and materialized values print by their assigned names
//! - every other value prints inline at its single use, parenthesized by precedence
//! - phis are declared at the top of the body and assigned on each incoming edge, in an
//!   order that never overwrites a value another assignment still reads
//! - materialized values read outside their own block are declared at the top as well
//!
//! One writer owns one `String` buffer; nothing is shared between runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use smxscope::{emitter::render, Decompiler, Program};
//!
//! let program = Program::builder().code(std::fs::read("code.bin")?).function("main", 0).build();
//! let mut decompiler = Decompiler::new(program);
//! let decompilation = decompiler.run();
//! println!("{}", render(decompiler.program(), &decompilation));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod expression;

use std::{collections::HashSet, fmt::Write};

use crate::{
    analysis::{Node, NodeFlags, NodeGraph, NodeKind, NodeRef},
    decompiler::{Decompilation, DecompiledFunction, FunctionOutput},
    program::{Argument, Function, Global, Program, VariableKind},
    structure::{edge_moves, ControlBlock},
    Error,
};

use expression::ExpressionPrinter;

/// Renders a whole decompilation: preprocessing failures, globals, then every function in
/// input order.
#[must_use]
pub fn render(program: &Program, decompilation: &Decompilation) -> String {
    let mut writer = SourceWriter::new();
    for failure in &decompilation.preprocess_failures {
        writer.write_preprocess_failure(&failure.name, failure.index, &failure.error);
    }
    if decompilation.emit_globals {
        writer.write_globals(program);
    }
    for output in &decompilation.functions {
        match output {
            FunctionOutput::Ok(function) => writer.write_function(program, function),
            FunctionOutput::Failed { name, index, error } => {
                writer.write_failure(name, *index, error);
            }
        }
    }
    writer.finish()
}

/// Indenting text buffer for decompiled source.
#[derive(Debug, Default)]
pub struct SourceWriter {
    buffer: String,
    indent: usize,
}

impl SourceWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the writer, returning the text.
    #[must_use]
    pub fn finish(self) -> String {
        self.buffer
    }

    /// The text written so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.buffer.push_str("    ");
        }
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self, text: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    /// Writes one declaration per global variable, followed by a blank line.
    pub fn write_globals(&mut self, program: &Program) {
        if program.globals().is_empty() {
            return;
        }
        for global in program.globals() {
            let text = global_declaration(global);
            self.line(&text);
        }
        self.buffer.push('\n');
    }

    /// Writes the placeholder of a function whose pipeline failed.
    pub fn write_failure(&mut self, name: &str, index: usize, error: &Error) {
        self.buffer.push('\n');
        let _ = writeln!(self.buffer, "/* ERROR! {error} */");
        let _ = writeln!(self.buffer, " function \"{name}\" (number {index})");
    }

    /// Writes the placeholder of a function that could not be preprocessed.
    pub fn write_preprocess_failure(&mut self, name: &str, index: usize, error: &Error) {
        self.buffer.push('\n');
        let _ = writeln!(self.buffer, "/* ERROR PREPROCESSING! {error} */");
        let _ = writeln!(self.buffer, "// function \"{name}\" (number {index})");
    }

    /// Writes one decompiled function followed by a blank line.
    pub fn write_function(&mut self, program: &Program, output: &DecompiledFunction) {
        let graph = &output.graph;
        let exprs = ExpressionPrinter::new(program, graph);

        self.line(&signature(&output.function));
        self.open("{");
        let mut declared = HashSet::new();
        for (node, n) in graph.iter() {
            let hoist = n.kind == NodeKind::Phi
                || (n.flags.contains(NodeFlags::MATERIALIZED) && read_elsewhere(graph, node, n));
            if hoist {
                let name = exprs.value(node);
                self.line(&format!("new {}{name};", n.ty().tag_prefix()));
                declared.insert(node);
            }
        }

        let mut body = BodyWriter {
            out: self,
            exprs,
            graph,
            hoisted: HashSet::new(),
            declared,
            swaps: 0,
        };
        body.block(&output.body);
        self.close("}");
        self.buffer.push('\n');
    }
}

/// Walks a structured tree, printing statements through the expression printer.
struct BodyWriter<'w, 'a> {
    out: &'w mut SourceWriter,
    exprs: ExpressionPrinter<'a>,
    graph: &'a NodeGraph,
    /// Nodes printed in a `for` header instead of their block
    hoisted: HashSet<NodeRef>,
    /// Values declared at the top of the body
    declared: HashSet<NodeRef>,
    /// Temporaries introduced to break cyclic phi assignments
    swaps: usize,
}

impl BodyWriter<'_, '_> {
    fn block(&mut self, tree: &ControlBlock) {
        match tree {
            ControlBlock::Sequence(items) => {
                for item in items {
                    self.block(item);
                }
            }
            ControlBlock::Statements(block) => self.statements(*block),
            ControlBlock::If {
                condition,
                then,
                otherwise,
            } => {
                let head = format!("if ({}) {{", self.exprs.condition(condition));
                self.out.open(&head);
                self.block(then);
                let mut otherwise = otherwise.as_deref();
                while let Some(arm) = otherwise {
                    match arm {
                        ControlBlock::If {
                            condition,
                            then,
                            otherwise: next,
                        } => {
                            let head = format!("}} else if ({}) {{", self.exprs.condition(condition));
                            self.out.close(&head);
                            self.out.indent += 1;
                            self.block(then);
                            otherwise = next.as_deref();
                        }
                        arm => {
                            self.out.close("} else {");
                            self.out.indent += 1;
                            self.block(arm);
                            otherwise = None;
                        }
                    }
                }
                self.out.close("}");
            }
            ControlBlock::While { condition, body } => {
                let condition = condition
                    .as_ref()
                    .map_or_else(|| "true".to_string(), |c| self.exprs.condition(c));
                self.out.open(&format!("while ({condition}) {{"));
                self.block(body);
                self.out.close("}");
            }
            ControlBlock::For {
                init,
                condition,
                step,
                body,
            } => {
                let init_text = self.statement(*init).unwrap_or_default();
                let step_text = self.statement(*step).unwrap_or_default();
                self.hoisted.insert(*init);
                self.hoisted.insert(*step);
                let head = format!(
                    "for ({init_text}; {}; {step_text}) {{",
                    self.exprs.condition(condition)
                );
                self.out.open(&head);
                self.block(body);
                self.out.close("}");
            }
            ControlBlock::Switch {
                value,
                cases,
                default,
            } => {
                self.out
                    .open(&format!("switch ({}) {{", self.exprs.value(*value)));
                for case in cases {
                    let values: Vec<String> = case.values.iter().map(i32::to_string).collect();
                    self.out.open(&format!("case {}: {{", values.join(", ")));
                    self.block(&case.body);
                    self.out.close("}");
                }
                if let Some(default) = default {
                    self.out.open("default: {");
                    self.block(default);
                    self.out.close("}");
                }
                self.out.close("}");
            }
            ControlBlock::Break => self.out.line("break;"),
            ControlBlock::Continue => self.out.line("continue;"),
            ControlBlock::Return(value) => match value {
                Some(value) => {
                    let text = format!("return {};", self.exprs.value(*value));
                    self.out.line(&text);
                }
                None => self.out.line("return;"),
            },
            ControlBlock::Labeled { label, body } => {
                let indent = self.out.indent;
                self.out.indent = indent.saturating_sub(1);
                self.out.line(&format!("label{label}:"));
                self.out.indent = indent;
                self.block(body);
            }
            ControlBlock::Goto(label) => self.out.line(&format!("goto label{label};")),
            ControlBlock::Moves { from, to } => self.moves(*from, *to),
        }
    }

    /// Prints the statements of `block`.
    fn statements(&mut self, block: usize) {
        for &node in self.graph.block_nodes(block) {
            if self.hoisted.contains(&node) {
                continue;
            }
            if let Some(text) = self.statement(node) {
                self.out.line(&format!("{text};"));
            }
        }
    }

    /// Prints the phi assignments of the edge from `from` to `to`.
    ///
    /// All assignments read the values from before the edge. An assignment is printed once
    /// no pending one reads its phi; when every phi is still read, one is saved to a
    /// temporary first.
    fn moves(&mut self, from: usize, to: usize) {
        let mut pending = edge_moves(self.graph, from, to);
        while !pending.is_empty() {
            let ready = pending.iter().position(|&(phi, _)| {
                !pending
                    .iter()
                    .any(|&(other, value)| other != phi && self.reads(value, phi))
            });
            match ready {
                Some(index) => {
                    let (phi, value) = pending.remove(index);
                    let target = self.exprs.variable(phi).unwrap_or_else(|| format!("{phi}"));
                    let text = format!("{target} = {};", self.exprs.value(value));
                    self.out.line(&text);
                }
                None => {
                    let (phi, _) = pending[0];
                    let saved = format!("swap{}", self.swaps);
                    self.swaps += 1;
                    let text = format!(
                        "new {}{saved} = {};",
                        self.graph[phi].ty().tag_prefix(),
                        self.exprs.value(phi)
                    );
                    self.out.line(&text);
                    self.exprs.alias(phi, saved);
                }
            }
        }
        self.exprs.clear_aliases();
    }

    /// Returns `true` if the printed expression of `value` reads the variable `phi`.
    fn reads(&self, value: NodeRef, phi: NodeRef) -> bool {
        if value == phi {
            return !self.exprs.is_aliased(phi);
        }
        if self.exprs.name(value).is_some() {
            return false;
        }
        self.graph
            .get(value)
            .is_some_and(|n| n.operands().iter().any(|&o| self.reads(o, phi)))
    }

    /// The statement printed for `node`, without the trailing semicolon.
    fn statement(&self, node: NodeRef) -> Option<String> {
        let n = self.graph.get(node)?;
        let exprs = &self.exprs;
        let place = |i: usize| n.operand(i).map_or_else(String::new, |a| exprs.place(a));
        let value = |i: usize| n.operand(i).map_or_else(String::new, |v| exprs.value(v));

        match &n.kind {
            NodeKind::DeclareLocal { cells, .. } | NodeKind::StackSlot { cells, .. } => {
                Some(self.declaration(node, n, *cells))
            }
            NodeKind::Heap { cells } if n.flags.contains(NodeFlags::HEAP) => {
                Some(self.declaration(node, n, *cells))
            }
            NodeKind::Store | NodeKind::MemCopy(_) | NodeKind::Initialize => {
                Some(format!("{} = {}", place(0), value(1)))
            }
            NodeKind::CompoundStore(op) => {
                Some(format!("{} {}= {}", place(0), op.symbol(), value(1)))
            }
            NodeKind::IncDec(delta) => Some(format!(
                "{}{}",
                place(0),
                if *delta < 0 { "--" } else { "++" }
            )),
            NodeKind::Fill(_) => Some(format!("{} = {{{}, ...}}", place(0), value(1))),
            NodeKind::Halt => Some(format!("halt({})", value(0))),
            NodeKind::Call(_) | NodeKind::SysReq(_)
                if !n.flags.contains(NodeFlags::MATERIALIZED) =>
            {
                self.graph.is_unused(node).then(|| exprs.inner(node))
            }
            _ if n.flags.contains(NodeFlags::MATERIALIZED) && self.declared.contains(&node) => {
                Some(format!("{} = {}", exprs.value(node), exprs.inner(node)))
            }
            _ if n.flags.contains(NodeFlags::MATERIALIZED) => Some(format!(
                "new {}{} = {}",
                n.ty().tag_prefix(),
                exprs.value(node),
                exprs.inner(node)
            )),
            _ => None,
        }
    }

    fn declaration(&self, node: NodeRef, n: &Node, cells: u32) -> String {
        let name = self.exprs.value(node);
        let prefix = n.ty().tag_prefix();
        let mut text = if cells > 1 || n.ty().is_array() {
            format!("new {prefix}{name}[{cells}]")
        } else {
            format!("new {prefix}{name}")
        };
        if let Some(init) = n.operand(0) {
            let _ = write!(text, " = {}", self.exprs.value(init));
        }
        text
    }
}

/// Returns `true` if a value defined in one block is read from another.
///
/// A phi reads its operand on the edge from the matching predecessor, so only operands
/// arriving from other blocks count.
fn read_elsewhere(graph: &NodeGraph, node: NodeRef, n: &Node) -> bool {
    graph.uses(node).iter().any(|&user| {
        let Some(u) = graph.get(user) else {
            return false;
        };
        if u.kind == NodeKind::Phi {
            let preds = graph.predecessors(u.block);
            u.operands()
                .iter()
                .zip(&preds)
                .any(|(&operand, &pred)| operand == node && pred != n.block)
        } else {
            u.block != n.block
        }
    })
}

fn argument(arg: &Argument) -> String {
    let tag = arg.tag.as_ref().map(|t| t.prefix()).unwrap_or_default();
    let mut text = match arg.kind {
        VariableKind::Reference => format!("&{tag}{}", arg.name),
        _ => format!("{tag}{}", arg.name),
    };
    if arg.kind == VariableKind::Array {
        if arg.dims.is_empty() {
            text.push_str("[]");
        }
        for &dim in &arg.dims {
            if dim == 0 {
                text.push_str("[]");
            } else {
                let _ = write!(text, "[{dim}]");
            }
        }
    }
    if let Some(default) = arg.default {
        let _ = write!(text, " = {default}");
    }
    text
}

fn signature(function: &Function) -> String {
    let tag = function
        .return_tag
        .as_ref()
        .map(|t| t.prefix())
        .unwrap_or_default();
    let args: Vec<String> = function.args.iter().map(argument).collect();
    format!("{tag}{}({})", function.name, args.join(", "))
}

fn global_declaration(global: &Global) -> String {
    let tag = global.tag.as_ref().map(|t| t.prefix()).unwrap_or_default();
    let mut text = format!("new {tag}{}", global.name);
    if global.kind == VariableKind::Array {
        if global.dims.is_empty() {
            text.push_str("[]");
        }
        for &dim in &global.dims {
            let _ = write!(text, "[{dim}]");
        }
    }
    text.push(';');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Tag;

    #[test]
    fn test_signature_with_tags_and_kinds() {
        let mut function = Function::new("OnHit", 0, u32::MAX);
        function.return_tag = Some(Tag::Float);
        function.args = vec![
            Argument::new(VariableKind::Scalar, "client"),
            Argument::new(VariableKind::Reference, "damage").with_tag(Tag::Float),
            Argument::new(VariableKind::Array, "name").with_tag(Tag::String),
            Argument::new(VariableKind::Scalar, "flags").with_default(2),
        ];
        assert_eq!(
            signature(&function),
            "Float:OnHit(client, &Float:damage, String:name[], flags = 2)"
        );
    }

    #[test]
    fn test_global_declarations() {
        let mut table = Global::new("g_Table", 8);
        table.kind = VariableKind::Array;
        table.dims = vec![4];
        table.tag = Some(Tag::Float);
        assert_eq!(global_declaration(&table), "new Float:g_Table[4];");
        assert_eq!(global_declaration(&Global::new("g_Count", 0)), "new g_Count;");
    }

    #[test]
    fn test_failure_placeholders() {
        let mut writer = SourceWriter::new();
        let error = Error::Structural("Stack underflow".into());
        writer.write_failure("broken", 1, &error);
        writer.write_preprocess_failure("broken", 1, &error);
        let text = writer.finish();
        assert!(text.contains("/* ERROR! Structural inconsistency: Stack underflow */\n"));
        assert!(text.contains(" function \"broken\" (number 1)\n"));
        assert!(text.contains("/* ERROR PREPROCESSING! "));
        assert!(text.contains("// function \"broken\" (number 1)\n"));
    }
}
