//! Cleanup of the raw structured tree.
//!
//! The builder emits every loop as `while (true)` with explicit exits and every branch with
//! both arms. This module rewrites that into the shapes a programmer would write:
//!
//! - nested sequences are flattened
//! - an arm ending in a jump lets the other arm follow the `if` instead of nesting in `else`
//! - a loop whose header only tests becomes `while (cond)`, without a trailing `continue`
//! - an initializing store before a loop whose body ends in a step on the same variable
//!   becomes a `for` header

use std::collections::BTreeSet;

use crate::{
    analysis::{NodeGraph, NodeKind, NodeRef},
    structure::{
        block::{Condition, ControlBlock, SwitchCase},
        has_phis, is_condition_block, is_inline_value,
    },
};

pub(crate) struct Simplifier<'a> {
    graph: &'a NodeGraph,
    labels: &'a BTreeSet<usize>,
}

impl<'a> Simplifier<'a> {
    pub(crate) fn new(graph: &'a NodeGraph, labels: &'a BTreeSet<usize>) -> Self {
        Simplifier { graph, labels }
    }

    pub(crate) fn simplify(&self, block: ControlBlock) -> ControlBlock {
        match block {
            ControlBlock::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    self.push(&mut out, self.simplify(item));
                }
                self.recognize_for(&mut out);
                Self::wrap(out)
            }
            ControlBlock::If {
                condition,
                then,
                otherwise,
            } => Self::simplify_if(
                condition,
                self.simplify(*then),
                otherwise.map(|o| self.simplify(*o)),
            ),
            ControlBlock::While { condition, body } => {
                self.simplify_loop(condition, self.simplify(*body))
            }
            ControlBlock::For {
                init,
                condition,
                step,
                body,
            } => ControlBlock::For {
                init,
                condition,
                step,
                body: Box::new(self.simplify(*body)),
            },
            ControlBlock::Switch {
                value,
                cases,
                default,
            } => ControlBlock::Switch {
                value,
                cases: cases
                    .into_iter()
                    .map(|case| SwitchCase {
                        values: case.values,
                        body: self.simplify(case.body),
                    })
                    .collect(),
                default: default.map(|d| Box::new(self.simplify(*d))),
            },
            ControlBlock::Labeled { label, body } => ControlBlock::Labeled {
                label,
                body: Box::new(self.simplify(*body)),
            },
            other => other,
        }
    }

    fn wrap(mut items: Vec<ControlBlock>) -> ControlBlock {
        if items.len() == 1 {
            if let Some(item) = items.pop() {
                return item;
            }
        }
        ControlBlock::Sequence(items)
    }

    fn into_items(block: ControlBlock) -> Vec<ControlBlock> {
        match block {
            ControlBlock::Sequence(items) => items,
            other => vec![other],
        }
    }

    fn push(&self, out: &mut Vec<ControlBlock>, item: ControlBlock) {
        match item {
            ControlBlock::Sequence(items) => {
                for item in items {
                    self.push(out, item);
                }
            }
            ControlBlock::If {
                condition,
                then,
                otherwise: Some(otherwise),
            } if then.is_jump() => {
                out.push(ControlBlock::If {
                    condition,
                    then,
                    otherwise: None,
                });
                self.push(out, *otherwise);
            }
            ControlBlock::If {
                condition,
                then,
                otherwise: Some(otherwise),
            } if otherwise.is_jump() => {
                out.push(ControlBlock::If {
                    condition: condition.negate(),
                    then: otherwise,
                    otherwise: None,
                });
                self.push(out, *then);
            }
            other => out.push(other),
        }
    }

    fn simplify_if(
        condition: Condition,
        then: ControlBlock,
        otherwise: Option<ControlBlock>,
    ) -> ControlBlock {
        match otherwise.filter(|o| !o.is_empty()) {
            Some(otherwise) if then.is_empty() => ControlBlock::If {
                condition: condition.negate(),
                then: Box::new(otherwise),
                otherwise: None,
            },
            Some(otherwise) if matches!(condition, Condition::Not(_)) => ControlBlock::If {
                condition: condition.negate(),
                then: Box::new(otherwise),
                otherwise: Some(Box::new(then)),
            },
            otherwise => ControlBlock::If {
                condition,
                then: Box::new(then),
                otherwise: otherwise.map(Box::new),
            },
        }
    }

    fn simplify_loop(&self, condition: Option<Condition>, body: ControlBlock) -> ControlBlock {
        let mut items = Self::into_items(body);
        if matches!(items.last(), Some(ControlBlock::Continue)) {
            items.pop();
        }

        if condition.is_none() {
            if let Some(condition) = self.header_test(&items) {
                items.drain(..2);
                return ControlBlock::While {
                    condition: Some(condition),
                    body: Box::new(Self::wrap(items)),
                };
            }
        }
        ControlBlock::While {
            condition,
            body: Box::new(Self::wrap(items)),
        }
    }

    /// The loop condition if the body opens with a header that only tests and breaks.
    fn header_test(&self, items: &[ControlBlock]) -> Option<Condition> {
        let [ControlBlock::Statements(header), ControlBlock::If {
            condition,
            then,
            otherwise: None,
        }, ..] = items
        else {
            return None;
        };
        let exits = **then == ControlBlock::Break;
        (exits && condition.only_tests(*header) && is_condition_block(self.graph, *header))
            .then(|| condition.clone().negate().inline(*header))
    }

    fn recognize_for(&self, items: &mut [ControlBlock]) {
        for i in 1..items.len() {
            if let Some(looped) = self.as_for(&items[i - 1], &items[i]) {
                items[i] = looped;
            }
        }
    }

    fn as_for(&self, before: &ControlBlock, looped: &ControlBlock) -> Option<ControlBlock> {
        let ControlBlock::Statements(pre) = *before else {
            return None;
        };
        let ControlBlock::While {
            condition: Some(condition),
            body,
        } = looped
        else {
            return None;
        };

        let mut headers = Vec::new();
        condition.inline_blocks(&mut headers);
        let header = *headers.first()?;
        if self.labels.contains(&header) || has_phis(self.graph, header) || Self::continues(body)
        {
            return None;
        }

        let latch = match body.as_ref() {
            ControlBlock::Statements(block) => *block,
            ControlBlock::Sequence(items) => match items.last()? {
                ControlBlock::Statements(block) => *block,
                _ => return None,
            },
            _ => return None,
        };
        if latch == pre {
            return None;
        }

        let init = self.last_statement(pre)?;
        let step = self.last_statement(latch)?;
        let variable = self.initialized_variable(init)?;
        if self.stepped_variable(step)? != variable {
            return None;
        }

        Some(ControlBlock::For {
            init,
            condition: condition.clone(),
            step,
            body: body.clone(),
        })
    }

    /// Returns `true` if the body restarts its own loop anywhere.
    fn continues(block: &ControlBlock) -> bool {
        match block {
            ControlBlock::Continue => true,
            ControlBlock::Sequence(items) => items.iter().any(Self::continues),
            ControlBlock::If {
                then, otherwise, ..
            } => Self::continues(then) || otherwise.as_deref().is_some_and(Self::continues),
            ControlBlock::Switch { cases, default, .. } => {
                cases.iter().any(|case| Self::continues(&case.body))
                    || default.as_deref().is_some_and(Self::continues)
            }
            ControlBlock::Labeled { body, .. } => Self::continues(body),
            _ => false,
        }
    }

    fn last_statement(&self, block: usize) -> Option<NodeRef> {
        let last = self
            .graph
            .block_nodes(block)
            .iter()
            .rev()
            .copied()
            .find(|&n| !self.graph[n].kind.is_control())?;
        (!is_inline_value(&self.graph[last])).then_some(last)
    }

    fn initialized_variable(&self, node: NodeRef) -> Option<NodeRef> {
        let n = self.graph.get(node)?;
        match n.kind {
            NodeKind::DeclareLocal { cells: 1, .. } if n.operands().len() == 1 => Some(node),
            NodeKind::Store => self.graph.referenced_variable(n.operand(0)?),
            _ => None,
        }
    }

    fn stepped_variable(&self, node: NodeRef) -> Option<NodeRef> {
        let n = self.graph.get(node)?;
        match n.kind {
            NodeKind::Store | NodeKind::CompoundStore(_) | NodeKind::IncDec(_) => {
                self.graph.referenced_variable(n.operand(0)?)
            }
            _ => None,
        }
    }

    /// Wraps the targets of gotos into [`ControlBlock::Labeled`].
    ///
    /// A loop whose header was folded into its condition is labeled as a whole, since
    /// jumping to the header re-evaluates the condition.
    pub(crate) fn attach_labels(&self, tree: ControlBlock) -> ControlBlock {
        let mut pending = self.labels.clone();
        Self::label(tree, &mut pending)
    }

    fn label(block: ControlBlock, pending: &mut BTreeSet<usize>) -> ControlBlock {
        match block {
            ControlBlock::Labeled { label, body } => {
                pending.remove(&label);
                ControlBlock::Labeled {
                    label,
                    body: Box::new(Self::label(*body, pending)),
                }
            }
            ControlBlock::Statements(block) if pending.remove(&block) => ControlBlock::Labeled {
                label: block,
                body: Box::new(ControlBlock::Statements(block)),
            },
            ControlBlock::Sequence(items) => ControlBlock::Sequence(
                items
                    .into_iter()
                    .map(|item| Self::label(item, pending))
                    .collect(),
            ),
            ControlBlock::If {
                condition,
                then,
                otherwise,
            } => ControlBlock::If {
                condition,
                then: Box::new(Self::label(*then, pending)),
                otherwise: otherwise.map(|o| Box::new(Self::label(*o, pending))),
            },
            ControlBlock::While { condition, body } => {
                let target = condition.as_ref().and_then(|c| {
                    let mut blocks = Vec::new();
                    c.inline_blocks(&mut blocks);
                    blocks.into_iter().find(|b| pending.contains(b))
                });
                if let Some(target) = target {
                    pending.remove(&target);
                }
                let looped = ControlBlock::While {
                    condition,
                    body: Box::new(Self::label(*body, pending)),
                };
                match target {
                    Some(label) => ControlBlock::Labeled {
                        label,
                        body: Box::new(looped),
                    },
                    None => looped,
                }
            }
            ControlBlock::For {
                init,
                condition,
                step,
                body,
            } => ControlBlock::For {
                init,
                condition,
                step,
                body: Box::new(Self::label(*body, pending)),
            },
            ControlBlock::Switch {
                value,
                cases,
                default,
            } => ControlBlock::Switch {
                value,
                cases: cases
                    .into_iter()
                    .map(|case| SwitchCase {
                        values: case.values,
                        body: Self::label(case.body, pending),
                    })
                    .collect(),
                default: default.map(|d| Box::new(Self::label(*d, pending))),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Assembler,
        compiler::Stage,
        disassembler::Opcode,
        program::{Function, LocalSymbol, Program, VariableKind},
        structure::StructureBuilder,
        test::graph_at,
    };

    #[test]
    fn test_counting_loop_becomes_for() {
        // for (new i = 0; i < 10; i++) arg0 += i; return 0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::PushC, &[0]).unwrap();
        asm.define_label("head").unwrap();
        asm.emit(Opcode::LoadSPri, &[-4]).unwrap();
        asm.emit(Opcode::ConstAlt, &[10]).unwrap();
        asm.emit_branch(Opcode::Jsgeq, "exit").unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[-4]).unwrap();
        asm.emit(Opcode::Add, &[]).unwrap();
        asm.emit(Opcode::StorSPri, &[12]).unwrap();
        asm.emit(Opcode::IncS, &[-4]).unwrap();
        asm.emit_branch(Opcode::Jump, "head").unwrap();
        asm.define_label("exit").unwrap();
        asm.emit(Opcode::Stack, &[4]).unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let mut function = Function::new("f", 0, u32::MAX);
        function.locals = vec![LocalSymbol {
            offset: -4,
            name: "i".into(),
            kind: VariableKind::Scalar,
            tag: None,
        }];
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function_with(function)
            .build();
        let mut graph = graph_at(&program, 0, Stage::DeclarationsCoalesced).unwrap();
        let tree = StructureBuilder::run(&mut graph).unwrap();

        let ControlBlock::Sequence(items) = &tree else {
            panic!("expected a sequence, got {tree:?}");
        };
        let found = items.iter().find_map(|item| match item {
            ControlBlock::For { init, step, .. } => Some((*init, *step)),
            _ => None,
        });
        let (init, step) = found.unwrap();
        assert!(matches!(graph[init].kind, NodeKind::DeclareLocal { .. }));
        assert_eq!(graph[step].kind, NodeKind::IncDec(1));
    }
}
