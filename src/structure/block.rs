//! The structured control tree.

use crate::analysis::NodeRef;

/// A branch condition.
///
/// Leaves name the block whose branch computes the value. A [`Condition::Test`] block is
/// placed separately as [`ControlBlock::Statements`]; a [`Condition::Inline`] block holds
/// nothing but its branch and exists only inside the condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Branch value of a block placed elsewhere
    Test {
        /// The evaluating block
        block: usize,
        /// The branch operand
        value: NodeRef,
    },
    /// Branch value of a block folded into the condition
    Inline {
        /// The folded block
        block: usize,
        /// The branch operand
        value: NodeRef,
    },
    /// Logical negation
    Not(Box<Condition>),
    /// Short-circuit conjunction
    And(Box<Condition>, Box<Condition>),
    /// Short-circuit disjunction
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// The logical negation, removing a double negation instead of adding one.
    ///
    /// A chain whose operands are both negated is inverted by De Morgan's laws, so
    /// `!(!a || !b)` becomes `a && b`.
    #[must_use]
    pub fn negate(self) -> Condition {
        match self {
            Condition::Not(inner) => *inner,
            Condition::And(a, b) if a.is_negated() && b.is_negated() => {
                (*a).negate().or((*b).negate())
            }
            Condition::Or(a, b) if a.is_negated() && b.is_negated() => {
                (*a).negate().and((*b).negate())
            }
            other => Condition::Not(Box::new(other)),
        }
    }

    fn is_negated(&self) -> bool {
        matches!(self, Condition::Not(_))
    }

    /// `self && other`.
    #[must_use]
    pub fn and(self, other: Condition) -> Condition {
        Condition::And(Box::new(self), Box::new(other))
    }

    /// `self || other`.
    #[must_use]
    pub fn or(self, other: Condition) -> Condition {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Turns the tests of `block` into inline leaves.
    #[must_use]
    pub fn inline(self, block: usize) -> Condition {
        match self {
            Condition::Test { block: b, value } if b == block => Condition::Inline { block, value },
            Condition::Not(c) => Condition::Not(Box::new((*c).inline(block))),
            Condition::And(a, b) => (*a).inline(block).and((*b).inline(block)),
            Condition::Or(a, b) => (*a).inline(block).or((*b).inline(block)),
            other => other,
        }
    }

    /// Returns `true` if every leaf is evaluated by `block` or inline.
    #[must_use]
    pub fn only_tests(&self, block: usize) -> bool {
        match self {
            Condition::Test { block: b, .. } => *b == block,
            Condition::Inline { .. } => true,
            Condition::Not(c) => c.only_tests(block),
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.only_tests(block) && b.only_tests(block)
            }
        }
    }

    /// Appends the blocks folded into this condition.
    pub fn inline_blocks(&self, out: &mut Vec<usize>) {
        match self {
            Condition::Test { .. } => {}
            Condition::Inline { block, .. } => out.push(*block),
            Condition::Not(c) => c.inline_blocks(out),
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.inline_blocks(out);
                b.inline_blocks(out);
            }
        }
    }
}

/// One arm of a [`ControlBlock::Switch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    /// Case values dispatching to this arm, in table order
    pub values: Vec<i32>,
    /// The arm body
    pub body: ControlBlock,
}

/// A node of the structured control tree.
///
/// Every basic block of the function appears exactly once, either as
/// [`ControlBlock::Statements`] or folded into a [`Condition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlBlock {
    /// Blocks executed in order
    Sequence(Vec<ControlBlock>),
    /// The statements of one basic block, without its terminating branch
    Statements(usize),
    /// Two-way conditional
    If {
        /// Condition selecting `then`
        condition: Condition,
        /// Taken arm
        then: Box<ControlBlock>,
        /// Optional else arm
        otherwise: Option<Box<ControlBlock>>,
    },
    /// Pre-tested loop; `None` loops forever
    While {
        /// Loop condition
        condition: Option<Condition>,
        /// Loop body
        body: Box<ControlBlock>,
    },
    /// Counting loop
    For {
        /// Initializing store or declaration, printed in the header
        init: NodeRef,
        /// Loop condition
        condition: Condition,
        /// Step at the end of the body, printed in the header
        step: NodeRef,
        /// Loop body
        body: Box<ControlBlock>,
    },
    /// Multi-way dispatch on a value
    Switch {
        /// The dispatched value
        value: NodeRef,
        /// Case arms in table order
        cases: Vec<SwitchCase>,
        /// Default arm
        default: Option<Box<ControlBlock>>,
    },
    /// Leaves the innermost loop
    Break,
    /// Restarts the innermost loop
    Continue,
    /// Function return
    Return(Option<NodeRef>),
    /// A jump target for [`ControlBlock::Goto`]
    Labeled {
        /// Label, the id of the target block
        label: usize,
        /// The labeled code
        body: Box<ControlBlock>,
    },
    /// Jump to a labeled block
    Goto(usize),
    /// Assignments to the phis of `to` along the edge from `from`
    Moves {
        /// Predecessor block
        from: usize,
        /// Block whose phis are assigned
        to: usize,
    },
}

impl ControlBlock {
    /// An empty sequence.
    #[must_use]
    pub fn empty() -> ControlBlock {
        ControlBlock::Sequence(Vec::new())
    }

    /// Returns `true` for an empty sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, ControlBlock::Sequence(items) if items.iter().all(ControlBlock::is_empty))
    }

    /// Returns `true` if control never falls out of this block.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        match self {
            ControlBlock::Break
            | ControlBlock::Continue
            | ControlBlock::Return(_)
            | ControlBlock::Goto(_) => true,
            ControlBlock::Sequence(items) => items.last().is_some_and(ControlBlock::is_jump),
            _ => false,
        }
    }

    /// The blocks placed in this subtree, in placement order.
    ///
    /// Each block appears once per placement, so a well-formed tree yields every block of
    /// the function exactly once.
    #[must_use]
    pub fn placed_blocks(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_blocks(&mut out);
        out
    }

    fn collect_blocks(&self, out: &mut Vec<usize>) {
        match self {
            ControlBlock::Sequence(items) => {
                for item in items {
                    item.collect_blocks(out);
                }
            }
            ControlBlock::Statements(block) => out.push(*block),
            ControlBlock::If {
                condition,
                then,
                otherwise,
            } => {
                condition.inline_blocks(out);
                then.collect_blocks(out);
                if let Some(otherwise) = otherwise {
                    otherwise.collect_blocks(out);
                }
            }
            ControlBlock::While { condition, body } => {
                if let Some(condition) = condition {
                    condition.inline_blocks(out);
                }
                body.collect_blocks(out);
            }
            ControlBlock::For {
                condition, body, ..
            } => {
                condition.inline_blocks(out);
                body.collect_blocks(out);
            }
            ControlBlock::Switch { cases, default, .. } => {
                for case in cases {
                    case.body.collect_blocks(out);
                }
                if let Some(default) = default {
                    default.collect_blocks(out);
                }
            }
            ControlBlock::Labeled { body, .. } => body.collect_blocks(out),
            ControlBlock::Break
            | ControlBlock::Continue
            | ControlBlock::Return(_)
            | ControlBlock::Goto(_)
            | ControlBlock::Moves { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(block: usize) -> Condition {
        Condition::Test {
            block,
            value: NodeRef::new(block),
        }
    }

    #[test]
    fn test_double_negation_cancels() {
        let c = test(0).negate().negate();
        assert_eq!(c, test(0));
    }

    #[test]
    fn test_de_morgan() {
        let c = test(0).negate().or(test(1).negate()).negate();
        assert_eq!(c, test(0).and(test(1)));
        let mixed = test(0).and(test(1).negate()).negate();
        assert!(matches!(mixed, Condition::Not(_)));
    }

    #[test]
    fn test_inline_rewrites_only_named_block() {
        let c = test(0).and(test(1).negate()).inline(1);
        let mut blocks = Vec::new();
        c.inline_blocks(&mut blocks);
        assert_eq!(blocks, vec![1]);
        assert!(c.only_tests(0));
        assert!(!c.only_tests(2));
    }

    #[test]
    fn test_jump_detection() {
        let body = ControlBlock::Sequence(vec![ControlBlock::Statements(1), ControlBlock::Break]);
        assert!(body.is_jump());
        assert!(!ControlBlock::Statements(1).is_jump());
        assert!(ControlBlock::Sequence(vec![ControlBlock::empty()]).is_empty());
    }

    #[test]
    fn test_edge_moves_are_not_empty() {
        let arm = ControlBlock::Sequence(vec![
            ControlBlock::Moves { from: 0, to: 1 },
            ControlBlock::empty(),
        ]);
        assert!(!arm.is_empty());
        assert!(!arm.is_jump());
        assert!(arm.placed_blocks().is_empty());
    }
}
