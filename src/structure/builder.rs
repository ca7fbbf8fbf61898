//! Recovery of high level control constructs.

use std::collections::BTreeSet;

use log::debug;

use crate::{
    analysis::{CfgEdgeKind, NodeGraph, NodeKind, UnaryOp},
    compiler::Stage,
    structure::{
        block::{Condition, ControlBlock, SwitchCase},
        edge_moves, is_condition_block,
        simplify::Simplifier,
    },
    utils::graph::{
        algorithms::{compute_dominators, DominatorTree},
        DirectedGraph, NodeId,
    },
    Error, Result,
};

/// Maximum nesting of structured regions.
const MAX_DEPTH: usize = 256;

/// A loop being structured.
struct LoopScope {
    header: usize,
    follow: Option<usize>,
}

/// Where an edge leads in the structured tree.
enum Edge {
    /// Continue placing at the target
    Next(usize),
    /// Leave the current sequence through a jump statement
    Leave(ControlBlock),
}

/// Builds the [`ControlBlock`] tree of a function.
///
/// The graph must have completed [`Stage::DeclarationsCoalesced`]; [`StructureBuilder::run`]
/// advances it to [`Stage::Structured`].
///
/// # Examples
///
/// ```rust
/// use smxscope::{
///     analysis::NodeBuilder,
///     assembly::Assembler,
///     compiler::{PassContext, PassScheduler},
///     disassembler::Opcode,
///     structure::{ControlBlock, StructureBuilder},
///     Program,
/// };
///
/// // while (arg0 > 0) arg0--;
/// let mut asm = Assembler::new();
/// asm.emit(Opcode::Proc, &[])?;
/// asm.define_label("head")?;
/// asm.emit(Opcode::LoadSPri, &[12])?;
/// asm.emit(Opcode::ConstAlt, &[0])?;
/// asm.emit_branch(Opcode::Jsleq, "exit")?;
/// asm.emit(Opcode::DecS, &[12])?;
/// asm.emit_branch(Opcode::Jump, "head")?;
/// asm.define_label("exit")?;
/// asm.emit(Opcode::ZeroPri, &[])?;
/// asm.emit(Opcode::Retn, &[])?;
/// let program = Program::builder().code(asm.finalize()?).function("f", 0).build();
/// let function = &program.functions()[0];
///
/// let mut graph = NodeBuilder::new(&program, function).build()?;
/// PassScheduler::default().run(&mut graph, &PassContext::new(&program, function))?;
/// let tree = StructureBuilder::run(&mut graph)?;
///
/// let mut placed = tree.placed_blocks();
/// placed.sort_unstable();
/// assert_eq!(placed, (0..graph.block_count()).collect::<Vec<_>>());
/// # Ok::<(), smxscope::Error>(())
/// ```
pub struct StructureBuilder<'g> {
    graph: &'g NodeGraph,
    postdominators: DominatorTree,
    virtual_exit: NodeId,
    placed: Vec<bool>,
    loops: Vec<LoopScope>,
    labels: BTreeSet<usize>,
    depth: usize,
}

impl<'g> StructureBuilder<'g> {
    /// Advances `graph` to [`Stage::Structured`] and structures it.
    ///
    /// # Errors
    /// [`Error::PassOrder`] if the graph has not completed the rewrite pipeline, plus the
    /// errors of [`StructureBuilder::build`].
    pub fn run(graph: &mut NodeGraph) -> Result<ControlBlock> {
        graph.advance(Stage::Structured)?;
        StructureBuilder::new(graph)?.build()
    }

    /// Prepares structuring of `graph`, computing post-dominators.
    ///
    /// # Errors
    /// [`Error::Structural`] if the post-dominator graph cannot be constructed.
    pub fn new(graph: &'g NodeGraph) -> Result<Self> {
        let (postdominators, virtual_exit) = Self::postdominators(graph)?;
        Ok(StructureBuilder {
            graph,
            postdominators,
            virtual_exit,
            placed: vec![false; graph.block_count()],
            loops: Vec::new(),
            labels: BTreeSet::new(),
            depth: 0,
        })
    }

    /// Post-dominators over the forward edges, rooted at a virtual exit that every block
    /// without forward successors flows into.
    fn postdominators(graph: &NodeGraph) -> Result<(DominatorTree, NodeId)> {
        let cfg = graph.cfg();
        let count = graph.block_count();
        let mut reversed: DirectedGraph<(), ()> = DirectedGraph::with_capacity(count + 1, count * 2);
        for _ in 0..=count {
            reversed.add_node(());
        }
        let exit = NodeId::new(count);
        for block in 0..count {
            let forward: Vec<usize> = graph
                .successors(block)
                .into_iter()
                .filter(|&s| !cfg.is_back_edge(NodeId::new(block), NodeId::new(s)))
                .collect();
            if forward.is_empty() {
                reversed.add_edge(exit, NodeId::new(block), ())?;
            }
            for succ in forward {
                reversed.add_edge(NodeId::new(succ), NodeId::new(block), ())?;
            }
        }
        Ok((compute_dominators(&reversed, exit), exit))
    }

    /// Structures the whole function.
    ///
    /// # Errors
    /// - [`Error::Structural`] if the entry block has predecessors or a block lacks the
    ///   edges its control node requires
    /// - [`Error::RecursionLimit`] if regions nest too deeply
    pub fn build(mut self) -> Result<ControlBlock> {
        if !self.graph.predecessors(0).is_empty() {
            return Err(structural_error!("Entry block has predecessors"));
        }

        let mut items = vec![self.sequence(0, None)?];
        for block in 0..self.graph.block_count() {
            if !self.placed[block] {
                self.labels.insert(block);
                let body = self.sequence(block, None)?;
                items.push(ControlBlock::Labeled {
                    label: block,
                    body: Box::new(body),
                });
            }
        }

        let simplifier = Simplifier::new(self.graph, &self.labels);
        let tree = simplifier.simplify(ControlBlock::Sequence(items));
        let tree = simplifier.attach_labels(tree);

        let mut placed = tree.placed_blocks();
        placed.sort_unstable();
        if placed.len() != self.graph.block_count() || placed.windows(2).any(|w| w[0] == w[1]) {
            return Err(structural_error!(
                "Structuring placed {} blocks for {} basic blocks",
                placed.len(),
                self.graph.block_count()
            ));
        }

        debug!(
            "structured {} blocks with {} labels",
            self.graph.block_count(),
            self.labels.len()
        );
        Ok(tree)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::RecursionLimit(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Places blocks starting at `start` until `stop` or a jump out of the region.
    fn sequence(&mut self, start: usize, stop: Option<usize>) -> Result<ControlBlock> {
        self.enter()?;
        let mut items = Vec::new();
        let mut current = Some(start);

        while let Some(block) = current.take() {
            if Some(block) == stop {
                break;
            }
            if self.placed[block] {
                items.push(self.goto(block));
                break;
            }
            if self.opens_loop(block) {
                let (looped, follow) = self.structure_loop(block)?;
                items.push(looped);
                if let Some(follow) = follow {
                    current = self.continue_to(None, follow, stop, &mut items);
                }
                continue;
            }

            self.placed[block] = true;
            items.push(ControlBlock::Statements(block));
            current = self.terminate(block, stop, &mut items)?;
        }

        self.leave();
        Ok(ControlBlock::Sequence(items))
    }

    fn goto(&mut self, target: usize) -> ControlBlock {
        self.labels.insert(target);
        ControlBlock::Goto(target)
    }

    fn opens_loop(&self, block: usize) -> bool {
        self.graph
            .cfg()
            .loop_with_header(NodeId::new(block))
            .is_some()
            && !self.loops.iter().any(|scope| scope.header == block)
    }

    /// Classifies a transfer of control to `target`.
    fn edge(&mut self, target: usize, stop: Option<usize>) -> Edge {
        if Some(target) == stop {
            return Edge::Next(target);
        }
        if let Some(scope) = self.loops.last() {
            if scope.header == target {
                return Edge::Leave(ControlBlock::Continue);
            }
            if scope.follow == Some(target) {
                return Edge::Leave(ControlBlock::Break);
            }
        }
        let outer = self
            .loops
            .iter()
            .any(|scope| scope.header == target || scope.follow == Some(target));
        if outer || self.placed[target] {
            return Edge::Leave(self.goto(target));
        }
        Edge::Next(target)
    }

    /// The phi assignments of the edge from `from` to `to`, if it has any.
    fn moves(&self, from: usize, to: usize) -> Option<ControlBlock> {
        (!edge_moves(self.graph, from, to).is_empty()).then_some(ControlBlock::Moves { from, to })
    }

    /// Continues at `target`, through the edge from `from` if control arrives by one.
    fn continue_to(
        &mut self,
        from: Option<usize>,
        target: usize,
        stop: Option<usize>,
        items: &mut Vec<ControlBlock>,
    ) -> Option<usize> {
        if let Some(moves) = from.and_then(|from| self.moves(from, target)) {
            items.push(moves);
        }
        match self.edge(target, stop) {
            Edge::Next(next) => Some(next),
            Edge::Leave(jump) => {
                items.push(jump);
                None
            }
        }
    }

    /// The body of the arm taking the edge from `from` to `target`.
    fn arm(&mut self, from: usize, target: usize, stop: Option<usize>) -> Result<ControlBlock> {
        let moves = self.moves(from, target);
        let body = match self.edge(target, stop) {
            Edge::Next(next) if Some(next) == stop => ControlBlock::empty(),
            Edge::Next(next) => self.sequence(next, stop)?,
            Edge::Leave(jump) => jump,
        };
        Ok(match moves {
            Some(moves) => ControlBlock::Sequence(vec![moves, body]),
            None => body,
        })
    }

    fn immediate_postdominator(&self, block: usize) -> Option<usize> {
        self.postdominators
            .immediate_dominator(NodeId::new(block))
            .filter(|&d| d != self.virtual_exit)
            .map(NodeId::index)
    }

    /// Handles the control node ending `block`; returns the block to continue with.
    fn terminate(
        &mut self,
        block: usize,
        stop: Option<usize>,
        items: &mut Vec<ControlBlock>,
    ) -> Result<Option<usize>> {
        let Some(control) = self.graph.control(block) else {
            return Err(structural_error!("Block {} has no control node", block));
        };
        match self.graph[control].kind {
            NodeKind::Return => {
                items.push(ControlBlock::Return(self.graph[control].operand(0)));
                Ok(None)
            }
            NodeKind::Halt => Ok(None),
            NodeKind::Jump => {
                let Some(&target) = self.graph.successors(block).first() else {
                    return Err(structural_error!("Jump in block {} has no target", block));
                };
                Ok(self.continue_to(Some(block), target, stop, items))
            }
            NodeKind::JumpCondition { .. } => self.structure_if(block, stop, items),
            NodeKind::Switch => self.structure_switch(block, stop, items),
            ref kind => Err(structural_error!(
                "Block {} ends in non-control node {:?}",
                block,
                kind
            )),
        }
    }

    /// The condition of `block` with its taken and not-taken targets.
    fn raw_branch(&self, block: usize, inline: bool) -> Option<(Condition, usize, usize)> {
        let control = self.graph.control(block)?;
        let NodeKind::JumpCondition { on_zero } = self.graph[control].kind else {
            return None;
        };
        let value = self.graph[control].operand(0)?;
        // A logical not left by branch normalization becomes part of the condition, so
        // chains of negated tests can be inverted as a whole.
        let (value, inverted) = match self.graph.get(value) {
            Some(node)
                if node.kind == NodeKind::Unary(UnaryOp::Not) && node.name.is_none() =>
            {
                (node.operand(0)?, true)
            }
            _ => (value, false),
        };

        let mut taken = None;
        let mut other = None;
        for (target, kind) in self.graph.cfg().outgoing_edges(NodeId::new(block)) {
            match kind {
                CfgEdgeKind::ConditionalTrue => taken = Some(target.index()),
                CfgEdgeKind::ConditionalFalse => other = Some(target.index()),
                _ => {}
            }
        }

        let leaf = if inline {
            Condition::Inline { block, value }
        } else {
            Condition::Test { block, value }
        };
        let leaf = if inverted { leaf.negate() } else { leaf };
        let condition = if on_zero { leaf.negate() } else { leaf };
        Some((condition, taken?, other?))
    }

    fn can_fold(&self, block: usize, stop: Option<usize>) -> bool {
        !self.placed[block]
            && Some(block) != stop
            && self.graph.predecessors(block).len() == 1
            && self.graph.cfg().loop_with_header(NodeId::new(block)).is_none()
            && !self
                .loops
                .iter()
                .any(|scope| scope.follow == Some(block))
            && is_condition_block(self.graph, block)
    }

    /// The condition of `block`, absorbing successor blocks that only test into `&&` and
    /// `||` chains.
    fn branch(&mut self, block: usize, stop: Option<usize>) -> Option<(Condition, usize, usize)> {
        let (mut condition, mut taken, mut other) = self.raw_branch(block, false)?;
        loop {
            if self.can_fold(taken, stop) {
                if let Some((inner, t, f)) = self.raw_branch(taken, true) {
                    if f == other {
                        self.placed[taken] = true;
                        condition = condition.and(inner);
                        taken = t;
                        continue;
                    }
                    if t == other {
                        self.placed[taken] = true;
                        condition = condition.and(inner.negate());
                        taken = f;
                        continue;
                    }
                }
            }
            if self.can_fold(other, stop) {
                if let Some((inner, t, f)) = self.raw_branch(other, true) {
                    if t == taken {
                        self.placed[other] = true;
                        condition = condition.or(inner);
                        other = f;
                        continue;
                    }
                    if f == taken {
                        self.placed[other] = true;
                        condition = condition.or(inner.negate());
                        other = t;
                        continue;
                    }
                }
            }
            break;
        }
        Some((condition, taken, other))
    }

    fn structure_if(
        &mut self,
        block: usize,
        stop: Option<usize>,
        items: &mut Vec<ControlBlock>,
    ) -> Result<Option<usize>> {
        let (condition, taken, other) = self
            .branch(block, stop)
            .ok_or_else(|| structural_error!("Block {} lacks conditional edges", block))?;
        let join = self.immediate_postdominator(block);
        let arm_stop = join.or(stop);

        let then = self.arm(block, taken, arm_stop)?;
        let otherwise = self.arm(block, other, arm_stop)?;
        items.push(ControlBlock::If {
            condition,
            then: Box::new(then),
            otherwise: (!otherwise.is_empty()).then(|| Box::new(otherwise)),
        });

        Ok(join.and_then(|join| self.continue_to(None, join, stop, items)))
    }

    fn structure_switch(
        &mut self,
        block: usize,
        stop: Option<usize>,
        items: &mut Vec<ControlBlock>,
    ) -> Result<Option<usize>> {
        let cfg = self.graph.cfg();
        let value = self
            .graph
            .control(block)
            .and_then(|control| self.graph[control].operand(0))
            .ok_or_else(|| structural_error!("Switch in block {} has no value", block))?;
        let table = cfg
            .block(NodeId::new(block))
            .and_then(|b| b.terminator())
            .and_then(|instruction| instruction.case_table.clone());

        let mut default_target = None;
        let mut case_targets = Vec::new();
        for (target, kind) in cfg.outgoing_edges(NodeId::new(block)) {
            match kind {
                CfgEdgeKind::SwitchDefault => default_target = Some(target.index()),
                CfgEdgeKind::SwitchCase(first) => case_targets.push((target.index(), first)),
                _ => {}
            }
        }

        let join = self.immediate_postdominator(block);
        let arm_stop = join.or(stop);

        let mut cases = Vec::with_capacity(case_targets.len());
        for (target, first) in case_targets {
            let address = cfg.block(NodeId::new(target)).map(|b| b.address);
            let values = match &table {
                Some(table) => table
                    .cases
                    .iter()
                    .filter(|&&(_, case_address)| Some(case_address) == address)
                    .map(|&(value, _)| value)
                    .collect(),
                None => vec![first],
            };
            let body = self.arm(block, target, arm_stop)?;
            cases.push(SwitchCase { values, body });
        }
        let default = match default_target {
            Some(target) => {
                let body = self.arm(block, target, arm_stop)?;
                (!body.is_empty()).then(|| Box::new(body))
            }
            None => None,
        };

        items.push(ControlBlock::Switch {
            value,
            cases,
            default,
        });
        Ok(join.and_then(|join| self.continue_to(None, join, stop, items)))
    }

    /// The block a loop exits to: the exit tested by the header, else by a latch, else
    /// the first exit in block order.
    fn loop_follow(&self, header: usize) -> Option<usize> {
        let natural = self.graph.cfg().loop_with_header(NodeId::new(header))?;
        let inside = |block: usize| natural.contains(NodeId::new(block));
        let exit_of = |block: usize| {
            let (_, taken, other) = self.raw_branch(block, false)?;
            match (inside(taken), inside(other)) {
                (true, false) => Some(other),
                (false, true) => Some(taken),
                _ => None,
            }
        };

        exit_of(header)
            .or_else(|| natural.back_edges.iter().find_map(|l| exit_of(l.index())))
            .or_else(|| {
                natural
                    .body
                    .iter()
                    .flat_map(|b| self.graph.successors(b.index()))
                    .filter(|&s| !inside(s))
                    .min()
            })
    }

    fn structure_loop(&mut self, header: usize) -> Result<(ControlBlock, Option<usize>)> {
        let follow = self.loop_follow(header);
        self.loops.push(LoopScope { header, follow });
        let body = self.sequence(header, None);
        self.loops.pop();

        Ok((
            ControlBlock::While {
                condition: None,
                body: Box::new(body?),
            },
            follow,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Assembler, disassembler::Opcode, program::Program, test::graph_at,
    };

    fn structure(asm: Assembler) -> (NodeGraph, ControlBlock) {
        let program = Program::builder()
            .code(asm.finalize().unwrap())
            .function("f", 0)
            .build();
        let mut graph = graph_at(&program, 0, Stage::DeclarationsCoalesced).unwrap();
        let tree = StructureBuilder::run(&mut graph).unwrap();
        (graph, tree)
    }

    fn assert_placed_once(graph: &NodeGraph, tree: &ControlBlock) {
        let mut placed = tree.placed_blocks();
        placed.sort_unstable();
        assert_eq!(placed, (0..graph.block_count()).collect::<Vec<_>>());
    }

    fn items(tree: &ControlBlock) -> &[ControlBlock] {
        match tree {
            ControlBlock::Sequence(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    #[test]
    fn test_if_else() {
        // if (arg0) arg1 = 1; else arg1 = 2; return 0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit_branch(Opcode::Jzer, "else").unwrap();
        asm.emit(Opcode::ConstS, &[16, 1]).unwrap();
        asm.emit_branch(Opcode::Jump, "join").unwrap();
        asm.define_label("else").unwrap();
        asm.emit(Opcode::ConstS, &[16, 2]).unwrap();
        asm.define_label("join").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let (graph, tree) = structure(asm);
        assert_placed_once(&graph, &tree);
        let items = items(&tree);
        assert!(items.iter().any(|b| matches!(
            b,
            ControlBlock::If {
                otherwise: Some(_),
                ..
            }
        )));
        assert!(matches!(items.last(), Some(ControlBlock::Return(Some(_)))));
    }

    #[test]
    fn test_while_loop_gets_condition() {
        // while (arg0 > 0) arg0--; return 0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.define_label("head").unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::ConstAlt, &[0]).unwrap();
        asm.emit_branch(Opcode::Jsleq, "exit").unwrap();
        asm.emit(Opcode::DecS, &[12]).unwrap();
        asm.emit_branch(Opcode::Jump, "head").unwrap();
        asm.define_label("exit").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let (graph, tree) = structure(asm);
        assert_placed_once(&graph, &tree);
        let looped = items(&tree)
            .iter()
            .find(|b| matches!(b, ControlBlock::While { .. }))
            .unwrap();
        let ControlBlock::While { condition, body } = looped else {
            unreachable!()
        };
        assert!(condition.is_some());
        assert!(!body.is_jump());
    }

    #[test]
    fn test_short_circuit_and() {
        // if (arg0 && arg1) arg2 = 1; return 0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit_branch(Opcode::Jzer, "join").unwrap();
        asm.emit(Opcode::LoadSPri, &[16]).unwrap();
        asm.emit_branch(Opcode::Jzer, "join").unwrap();
        asm.emit(Opcode::ConstS, &[20, 1]).unwrap();
        asm.define_label("join").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let (graph, tree) = structure(asm);
        assert_placed_once(&graph, &tree);
        let condition = items(&tree)
            .iter()
            .find_map(|b| match b {
                ControlBlock::If { condition, .. } => Some(condition.clone()),
                _ => None,
            })
            .unwrap();
        assert!(matches!(condition, Condition::And(_, _)));
    }

    #[test]
    fn test_phi_assignments_follow_their_edge() {
        // x = 0; do { old = x; x = old + 1; } while (old != 10); return x  (x in ALT)
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::ZeroAlt, &[]).unwrap();
        asm.define_label("head").unwrap();
        asm.emit(Opcode::MovePri, &[]).unwrap();
        asm.emit(Opcode::AddC, &[1]).unwrap();
        asm.emit(Opcode::Xchg, &[]).unwrap();
        asm.emit(Opcode::EqCPri, &[10]).unwrap();
        asm.emit_branch(Opcode::Jzer, "head").unwrap();
        asm.emit(Opcode::MovePri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let (graph, tree) = structure(asm);
        assert_placed_once(&graph, &tree);
        let header = graph.cfg().loops()[0].header.index();
        assert!(items(&tree).contains(&ControlBlock::Moves {
            from: 0,
            to: header
        }));

        let body = items(&tree)
            .iter()
            .find_map(|b| match b {
                ControlBlock::While { body, .. } => Some(body),
                _ => None,
            })
            .unwrap();
        let arm = items(body)
            .iter()
            .find_map(|b| match b {
                ControlBlock::If { then, .. } => Some(then),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            items(arm),
            &[
                ControlBlock::Moves {
                    from: header,
                    to: header
                },
                ControlBlock::Continue
            ]
        );
        assert!(!items(body).iter().any(|b| matches!(b, ControlBlock::Moves { .. })));
    }

    #[test]
    fn test_break_out_of_infinite_loop() {
        // for (;;) { if (arg0) break; arg0 = 1; } return 0
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.define_label("head").unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit_branch(Opcode::Jnz, "exit").unwrap();
        asm.emit(Opcode::ConstS, &[12, 1]).unwrap();
        asm.emit_branch(Opcode::Jump, "head").unwrap();
        asm.define_label("exit").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let (graph, tree) = structure(asm);
        assert_placed_once(&graph, &tree);
        assert!(items(&tree)
            .iter()
            .any(|b| matches!(b, ControlBlock::While { .. })));
    }

    #[test]
    fn test_switch_arms() {
        // switch (arg0) { case 1, 2: arg1 = 1; case 5: arg1 = 2; default: arg1 = 3; }
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit_branch(Opcode::Switch, "table").unwrap();
        asm.define_label("one").unwrap();
        asm.emit(Opcode::ConstS, &[16, 1]).unwrap();
        asm.emit_branch(Opcode::Jump, "end").unwrap();
        asm.define_label("five").unwrap();
        asm.emit(Opcode::ConstS, &[16, 2]).unwrap();
        asm.emit_branch(Opcode::Jump, "end").unwrap();
        asm.define_label("other").unwrap();
        asm.emit(Opcode::ConstS, &[16, 3]).unwrap();
        asm.emit_branch(Opcode::Jump, "end").unwrap();
        asm.define_label("table").unwrap();
        asm.emit_case_table("other", &[(1, "one"), (2, "one"), (5, "five")])
            .unwrap();
        asm.define_label("end").unwrap();
        asm.emit(Opcode::ZeroPri, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let (graph, tree) = structure(asm);
        assert_placed_once(&graph, &tree);
        let (cases, default) = items(&tree)
            .iter()
            .find_map(|b| match b {
                ControlBlock::Switch { cases, default, .. } => Some((cases.clone(), default.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].values, vec![1, 2]);
        assert_eq!(cases[1].values, vec![5]);
        assert!(default.is_some());
    }
}
