//! Control Flow Graph implementation.
//!
//! This module provides the [`ControlFlowGraph`] structure that wraps decoded basic blocks
//! with graph semantics: reverse postorder block numbering, typed edges, the dominator tree,
//! back edges and natural loops.

use std::{collections::BTreeSet, fmt, sync::OnceLock};

use crate::{
    analysis::cfg::CfgEdgeKind,
    disassembler::{decode_blocks, BasicBlock, DecodedFunction, FlowType, Instruction, Opcode},
    utils::graph::{
        algorithms::{self, DominatorTree},
        DirectedGraph, GraphBase, NodeId, Predecessors, RootedGraph, Successors,
    },
    Result,
};

/// Frame offset of the first argument (`FRM + 12`).
pub const FIRST_ARG_OFFSET: i32 = 12;

/// Upper bound on the arity derived from frame accesses. The call operand counts argument
/// bytes in one cell, but no real function comes close to this.
pub const MAX_ARGUMENTS: usize = 256;

/// Information about a natural loop in the control flow graph.
///
/// A natural loop has a single entry (the header); its back edges go from blocks inside the
/// loop to the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    /// The header block of the loop (single entry point).
    pub header: NodeId,
    /// All blocks of the loop, header included.
    pub body: BTreeSet<NodeId>,
    /// Sources of the back edges (latches).
    pub back_edges: Vec<NodeId>,
    /// Nesting depth; 0 for outermost loops.
    pub depth: usize,
}

impl NaturalLoop {
    fn new(header: NodeId) -> Self {
        let mut body = BTreeSet::new();
        body.insert(header);
        NaturalLoop {
            header,
            body,
            back_edges: Vec::new(),
            depth: 0,
        }
    }

    /// Returns `true` if `node` belongs to the loop.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.body.contains(&node)
    }

    /// Number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// The control flow graph of one function.
///
/// Blocks are numbered in reverse postorder: the entry is block 0 and every edge that is not
/// a retreating edge goes from a lower to a higher id. The dominator tree and the loop
/// forest are computed lazily and cached in [`OnceLock`]s.
///
/// # Examples
///
/// ```rust
/// use smxscope::{analysis::ControlFlowGraph, assembly::Assembler, disassembler::Opcode};
///
/// let mut asm = Assembler::new();
/// asm.emit(Opcode::Proc, &[])?;
/// asm.define_label("top")?;
/// asm.emit(Opcode::LoadSPri, &[12])?;
/// asm.emit_branch(Opcode::Jnz, "top")?;
/// asm.emit(Opcode::Retn, &[])?;
/// let code = asm.finalize()?;
///
/// let cfg = ControlFlowGraph::build(&code, 0)?;
/// assert_eq!(cfg.loops().len(), 1);
/// assert_eq!(cfg.argument_count()?, 1);
/// # Ok::<(), smxscope::Error>(())
/// ```
pub struct ControlFlowGraph {
    graph: DirectedGraph<BasicBlock, CfgEdgeKind>,
    entry: NodeId,
    exits: Vec<NodeId>,
    exit_pc: u32,
    dominators: OnceLock<DominatorTree>,
    loops: OnceLock<Vec<NaturalLoop>>,
}

impl ControlFlowGraph {
    /// Decodes the function at `entry` and builds its graph.
    ///
    /// # Errors
    /// Propagates decode failures from [`decode_blocks`].
    pub fn build(code: &[u8], entry: u32) -> Result<Self> {
        Self::from_decoded(decode_blocks(code, entry)?)
    }

    /// Builds the graph from decoded blocks, renumbering them in reverse postorder.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structural`] if the block list is empty or inconsistent.
    pub fn from_decoded(decoded: DecodedFunction) -> Result<Self> {
        let DecodedFunction { blocks, exit_pc } = decoded;
        if blocks.is_empty() {
            return Err(structural_error!("Cannot create CFG from empty block list"));
        }

        // Provisional graph in address order, to compute the reverse postorder.
        let mut provisional: DirectedGraph<(), ()> =
            DirectedGraph::with_capacity(blocks.len(), blocks.len() * 2);
        for _ in &blocks {
            provisional.add_node(());
        }
        for block in &blocks {
            for &succ in &block.successors {
                provisional.add_edge(NodeId::new(block.id), NodeId::new(succ), ())?;
            }
        }
        let order = algorithms::reverse_postorder(&provisional, NodeId::new(0));

        let mut renumber = vec![usize::MAX; blocks.len()];
        for (new_id, old) in order.iter().enumerate() {
            renumber[old.index()] = new_id;
        }

        let mut slots: Vec<Option<BasicBlock>> = blocks.into_iter().map(Some).collect();
        let mut ordered: Vec<BasicBlock> = Vec::with_capacity(order.len());
        for old in &order {
            let Some(mut block) = slots[old.index()].take() else {
                return Err(structural_error!("Block {} visited twice", old.index()));
            };
            block.id = renumber[old.index()];
            block.successors = block
                .successors
                .iter()
                .map(|&s| renumber[s])
                .filter(|&s| s != usize::MAX)
                .collect();
            block.predecessors = block
                .predecessors
                .iter()
                .map(|&p| renumber[p])
                .filter(|&p| p != usize::MAX)
                .collect();
            block.predecessors.sort_unstable();
            ordered.push(block);
        }

        let mut graph: DirectedGraph<BasicBlock, CfgEdgeKind> =
            DirectedGraph::with_capacity(ordered.len(), ordered.len() * 2);
        let edges: Vec<(usize, Vec<(usize, CfgEdgeKind)>)> = ordered
            .iter()
            .map(|block| {
                let kinds = block
                    .successors
                    .iter()
                    .enumerate()
                    .map(|(position, &succ)| {
                        (succ, Self::classify_edge(block, position, &ordered[succ]))
                    })
                    .collect();
                (block.id, kinds)
            })
            .collect();

        let mut exits = Vec::new();
        for block in ordered {
            if block.successors.is_empty() {
                exits.push(NodeId::new(block.id));
            }
            graph.add_node(block);
        }
        for (from, targets) in edges {
            for (to, kind) in targets {
                graph.add_edge(NodeId::new(from), NodeId::new(to), kind)?;
            }
        }

        Ok(ControlFlowGraph {
            graph,
            entry: NodeId::new(0),
            exits,
            exit_pc,
            dominators: OnceLock::new(),
            loops: OnceLock::new(),
        })
    }

    fn classify_edge(block: &BasicBlock, position: usize, target: &BasicBlock) -> CfgEdgeKind {
        let Some(last) = block.terminator() else {
            return CfgEdgeKind::Fallthrough;
        };

        match last.flow_type {
            FlowType::ConditionalBranch if block.successors.len() == 2 => {
                if position == 0 {
                    CfgEdgeKind::ConditionalTrue
                } else {
                    CfgEdgeKind::ConditionalFalse
                }
            }
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch => {
                CfgEdgeKind::Unconditional
            }
            FlowType::Switch => {
                let table = last.case_table.as_ref();
                match table {
                    Some(table) if position == 0 && table.default == target.address => {
                        CfgEdgeKind::SwitchDefault
                    }
                    Some(table) => table
                        .cases
                        .iter()
                        .find(|(_, addr)| *addr == target.address)
                        .map_or(CfgEdgeKind::SwitchDefault, |(value, _)| {
                            CfgEdgeKind::SwitchCase(*value)
                        }),
                    None => CfgEdgeKind::SwitchDefault,
                }
            }
            FlowType::Sequential | FlowType::Call | FlowType::Return | FlowType::Halt => {
                CfgEdgeKind::Fallthrough
            }
        }
    }

    /// The entry block.
    #[must_use]
    pub const fn entry(&self) -> NodeId {
        self.entry
    }

    /// Blocks without successors.
    #[must_use]
    pub fn exits(&self) -> &[NodeId] {
        &self.exits
    }

    /// Address just past the last decoded instruction or case table.
    #[must_use]
    pub fn exit_pc(&self) -> u32 {
        self.exit_pc
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    /// The block with the given id.
    #[must_use]
    pub fn block(&self, node_id: NodeId) -> Option<&BasicBlock> {
        self.graph.node(node_id)
    }

    /// All blocks in id (reverse postorder) order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.graph.nodes().map(|(_, block)| block)
    }

    /// Successors of a block with their edge kinds.
    pub fn outgoing_edges(
        &self,
        node_id: NodeId,
    ) -> impl Iterator<Item = (NodeId, CfgEdgeKind)> + '_ {
        self.graph
            .outgoing_edges(node_id)
            .map(|(target, kind)| (target, *kind))
    }

    /// The dominator tree, computed on first use.
    pub fn dominators(&self) -> &DominatorTree {
        self.dominators
            .get_or_init(|| algorithms::compute_dominators(&self.graph, self.entry))
    }

    /// Returns `true` if `dominator` dominates `dominated`.
    #[must_use]
    pub fn dominates(&self, dominator: NodeId, dominated: NodeId) -> bool {
        self.dominators().dominates(dominator, dominated)
    }

    /// Returns `true` if `from -> to` is a back edge (`to` dominates `from`).
    #[must_use]
    pub fn is_back_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.graph.successors(from).any(|s| s == to) && self.dominates(to, from)
    }

    /// The natural loops, sorted by header.
    pub fn loops(&self) -> &[NaturalLoop] {
        self.loops.get_or_init(|| self.detect_loops())
    }

    /// The innermost loop whose header is `header`.
    #[must_use]
    pub fn loop_with_header(&self, header: NodeId) -> Option<&NaturalLoop> {
        self.loops().iter().find(|l| l.header == header)
    }

    /// The innermost loop containing `node`.
    #[must_use]
    pub fn innermost_loop(&self, node: NodeId) -> Option<&NaturalLoop> {
        self.loops()
            .iter()
            .filter(|l| l.contains(node))
            .max_by_key(|l| l.depth)
    }

    fn detect_loops(&self) -> Vec<NaturalLoop> {
        let dominators = self.dominators();
        let mut loops: Vec<NaturalLoop> = Vec::new();

        for node in self.graph.node_ids() {
            for succ in self.graph.successors(node) {
                if !dominators.dominates(succ, node) {
                    continue;
                }

                let header = succ;
                let index = match loops.iter().position(|l| l.header == header) {
                    Some(index) => index,
                    None => {
                        loops.push(NaturalLoop::new(header));
                        loops.len() - 1
                    }
                };
                loops[index].back_edges.push(node);
                self.expand_loop_body(&mut loops[index], node);
            }
        }

        for i in 0..loops.len() {
            let header = loops[i].header;
            loops[i].depth = loops
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && other.contains(header))
                .count();
        }
        loops.sort_by_key(|l| l.header);
        loops
    }

    fn expand_loop_body(&self, natural_loop: &mut NaturalLoop, back_edge_source: NodeId) {
        let mut worklist = vec![back_edge_source];
        while let Some(node) = worklist.pop() {
            if natural_loop.body.insert(node) {
                for pred in self.graph.predecessors(node) {
                    if !natural_loop.body.contains(&pred) {
                        worklist.push(pred);
                    }
                }
            }
        }
    }

    /// Number of argument slots the code actually references.
    ///
    /// Arguments live at `FRM + 12 + 4 * i`; the arity is one more than the highest argument
    /// index accessed by any frame-relative instruction.
    ///
    /// # Errors
    /// [`crate::Error::Malformed`] when an offset implies more than [`MAX_ARGUMENTS`]
    /// arguments.
    pub fn argument_count(&self) -> Result<usize> {
        let highest = self
            .blocks()
            .flat_map(|block| block.instructions.iter())
            .flat_map(frame_offsets)
            .filter(|&offset| offset >= FIRST_ARG_OFFSET)
            .max();
        let Some(offset) = highest else {
            return Ok(0);
        };

        let arity = ((offset - FIRST_ARG_OFFSET) / 4) as usize + 1;
        if arity > MAX_ARGUMENTS {
            return Err(malformed_error!(
                "Frame offset {:#x} implies {} arguments",
                offset,
                arity
            ));
        }
        Ok(arity)
    }
}

/// Frame offsets referenced by an instruction.
fn frame_offsets(instruction: &Instruction) -> Vec<i32> {
    use Opcode::*;
    match instruction.opcode {
        LoadSPri | LoadSAlt | LrefSPri | LrefSAlt | AddrPri | AddrAlt | StorSPri | StorSAlt
        | SrefSPri | SrefSAlt | PushS | PushAdr | ZeroS | IncS | DecS | ConstS => {
            vec![instruction.operand(0)]
        }
        Push2S | Push3S | Push4S | Push5S | Push2Adr | Push3Adr | Push4Adr | Push5Adr
        | LoadSBoth => instruction.operands.clone(),
        _ => Vec::new(),
    }
}

impl fmt::Debug for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlFlowGraph")
            .field("entry", &self.entry)
            .field("blocks", &self.block_count())
            .field("exits", &self.exits)
            .field("exit_pc", &self.exit_pc)
            .finish_non_exhaustive()
    }
}

impl GraphBase for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.graph.node_count()).map(NodeId::new)
    }
}

impl Successors for ControlFlowGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.successors(node)
    }
}

impl Predecessors for ControlFlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.predecessors(node)
    }
}

impl RootedGraph for ControlFlowGraph {
    fn entry(&self) -> NodeId {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::Assembler, Error};

    fn while_loop() -> Vec<u8> {
        // while (arg0 > 0) arg0--;
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
        asm.finalize().unwrap()
    }

    #[test]
    fn test_rpo_numbering() {
        let cfg = ControlFlowGraph::build(&while_loop(), 0).unwrap();
        assert_eq!(cfg.block_count(), 4);
        assert_eq!(cfg.entry(), NodeId::new(0));

        for block in cfg.blocks() {
            for succ in &block.successors {
                let back = cfg.is_back_edge(NodeId::new(block.id), NodeId::new(*succ));
                assert!(back || *succ > block.id, "forward edges go up in RPO");
            }
        }
        assert_eq!(cfg.exits().len(), 1);
        assert_eq!(cfg.exit_pc() as usize, while_loop().len());
    }

    #[test]
    fn test_loop_detection() {
        let cfg = ControlFlowGraph::build(&while_loop(), 0).unwrap();
        let loops = cfg.loops();
        assert_eq!(loops.len(), 1);

        let header = loops[0].header;
        assert_eq!(cfg.block(header).unwrap().address, 4);
        assert_eq!(loops[0].size(), 2);
        assert_eq!(loops[0].back_edges.len(), 1);
        assert!(cfg.innermost_loop(loops[0].back_edges[0]).is_some());
    }

    #[test]
    fn test_edge_kinds() {
        let cfg = ControlFlowGraph::build(&while_loop(), 0).unwrap();
        let header = cfg.loops()[0].header;
        let kinds: Vec<_> = cfg.outgoing_edges(header).map(|(_, k)| k).collect();
        assert_eq!(
            kinds,
            vec![CfgEdgeKind::ConditionalTrue, CfgEdgeKind::ConditionalFalse]
        );
    }

    #[test]
    fn test_argument_count() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[20]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[-4]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let cfg = ControlFlowGraph::build(&asm.finalize().unwrap(), 0).unwrap();
        assert_eq!(cfg.argument_count().unwrap(), 3);
    }

    #[test]
    fn test_argument_count_rejects_absurd_offset() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[0x7fff_fff0]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let cfg = ControlFlowGraph::build(&asm.finalize().unwrap(), 0).unwrap();
        assert!(matches!(cfg.argument_count(), Err(Error::Malformed { .. })));

        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[FIRST_ARG_OFFSET + 4 * (MAX_ARGUMENTS as i32 - 1)])
            .unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let cfg = ControlFlowGraph::build(&asm.finalize().unwrap(), 0).unwrap();
        assert_eq!(cfg.argument_count().unwrap(), MAX_ARGUMENTS);
    }
}
