//! Translation of decoded blocks into the node graph.
//!
//! The builder abstractly interprets every block in reverse postorder. The machine state it
//! tracks is the pair of registers and the stack, where each stack entry is the
//! [`NodeKind::StackSlot`] node created by the push or allocation that produced it. A
//! frame-relative access resolves to the entry covering its offset, so locals, arrays and
//! pushed call arguments all become addressable variables.
//!
//! At a merge the incoming states are combined: registers with different values receive a
//! [`NodeKind::Phi`] with one operand per predecessor, and stack entries with different slots
//! are replaced by a fresh slot initialized from a phi. Predecessors that have not been
//! visited yet (back edges) contribute a self-referencing placeholder operand, patched once
//! the whole function has been built. Phis that end up merging a single value are folded.

use log::trace;

use crate::{
    analysis::{
        cfg::ControlFlowGraph,
        nodes::{BinaryOp, NodeGraph, NodeKind, NodeRef, UnaryOp},
    },
    disassembler::{Instruction, Opcode},
    program::{Function, Program},
    utils::graph::NodeId,
    Result,
};

/// Frame offset of the first argument.
const ARGUMENT_BASE: i32 = 12;

/// Largest stack frame, in cells, a function may build up.
const MAX_FRAME_CELLS: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StackEntry {
    slot: NodeRef,
    cells: u32,
}

#[derive(Debug, Clone, Default)]
struct FrameState {
    pri: Option<NodeRef>,
    alt: Option<NodeRef>,
    stack: Vec<StackEntry>,
}

impl FrameState {
    fn depth(&self) -> u32 {
        self.stack.iter().map(|e| e.cells).sum()
    }
}

#[derive(Debug, Clone, Copy)]
enum Register {
    Pri,
    Alt,
}

/// A phi operand waiting for a predecessor that had not been built yet.
#[derive(Debug)]
struct PendingOperand {
    phi: NodeRef,
    position: usize,
    pred: usize,
    register: Register,
}

/// Builds the [`NodeGraph`] of one function.
///
/// # Examples
///
/// ```rust
/// use smxscope::{analysis::NodeBuilder, assembly::Assembler, disassembler::Opcode, Program};
///
/// let mut asm = Assembler::new();
/// asm.emit(Opcode::Proc, &[])?;
/// asm.emit(Opcode::LoadSPri, &[12])?;
/// asm.emit(Opcode::AddC, &[1])?;
/// asm.emit(Opcode::Retn, &[])?;
/// let program = Program::builder().code(asm.finalize()?).function("inc", 0).build();
///
/// let graph = NodeBuilder::new(&program, &program.functions()[0]).build()?;
/// assert_eq!(graph.arguments().len(), 1);
/// assert_eq!(graph.arguments()[0].name, "_arg0");
/// # Ok::<(), smxscope::Error>(())
/// ```
pub struct NodeBuilder<'a> {
    program: &'a Program,
    function: &'a Function,
}

impl<'a> NodeBuilder<'a> {
    /// Creates a builder for `function`.
    #[must_use]
    pub fn new(program: &'a Program, function: &'a Function) -> Self {
        NodeBuilder { program, function }
    }

    /// Decodes the function and builds its node graph.
    ///
    /// Missing arguments are synthesized on a private copy of the argument list, so the
    /// graph is complete even without [`crate::Decompiler::preprocess`].
    ///
    /// # Errors
    /// Decode failures, and [`crate::Error::Structural`] for stack imbalances, undefined
    /// register reads and accesses outside the frame.
    pub fn build(&self) -> Result<NodeGraph> {
        let cfg = ControlFlowGraph::build(self.program.code(), self.function.address)?;
        self.build_from(cfg)
    }

    /// Builds the node graph over an already recovered control flow graph.
    ///
    /// # Errors
    /// See [`NodeBuilder::build`].
    pub fn build_from(&self, cfg: ControlFlowGraph) -> Result<NodeGraph> {
        let mut function = self.function.clone();
        function.synthesize_arguments(cfg.argument_count()?);

        let block_count = cfg.block_count();
        let mut symbols: Vec<i32> = function
            .locals
            .iter()
            .map(|local| local.offset)
            .filter(|&offset| offset < 0 && offset % 4 == 0)
            .collect();
        symbols.sort_unstable_by(|a, b| b.cmp(a));
        symbols.dedup();

        let mut state = BuildState {
            program: self.program,
            symbols,
            graph: NodeGraph::new(cfg, function.args.clone()),
            arguments: Vec::new(),
            entries: vec![None; block_count],
            exits: vec![None; block_count],
            pending: Vec::new(),
        };

        for index in 0..function.args.len() {
            let node = state.graph.append(0, NodeKind::Argument(index), vec![]);
            state.arguments.push(node);
        }

        for block in 0..block_count {
            state.build_block(block)?;
        }
        state.patch_pending()?;
        state.fold_trivial_phis()?;
        state.graph.verify()?;

        trace!(
            "built {} nodes in {} blocks for {}",
            state.graph.len(),
            block_count,
            function.name
        );
        Ok(state.graph)
    }
}

struct BuildState<'a> {
    program: &'a Program,
    /// Debug symbol offsets inside the frame, highest first
    symbols: Vec<i32>,
    graph: NodeGraph,
    arguments: Vec<NodeRef>,
    entries: Vec<Option<FrameState>>,
    exits: Vec<Option<FrameState>>,
    pending: Vec<PendingOperand>,
}

impl BuildState<'_> {
    fn build_block(&mut self, block: usize) -> Result<()> {
        let mut frame = self.entry_state(block)?;
        self.entries[block] = Some(frame.clone());

        let instructions = self
            .graph
            .cfg()
            .block(NodeId::new(block))
            .map(|b| b.instructions.clone())
            .unwrap_or_default();

        for instruction in &instructions {
            self.translate(block, instruction, &mut frame)?;
        }
        if self.graph.control(block).is_none() {
            self.graph.append(block, NodeKind::Jump, vec![]);
        }

        self.exits[block] = Some(frame);
        Ok(())
    }

    fn entry_state(&mut self, block: usize) -> Result<FrameState> {
        let preds = self.graph.predecessors(block);
        if block == 0 {
            if !preds.is_empty() {
                return Err(structural_error!("Entry block has predecessors"));
            }
            return Ok(FrameState::default());
        }

        let incoming: Vec<Option<FrameState>> =
            preds.iter().map(|&p| self.exits[p].clone()).collect();
        if incoming.len() == 1 {
            if let Some(state) = &incoming[0] {
                return Ok(state.clone());
            }
        }

        let known: Vec<(usize, &FrameState)> = preds
            .iter()
            .zip(&incoming)
            .filter_map(|(&p, s)| s.as_ref().map(|s| (p, s)))
            .collect();
        let Some(&(_, first)) = known.first() else {
            return Err(structural_error!(
                "Block {} is reached only through unvisited predecessors",
                block
            ));
        };
        let has_pending = known.len() < preds.len();

        // Stack layout
        for (pred, state) in &known {
            if state.depth() != first.depth() || state.stack.len() != first.stack.len() {
                return Err(structural_error!(
                    "Stack depth mismatch entering block {} from block {}",
                    block,
                    pred
                ));
            }
        }
        let mut merged = FrameState::default();
        let mut slot_merges = Vec::new();
        for (index, entry) in first.stack.iter().enumerate() {
            if known.iter().all(|(_, s)| s.stack[index] == *entry) {
                merged.stack.push(*entry);
                continue;
            }
            if has_pending || known.iter().any(|(_, s)| s.stack[index].cells != entry.cells) {
                return Err(structural_error!(
                    "Incompatible stack slots entering block {}",
                    block
                ));
            }
            slot_merges.push(index);
            merged.stack.push(*entry);
        }

        for index in slot_merges {
            let mut values = Vec::with_capacity(known.len());
            for (pred, state) in &known {
                values.push(self.slot_value_at_end(*pred, state.stack[index])?);
            }
            let cells = first.stack[index].cells;
            let offset = self.slot_offset(first.stack[index].slot);
            let phi = self.graph.append(block, NodeKind::Phi, values);
            let slot = self
                .graph
                .append(block, NodeKind::StackSlot { offset, cells }, vec![phi]);
            merged.stack[index] = StackEntry { slot, cells };
        }

        // Registers
        let pri: Vec<Option<Option<NodeRef>>> =
            incoming.iter().map(|s| s.as_ref().map(|s| s.pri)).collect();
        let alt: Vec<Option<Option<NodeRef>>> =
            incoming.iter().map(|s| s.as_ref().map(|s| s.alt)).collect();
        merged.pri = self.merge_register(block, &preds, &pri, Register::Pri)?;
        merged.alt = self.merge_register(block, &preds, &alt, Register::Alt)?;
        Ok(merged)
    }

    /// Merges one register. `values[i]` is `None` for an unvisited predecessor and
    /// `Some(None)` for a predecessor leaving the register undefined.
    fn merge_register(
        &mut self,
        block: usize,
        preds: &[usize],
        values: &[Option<Option<NodeRef>>],
        register: Register,
    ) -> Result<Option<NodeRef>> {
        let mut known = Vec::with_capacity(values.len());
        for value in values.iter().flatten() {
            match value {
                Some(node) => known.push(*node),
                None => return Ok(None),
            }
        }
        let Some(&first) = known.first() else {
            return Ok(None);
        };

        let has_pending = known.len() < values.len();
        if !has_pending && known.iter().all(|&v| v == first) {
            return Ok(Some(first));
        }

        let phi = self.graph.append(block, NodeKind::Phi, vec![]);
        let mut operands = Vec::with_capacity(values.len());
        for (position, value) in values.iter().enumerate() {
            match value {
                Some(Some(node)) => operands.push(*node),
                _ => {
                    operands.push(phi);
                    self.pending.push(PendingOperand {
                        phi,
                        position,
                        pred: preds[position],
                        register,
                    });
                }
            }
        }
        self.graph.set_operands(phi, operands)?;
        Ok(Some(phi))
    }

    fn patch_pending(&mut self) -> Result<()> {
        for pending in std::mem::take(&mut self.pending) {
            let Some(exit) = &self.exits[pending.pred] else {
                return Err(structural_error!("Block {} was never built", pending.pred));
            };
            let value = match pending.register {
                Register::Pri => exit.pri,
                Register::Alt => exit.alt,
            };
            if let Some(value) = value {
                self.graph
                    .replace_operand(pending.phi, pending.position, value)?;
            }
        }

        // Back edges must carry the stack layout the target was built with.
        for block in 0..self.graph.block_count() {
            let Some(entry) = &self.entries[block] else {
                continue;
            };
            for pred in self.graph.predecessors(block) {
                if pred < block {
                    continue;
                }
                let matches = self.exits[pred]
                    .as_ref()
                    .is_some_and(|exit| exit.stack == entry.stack);
                if !matches {
                    return Err(structural_error!(
                        "Stack mismatch on back edge from block {} to block {}",
                        pred,
                        block
                    ));
                }
            }
        }
        Ok(())
    }

    fn fold_trivial_phis(&mut self) -> Result<()> {
        loop {
            let mut changed = false;
            for node in self.graph.node_refs() {
                let Some(phi) = self.graph.get(node) else {
                    continue;
                };
                if phi.kind != NodeKind::Phi {
                    continue;
                }
                let mut unique = phi.operands().iter().copied().filter(|&o| o != node);
                let Some(value) = unique.next() else {
                    continue;
                };
                if unique.all(|o| o == value) {
                    self.graph.replace_all_uses(node, value);
                    self.graph.remove(node)?;
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn slot_offset(&self, slot: NodeRef) -> i32 {
        match self.graph.get(slot).map(|n| &n.kind) {
            Some(NodeKind::StackSlot { offset, .. }) => *offset,
            _ => 0,
        }
    }

    fn is_addressed(&self, slot: NodeRef) -> bool {
        self.graph
            .uses(slot)
            .iter()
            .any(|&u| self.graph.get(u).is_some_and(|n| n.kind == NodeKind::LocalRef))
    }

    /// The value held by a stack entry, read at the current end of `block`.
    fn slot_value(&mut self, block: usize, entry: StackEntry) -> NodeRef {
        if !self.is_addressed(entry.slot) {
            if let Some(init) = self.graph.get(entry.slot).and_then(|n| n.operand(0)) {
                return init;
            }
        }
        let address = self.graph.append(block, NodeKind::LocalRef, vec![entry.slot]);
        self.graph.append(block, NodeKind::Load, vec![address])
    }

    /// The value held by a stack entry, read before the control node of a finished block.
    fn slot_value_at_end(&mut self, block: usize, entry: StackEntry) -> Result<NodeRef> {
        if !self.is_addressed(entry.slot) {
            if let Some(init) = self.graph.get(entry.slot).and_then(|n| n.operand(0)) {
                return Ok(init);
            }
        }
        let address = self
            .graph
            .insert_before_control(block, NodeKind::LocalRef, vec![entry.slot]);
        Ok(self
            .graph
            .insert_before_control(block, NodeKind::Load, vec![address]))
    }

    fn emit(&mut self, block: usize, kind: NodeKind, operands: Vec<NodeRef>) -> NodeRef {
        self.graph.append(block, kind, operands)
    }

    fn constant(&mut self, block: usize, value: i32) -> NodeRef {
        self.emit(block, NodeKind::Constant(value), vec![])
    }

    fn push(
        &mut self,
        block: usize,
        frame: &mut FrameState,
        value: Option<NodeRef>,
        cells: u32,
    ) -> Result<()> {
        let depth = frame
            .depth()
            .checked_add(cells)
            .filter(|&depth| depth <= MAX_FRAME_CELLS)
            .ok_or_else(|| malformed_error!("Stack frame exceeds {} cells", MAX_FRAME_CELLS))?;
        let offset = -4 * depth as i32;
        let operands = value.into_iter().collect();
        let slot = self.emit(block, NodeKind::StackSlot { offset, cells }, operands);
        frame.stack.push(StackEntry { slot, cells });
        Ok(())
    }

    /// Allocates `cells` uninitialized cells, one slot per debug symbol they cover.
    fn allocate(&mut self, block: usize, frame: &mut FrameState, cells: u32) -> Result<()> {
        if cells > MAX_FRAME_CELLS {
            return Err(malformed_error!("Stack frame exceeds {} cells", MAX_FRAME_CELLS));
        }
        let mut top = -4 * frame.depth() as i32;
        let bottom = top - 4 * cells as i32;
        let boundaries: Vec<i32> = self
            .symbols
            .iter()
            .copied()
            .filter(|&offset| offset > bottom && offset < top)
            .collect();
        for boundary in boundaries {
            self.push(block, frame, None, ((top - boundary) / 4) as u32)?;
            top = boundary;
        }
        self.push(block, frame, None, ((top - bottom) / 4) as u32)
    }

    fn pop(frame: &mut FrameState) -> Result<StackEntry> {
        frame
            .stack
            .pop()
            .ok_or_else(|| structural_error!("Stack underflow"))
    }

    fn pri(frame: &FrameState) -> Result<NodeRef> {
        frame
            .pri
            .ok_or_else(|| structural_error!("Read of undefined PRI"))
    }

    fn alt(frame: &FrameState) -> Result<NodeRef> {
        frame
            .alt
            .ok_or_else(|| structural_error!("Read of undefined ALT"))
    }

    /// Address of the frame cell at `offset`.
    fn local_address(&mut self, block: usize, frame: &FrameState, offset: i32) -> Result<NodeRef> {
        if offset >= ARGUMENT_BASE {
            if (offset - ARGUMENT_BASE) % 4 != 0 {
                return Err(malformed_error!("Unaligned argument offset {}", offset));
            }
            let index = ((offset - ARGUMENT_BASE) / 4) as usize;
            let Some(&argument) = self.arguments.get(index) else {
                return Err(structural_error!("Argument {} is not declared", index));
            };
            return Ok(self.emit(block, NodeKind::LocalRef, vec![argument]));
        }
        if offset >= 0 {
            return Err(malformed_error!("Access to frame header at offset {}", offset));
        }

        let mut top = 0i32;
        for entry in &frame.stack {
            let base = top - 4 * entry.cells as i32;
            if offset >= base && offset < top {
                if (offset - base) % 4 != 0 {
                    return Err(malformed_error!("Unaligned frame offset {}", offset));
                }
                let element = (offset - base) / 4;
                let slot = entry.slot;
                let address = self.emit(block, NodeKind::LocalRef, vec![slot]);
                if element == 0 {
                    return Ok(address);
                }
                let index = self.constant(block, element);
                return Ok(self.emit(block, NodeKind::Index, vec![address, index]));
            }
            top = base;
        }
        Err(structural_error!(
            "Frame offset {} lies outside the stack",
            offset
        ))
    }

    /// Address of the data cell at `address`, resolved against the global table.
    fn global_address(&mut self, block: usize, address: i32) -> NodeRef {
        let address = address as u32;
        match self.program.global_at(address) {
            Some(global) if global.address != address => {
                let base_address = global.address;
                let base = self.emit(block, NodeKind::GlobalRef(base_address), vec![]);
                let index = self.constant(block, ((address - base_address) / 4) as i32);
                self.emit(block, NodeKind::Index, vec![base, index])
            }
            _ => self.emit(block, NodeKind::GlobalRef(address), vec![]),
        }
    }

    fn load_local(&mut self, block: usize, frame: &FrameState, offset: i32) -> Result<NodeRef> {
        let address = self.local_address(block, frame, offset)?;
        Ok(self.emit(block, NodeKind::Load, vec![address]))
    }

    fn load_global(&mut self, block: usize, address: i32) -> NodeRef {
        let address = self.global_address(block, address);
        self.emit(block, NodeKind::Load, vec![address])
    }

    fn binary(&mut self, block: usize, op: BinaryOp, lhs: NodeRef, rhs: NodeRef) -> NodeRef {
        self.emit(block, NodeKind::Binary(op), vec![lhs, rhs])
    }

    fn arithmetic(&mut self, block: usize, frame: &mut FrameState, op: BinaryOp) -> Result<()> {
        let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
        frame.pri = Some(self.binary(block, op, pri, alt));
        Ok(())
    }

    fn unary(&mut self, block: usize, frame: &mut FrameState, op: UnaryOp) -> Result<()> {
        let pri = Self::pri(frame)?;
        frame.pri = Some(self.emit(block, NodeKind::Unary(op), vec![pri]));
        Ok(())
    }

    fn conditional(
        &mut self,
        block: usize,
        frame: &FrameState,
        op: Option<BinaryOp>,
        on_zero: bool,
    ) -> Result<()> {
        let pri = Self::pri(frame)?;
        let condition = match op {
            Some(op) => {
                let alt = Self::alt(frame)?;
                self.binary(block, op, pri, alt)
            }
            None => pri,
        };
        if self.graph.successors(block).len() < 2 {
            self.emit(block, NodeKind::Jump, vec![]);
        } else {
            self.emit(block, NodeKind::JumpCondition { on_zero }, vec![condition]);
        }
        Ok(())
    }

    /// Reads the argument byte count of a call from the slot on top of the stack.
    fn argument_count(&self, frame: &FrameState) -> Result<usize> {
        let entry = frame
            .stack
            .last()
            .ok_or_else(|| structural_error!("Call without argument count"))?;
        let count = self
            .graph
            .get(entry.slot)
            .and_then(|n| n.operand(0))
            .and_then(|init| self.graph.get(init))
            .and_then(|n| n.as_constant())
            .ok_or_else(|| structural_error!("Argument count is not a constant"))?;
        if count < 0 || count % 4 != 0 {
            return Err(malformed_error!("Invalid argument byte count {}", count));
        }
        Ok((count / 4) as usize)
    }

    fn pop_arguments(frame: &mut FrameState, count: usize) -> Result<Vec<NodeRef>> {
        (0..count).map(|_| Self::pop(frame).map(|e| e.slot)).collect()
    }

    fn store(&mut self, block: usize, address: NodeRef, value: NodeRef) {
        self.emit(block, NodeKind::Store, vec![address, value]);
    }

    fn inc_dec(&mut self, block: usize, address: NodeRef, delta: i32) {
        self.emit(block, NodeKind::IncDec(delta), vec![address]);
    }

    fn step_register(
        &mut self,
        block: usize,
        value: Option<NodeRef>,
        delta: i32,
    ) -> Result<NodeRef> {
        let value = value.ok_or_else(|| structural_error!("Read of undefined register"))?;
        let one = self.constant(block, 1);
        let op = if delta > 0 { BinaryOp::Add } else { BinaryOp::Sub };
        Ok(self.binary(block, op, value, one))
    }

    #[allow(clippy::too_many_lines)]
    fn translate(
        &mut self,
        block: usize,
        instruction: &Instruction,
        frame: &mut FrameState,
    ) -> Result<()> {
        use Opcode::*;

        let op0 = instruction.operand(0);
        let op1 = instruction.operand(1);

        match instruction.opcode {
            LoadPri => frame.pri = Some(self.load_global(block, op0)),
            LoadAlt => frame.alt = Some(self.load_global(block, op0)),
            LoadSPri => frame.pri = Some(self.load_local(block, frame, op0)?),
            LoadSAlt => frame.alt = Some(self.load_local(block, frame, op0)?),
            LrefSPri | LrefSAlt => {
                let pointer = self.load_local(block, frame, op0)?;
                let value = self.emit(block, NodeKind::Load, vec![pointer]);
                if instruction.opcode == LrefSPri {
                    frame.pri = Some(value);
                } else {
                    frame.alt = Some(value);
                }
            }
            LoadI => {
                let pri = Self::pri(frame)?;
                frame.pri = Some(self.emit(block, NodeKind::Load, vec![pri]));
            }
            LoadBoth => {
                frame.pri = Some(self.load_global(block, op0));
                frame.alt = Some(self.load_global(block, op1));
            }
            LoadSBoth => {
                frame.pri = Some(self.load_local(block, frame, op0)?);
                frame.alt = Some(self.load_local(block, frame, op1)?);
            }
            ConstPri => frame.pri = Some(self.constant(block, op0)),
            ConstAlt => frame.alt = Some(self.constant(block, op0)),
            ZeroPri => frame.pri = Some(self.constant(block, 0)),
            ZeroAlt => frame.alt = Some(self.constant(block, 0)),
            AddrPri => frame.pri = Some(self.local_address(block, frame, op0)?),
            AddrAlt => frame.alt = Some(self.local_address(block, frame, op0)?),

            StorPri | StorAlt => {
                let value = if instruction.opcode == StorPri {
                    Self::pri(frame)?
                } else {
                    Self::alt(frame)?
                };
                let address = self.global_address(block, op0);
                self.store(block, address, value);
            }
            StorSPri | StorSAlt => {
                let value = if instruction.opcode == StorSPri {
                    Self::pri(frame)?
                } else {
                    Self::alt(frame)?
                };
                let address = self.local_address(block, frame, op0)?;
                self.store(block, address, value);
            }
            SrefSPri | SrefSAlt => {
                let value = if instruction.opcode == SrefSPri {
                    Self::pri(frame)?
                } else {
                    Self::alt(frame)?
                };
                let pointer = self.load_local(block, frame, op0)?;
                self.store(block, pointer, value);
            }
            StorI => {
                let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
                self.store(block, alt, pri);
            }
            Zero => {
                let zero = self.constant(block, 0);
                let address = self.global_address(block, op0);
                self.store(block, address, zero);
            }
            ZeroS => {
                let address = self.local_address(block, frame, op0)?;
                let zero = self.constant(block, 0);
                self.store(block, address, zero);
            }
            Const => {
                let address = self.global_address(block, op0);
                let value = self.constant(block, op1);
                self.store(block, address, value);
            }
            ConstS => {
                let address = self.local_address(block, frame, op0)?;
                let value = self.constant(block, op1);
                self.store(block, address, value);
            }

            Lidx => {
                let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
                let element = self.emit(block, NodeKind::Index, vec![alt, pri]);
                frame.pri = Some(self.emit(block, NodeKind::Load, vec![element]));
            }
            Idxaddr => {
                let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
                frame.pri = Some(self.emit(block, NodeKind::Index, vec![alt, pri]));
            }

            MovePri => frame.pri = frame.alt,
            MoveAlt => frame.alt = frame.pri,
            Xchg => std::mem::swap(&mut frame.pri, &mut frame.alt),

            PushPri => {
                let pri = Self::pri(frame)?;
                self.push(block, frame, Some(pri), 1)?;
            }
            PushAlt => {
                let alt = Self::alt(frame)?;
                self.push(block, frame, Some(alt), 1)?;
            }
            PushC | Push2C | Push3C | Push4C | Push5C => {
                for &value in &instruction.operands {
                    let constant = self.constant(block, value);
                    self.push(block, frame, Some(constant), 1)?;
                }
            }
            Push | Push2 | Push3 | Push4 | Push5 => {
                for &address in &instruction.operands {
                    let value = self.load_global(block, address);
                    self.push(block, frame, Some(value), 1)?;
                }
            }
            PushS | Push2S | Push3S | Push4S | Push5S => {
                for &offset in &instruction.operands {
                    let value = self.load_local(block, frame, offset)?;
                    self.push(block, frame, Some(value), 1)?;
                }
            }
            PushAdr | Push2Adr | Push3Adr | Push4Adr | Push5Adr => {
                for &offset in &instruction.operands {
                    let address = self.local_address(block, frame, offset)?;
                    self.push(block, frame, Some(address), 1)?;
                }
            }
            PopPri | PopAlt => {
                let entry = Self::pop(frame)?;
                let value = self.slot_value(block, entry);
                if instruction.opcode == PopPri {
                    frame.pri = Some(value);
                } else {
                    frame.alt = Some(value);
                }
            }
            Stack => {
                if op0 % 4 != 0 {
                    return Err(malformed_error!("Unaligned stack adjustment {}", op0));
                }
                let mut cells = op0.unsigned_abs() / 4;
                if op0 < 0 {
                    self.allocate(block, frame, cells)?;
                } else {
                    while cells > 0 {
                        let entry = Self::pop(frame)?;
                        if entry.cells > cells {
                            return Err(structural_error!(
                                "Stack release splits a {} cell slot",
                                entry.cells
                            ));
                        }
                        cells -= entry.cells;
                    }
                }
            }
            Heap => {
                if op0 > 0 {
                    let heap = self.emit(
                        block,
                        NodeKind::Heap {
                            cells: (op0 / 4) as u32,
                        },
                        vec![],
                    );
                    frame.alt = Some(self.emit(block, NodeKind::LocalRef, vec![heap]));
                }
            }

            Call => {
                let count = self.argument_count(frame)?;
                Self::pop(frame)?;
                let arguments = Self::pop_arguments(frame, count)?;
                frame.pri = Some(self.emit(block, NodeKind::Call(op0 as u32), arguments));
                frame.alt = None;
            }
            SysreqC => {
                let count = self.argument_count(frame)?;
                let depth = frame.stack.len();
                if depth < count + 1 {
                    return Err(structural_error!("Stack underflow"));
                }
                let arguments = frame.stack[depth - 1 - count..depth - 1]
                    .iter()
                    .rev()
                    .map(|e| e.slot)
                    .collect();
                frame.pri = Some(self.emit(block, NodeKind::SysReq(op0 as u32), arguments));
                frame.alt = None;
            }
            SysreqN => {
                if op1 < 0 {
                    return Err(malformed_error!("Negative native argument count {}", op1));
                }
                let arguments = Self::pop_arguments(frame, op1 as usize)?;
                frame.pri = Some(self.emit(block, NodeKind::SysReq(op0 as u32), arguments));
                frame.alt = None;
            }

            Jump => {
                self.emit(block, NodeKind::Jump, vec![]);
            }
            Jzer => self.conditional(block, frame, None, true)?,
            Jnz => self.conditional(block, frame, None, false)?,
            Jeq => self.conditional(block, frame, Some(BinaryOp::Eq), false)?,
            Jneq => self.conditional(block, frame, Some(BinaryOp::Ne), false)?,
            Jsless => self.conditional(block, frame, Some(BinaryOp::Lt), false)?,
            Jsleq => self.conditional(block, frame, Some(BinaryOp::Le), false)?,
            Jsgrtr => self.conditional(block, frame, Some(BinaryOp::Gt), false)?,
            Jsgeq => self.conditional(block, frame, Some(BinaryOp::Ge), false)?,
            Switch => {
                let pri = Self::pri(frame)?;
                self.emit(block, NodeKind::Switch, vec![pri]);
            }
            Retn => {
                let operands = frame.pri.into_iter().collect();
                self.emit(block, NodeKind::Return, operands);
            }
            Halt => {
                let code = self.constant(block, op0);
                self.emit(block, NodeKind::Halt, vec![code]);
            }

            Shl => self.arithmetic(block, frame, BinaryOp::Shl)?,
            Shr => self.arithmetic(block, frame, BinaryOp::Shr)?,
            Sshr => self.arithmetic(block, frame, BinaryOp::Sshr)?,
            Smul => self.arithmetic(block, frame, BinaryOp::Mul)?,
            Add => self.arithmetic(block, frame, BinaryOp::Add)?,
            Sub => self.arithmetic(block, frame, BinaryOp::Sub)?,
            And => self.arithmetic(block, frame, BinaryOp::And)?,
            Or => self.arithmetic(block, frame, BinaryOp::Or)?,
            Xor => self.arithmetic(block, frame, BinaryOp::Xor)?,
            Eq => self.arithmetic(block, frame, BinaryOp::Eq)?,
            Neq => self.arithmetic(block, frame, BinaryOp::Ne)?,
            Sless => self.arithmetic(block, frame, BinaryOp::Lt)?,
            Sleq => self.arithmetic(block, frame, BinaryOp::Le)?,
            Sgrtr => self.arithmetic(block, frame, BinaryOp::Gt)?,
            Sgeq => self.arithmetic(block, frame, BinaryOp::Ge)?,
            FloatAdd => self.arithmetic(block, frame, BinaryOp::FloatAdd)?,
            FloatSub => self.arithmetic(block, frame, BinaryOp::FloatSub)?,
            FloatMul => self.arithmetic(block, frame, BinaryOp::FloatMul)?,
            FloatDiv => self.arithmetic(block, frame, BinaryOp::FloatDiv)?,
            FloatGt => self.arithmetic(block, frame, BinaryOp::FloatGt)?,
            FloatGe => self.arithmetic(block, frame, BinaryOp::FloatGe)?,
            FloatLt => self.arithmetic(block, frame, BinaryOp::FloatLt)?,
            FloatLe => self.arithmetic(block, frame, BinaryOp::FloatLe)?,
            FloatNe => self.arithmetic(block, frame, BinaryOp::FloatNe)?,
            FloatEq => self.arithmetic(block, frame, BinaryOp::FloatEq)?,
            SubAlt => {
                let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
                frame.pri = Some(self.binary(block, BinaryOp::Sub, alt, pri));
            }
            Sdiv | SdivAlt => {
                let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
                let (dividend, divisor) = if instruction.opcode == Sdiv {
                    (pri, alt)
                } else {
                    (alt, pri)
                };
                frame.pri = Some(self.binary(block, BinaryOp::Div, dividend, divisor));
                frame.alt = Some(self.binary(block, BinaryOp::Mod, dividend, divisor));
            }
            Not => self.unary(block, frame, UnaryOp::Not)?,
            Neg => self.unary(block, frame, UnaryOp::Neg)?,
            Invert => self.unary(block, frame, UnaryOp::Invert)?,
            Float => self.unary(block, frame, UnaryOp::IntToFloat)?,
            RndToZero => self.unary(block, frame, UnaryOp::FloatToInt)?,
            AddC | SmulC | EqCPri => {
                let pri = Self::pri(frame)?;
                let value = self.constant(block, op0);
                let op = match instruction.opcode {
                    AddC => BinaryOp::Add,
                    SmulC => BinaryOp::Mul,
                    _ => BinaryOp::Eq,
                };
                frame.pri = Some(self.binary(block, op, pri, value));
            }

            IncPri => frame.pri = Some(self.step_register(block, frame.pri, 1)?),
            IncAlt => frame.alt = Some(self.step_register(block, frame.alt, 1)?),
            DecPri => frame.pri = Some(self.step_register(block, frame.pri, -1)?),
            DecAlt => frame.alt = Some(self.step_register(block, frame.alt, -1)?),
            Inc | Dec => {
                let address = self.global_address(block, op0);
                self.inc_dec(block, address, if instruction.opcode == Inc { 1 } else { -1 });
            }
            IncS | DecS => {
                let address = self.local_address(block, frame, op0)?;
                self.inc_dec(block, address, if instruction.opcode == IncS { 1 } else { -1 });
            }
            IncI | DecI => {
                let pri = Self::pri(frame)?;
                self.inc_dec(block, pri, if instruction.opcode == IncI { 1 } else { -1 });
            }

            Movs => {
                let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
                self.emit(block, NodeKind::MemCopy(op0 as u32), vec![alt, pri]);
            }
            Fill => {
                let (pri, alt) = (Self::pri(frame)?, Self::alt(frame)?);
                self.emit(block, NodeKind::Fill(op0 as u32), vec![alt, pri]);
            }
            Bounds => {
                let pri = Self::pri(frame)?;
                self.emit(block, NodeKind::Bounds(op0), vec![pri]);
            }

            Proc | Nop | Break => {}
            Casetbl => {
                return Err(malformed_error!(
                    "Case table executed at {:#x}",
                    instruction.address
                ));
            }
        }
        Ok(())
    }
}
