//! Basic block representation.

use crate::disassembler::{FlowType, Instruction};

/// A maximal straight-line run of instructions with a single entry.
///
/// Successor and predecessor lists hold block ids. Successors keep the order of the
/// terminator's targets (taken before fallthrough, default before cases) with duplicates
/// removed, so every predecessor appears once in its successor's predecessor list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Block id; after graph construction, the reverse postorder index
    pub id: usize,
    /// Address of the first instruction
    pub address: u32,
    /// Instructions in address order
    pub instructions: Vec<Instruction>,
    /// Successor block ids
    pub successors: Vec<usize>,
    /// Predecessor block ids
    pub predecessors: Vec<usize>,
}

impl BasicBlock {
    /// Creates an empty block starting at `address`.
    #[must_use]
    pub fn new(id: usize, address: u32) -> Self {
        BasicBlock {
            id,
            address,
            instructions: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
        }
    }

    /// The terminating (last) instruction.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Control flow effect of the last instruction.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.terminator()
            .map_or(FlowType::Sequential, |i| i.flow_type)
    }

    /// Address just past the last instruction.
    #[must_use]
    pub fn end_address(&self) -> u32 {
        self.terminator()
            .map_or(self.address, Instruction::next_address)
    }

    /// Returns `true` if the block leaves the function.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self.flow_type(), FlowType::Return | FlowType::Halt)
    }
}
