//! Instruction decoding for the SP1 cell machine.
//!
//! - [`Opcode`] / [`FlowType`] - the instruction set and its control flow classes
//! - [`Instruction`] / [`CaseTable`] - decoded instructions
//! - [`BasicBlock`] - straight-line instruction runs with successor edges
//! - [`decode_instruction`] / [`decode_blocks`] - single instruction and whole-function
//!   decoding

mod block;
mod decoder;
mod instruction;
mod opcodes;
mod visitedmap;

pub use block::BasicBlock;
pub use decoder::{decode_blocks, decode_instruction, DecodedFunction};
pub use instruction::{CaseTable, Instruction};
pub use opcodes::{FlowType, Opcode};
