// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # smxscope
//!
//! A decompiler for SourcePawn-style cell bytecode. `smxscope` recovers readable source from
//! the bytecode of a stack-and-register virtual machine with 4-byte cells: two registers
//! (PRI and ALT), a frame pointer, a data segment and a heap.
//!
//! ## Features
//!
//! - **Control flow recovery** - Basic blocks, dominators and natural loops from raw code
//! - **Node graphs** - An SSA-like value graph per function with phis at merge points
//! - **Idiom recognition** - Compound assignments, string and array initializers, heap
//!   temporaries of by-reference arguments, bounds guards
//! - **Type inference** - Forward and backward propagation over a small type lattice
//! - **Structuring** - `if`/`else`, `while`, `for`, `switch`, short-circuit conditions, with
//!   labeled fallbacks for irreducible flow
//! - **Failure isolation** - A function that cannot be decompiled becomes a placeholder;
//!   the rest of the program is unaffected
//!
//! ## Quick Start
//!
//! ```rust
//! use smxscope::prelude::*;
//!
//! // max(a, b)
//! let mut asm = Assembler::new();
//! asm.emit(Opcode::Proc, &[])?;
//! asm.emit(Opcode::LoadSPri, &[12])?;
//! asm.emit(Opcode::LoadSAlt, &[16])?;
//! asm.emit_branch(Opcode::Jsgeq, "done")?;
//! asm.emit(Opcode::MovePri, &[])?;
//! asm.define_label("done")?;
//! asm.emit(Opcode::Retn, &[])?;
//!
//! let program = Program::builder().code(asm.finalize()?).function("max", 0).build();
//! let mut decompiler = Decompiler::new(program);
//! let decompilation = decompiler.run();
//!
//! assert_eq!(decompilation.failed_count(), 0);
//! println!("{}", render(decompiler.program(), &decompilation));
//! # Ok::<(), smxscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! The pipeline for each function runs in a fixed order, enforced at runtime by the
//! [`compiler::Stage`] of its node graph:
//!
//! 1. [`analysis::cfg`] decodes the function into a control flow graph
//! 2. [`analysis::NodeBuilder`] abstractly interprets it into a [`analysis::NodeGraph`]
//! 3. [`compiler::PassScheduler`] runs the cleanup, typing, idiom and naming passes
//! 4. [`structure::StructureBuilder`] turns the blocks into a tree of constructs
//! 5. [`emitter`] prints the tree as source
//!
//! [`Decompiler`] drives all of it for every function of a [`Program`].
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`] with [`Error`]. Errors are fatal to the
//! function being processed only; see [`Error`] for the families.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use smxscope::prelude::*;
///
/// let program = Program::builder().function("main", 0).build();
/// assert_eq!(program.functions().len(), 1);
/// ```
pub mod prelude;

/// Shared utilities: the directed graph and its algorithms.
pub mod utils;

/// The program model: code and data segments, functions, globals and natives.
pub mod program;

/// Instruction set, decoding and basic block discovery.
///
/// # Key Types
///
/// - [`disassembler::Opcode`] - the instruction set
/// - [`disassembler::Instruction`] - a decoded instruction with its operands
/// - [`disassembler::BasicBlock`] - a maximal straight-line instruction run
///
/// # Examples
///
/// ```rust
/// use smxscope::{assembly::Assembler, disassembler::{decode_blocks, Opcode}};
///
/// let mut asm = Assembler::new();
/// asm.emit(Opcode::Proc, &[])?;
/// asm.emit(Opcode::ZeroPri, &[])?;
/// asm.emit(Opcode::Retn, &[])?;
///
/// let decoded = decode_blocks(&asm.finalize()?, 0)?;
/// assert_eq!(decoded.blocks.len(), 1);
/// # Ok::<(), smxscope::Error>(())
/// ```
pub mod disassembler;

/// Bytecode assembly, used to build programs in tests, benchmarks and fuzzing.
pub mod assembly;

/// Control flow graphs, node graphs and type inference.
pub mod analysis;

/// The node pass pipeline and its stage ordering.
pub mod compiler;

/// Control flow structuring.
pub mod structure;

/// Source text output.
pub mod emitter;

/// The decompilation driver.
pub mod decompiler;

/// `smxscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust
/// use smxscope::{analysis::ControlFlowGraph, Result};
///
/// fn block_count(code: &[u8]) -> Result<usize> {
///     Ok(ControlFlowGraph::build(code, 0)?.block_count())
/// }
///
/// assert!(block_count(&[]).is_err());
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `smxscope` Error type
///
/// The main error type for all operations in this crate. See the type documentation for
/// the error families.
pub use error::Error;

/// The decompilation driver and its results.
pub use decompiler::{
    Decompilation, DecompiledFunction, Decompiler, DecompilerOptions, FunctionOutput,
    PreprocessFailure,
};

/// The program model.
pub use program::Program;

/// The directed graph used for control flow.
pub use utils::graph;

/// Bounds-checked cell reader over code and data segments.
///
/// # Example
///
/// ```rust
/// use smxscope::{disassembler::decode_instruction, Parser};
///
/// let code = [0x0b, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00]; // const.pri 7
/// let mut parser = Parser::new(&code);
/// let instruction = decode_instruction(&mut parser, 0)?;
/// assert_eq!(instruction.size, 8);
/// assert_eq!(instruction.operands, vec![7]);
/// # Ok::<(), smxscope::Error>(())
/// ```
pub use file::parser::Parser;
