//! # smxscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the
//! smxscope library. Import it to get quick access to everything needed to build,
//! decompile and print a program.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all smxscope operations
pub use crate::Error;

/// The result type used throughout smxscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The decompilation driver, its options and results
pub use crate::decompiler::{
    Decompilation, DecompiledFunction, Decompiler, DecompilerOptions, FunctionOutput,
};

/// Prints a decompilation as source
pub use crate::emitter::{render, SourceWriter};

// ================================================================================================
// Program Model
// ================================================================================================

/// Programs and their symbol tables
pub use crate::program::{
    Argument, Function, Global, LocalSymbol, Native, Program, ProgramBuilder, Tag, VariableKind,
};

// ================================================================================================
// Bytecode
// ================================================================================================

/// Instruction set and decoding
pub use crate::disassembler::{BasicBlock, Instruction, Opcode};

/// Bytecode assembly
pub use crate::assembly::Assembler;

// ================================================================================================
// Analysis
// ================================================================================================

/// Control flow, node graphs and types
pub use crate::analysis::{
    ControlFlowGraph, Node, NodeBuilder, NodeGraph, NodeKind, NodeRef, Type,
};

/// The pass pipeline
pub use crate::compiler::{NodePass, PassContext, PassScheduler, Stage};

/// The structured control tree
pub use crate::structure::{Condition, ControlBlock, StructureBuilder};
