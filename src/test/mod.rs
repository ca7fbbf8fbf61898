//! Shared helpers for unit tests.

use crate::{
    analysis::{ControlFlowGraph, NodeBuilder, NodeGraph},
    assembly::Assembler,
    compiler::{PassContext, PassScheduler, Stage},
    disassembler::Opcode,
    program::Program,
    Result,
};

/// Builds function `index` of `program` and runs the pipeline up to `stage`.
pub(crate) fn graph_at(program: &Program, index: usize, stage: Stage) -> Result<NodeGraph> {
    let function = &program.functions()[index];
    let mut graph = NodeBuilder::new(program, function).build()?;
    let ctx = PassContext::new(program, function);
    PassScheduler::default().run_until(&mut graph, &ctx, stage)?;
    Ok(graph)
}

/// A function consisting of one returning block.
pub(crate) fn single_block_cfg() -> ControlFlowGraph {
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[]).unwrap();
    asm.emit(Opcode::Retn, &[]).unwrap();
    ControlFlowGraph::build(&asm.finalize().unwrap(), 0).unwrap()
}

/// A diamond: block 0 branches to blocks 1 and 2, which both jump to block 3.
pub(crate) fn two_way_cfg() -> ControlFlowGraph {
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[]).unwrap();
    asm.emit(Opcode::LoadSPri, &[12]).unwrap();
    asm.emit_branch(Opcode::Jzer, "else").unwrap();
    asm.emit(Opcode::ConstPri, &[1]).unwrap();
    asm.emit_branch(Opcode::Jump, "join").unwrap();
    asm.define_label("else").unwrap();
    asm.emit(Opcode::ConstPri, &[2]).unwrap();
    asm.emit_branch(Opcode::Jump, "join").unwrap();
    asm.define_label("join").unwrap();
    asm.emit(Opcode::Retn, &[]).unwrap();
    ControlFlowGraph::build(&asm.finalize().unwrap(), 0).unwrap()
}
