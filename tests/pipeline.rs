//! Pipeline integration tests.
//!
//! These tests drive the public API the way a caller would:
//! 1. Assemble bytecode with `Assembler`
//! 2. Build the node graph and run the pass pipeline
//! 3. Structure the control flow
//! 4. Check the properties every run must hold: block placement, pass ordering,
//!    idempotence and monotone typing

use smxscope::{
    analysis::{BackwardTypePass, ForwardTypePass, NodeBuilder, NodeGraph, Type},
    assembly::Assembler,
    compiler::{DeadCodeEliminationPass, NodePass, PassContext, PassScheduler, Stage},
    disassembler::Opcode,
    program::{Argument, Function, Program, VariableKind},
    structure::StructureBuilder,
    Decompiler, Error, Result,
};

/// Builds function `index` of `program` and runs the pipeline up to `stage`.
fn graph_until(program: &Program, index: usize, stage: Stage) -> Result<NodeGraph> {
    let function = &program.functions()[index];
    let mut graph = NodeBuilder::new(program, function).build()?;
    let ctx = PassContext::new(program, function);
    PassScheduler::default().run_until(&mut graph, &ctx, stage)?;
    Ok(graph)
}

fn single(asm: Assembler) -> Result<Program> {
    Ok(Program::builder()
        .code(asm.finalize()?)
        .function("f", 0)
        .build())
}

/// Asserts that the structured body places every block exactly once.
fn assert_placement(program: &Program) -> Result<()> {
    let mut graph = graph_until(program, 0, Stage::DeclarationsCoalesced)?;
    let body = StructureBuilder::run(&mut graph)?;
    let mut placed = body.placed_blocks();
    placed.sort_unstable();
    let expected: Vec<usize> = (0..graph.block_count()).collect();
    assert_eq!(placed, expected, "{body:?}");
    Ok(())
}

fn if_else() -> Result<Program> {
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[])?;
    asm.emit(Opcode::LoadSPri, &[12])?;
    asm.emit(Opcode::ConstAlt, &[3])?;
    asm.emit(Opcode::Sless, &[])?;
    asm.emit_branch(Opcode::Jzer, "else")?;
    asm.emit(Opcode::ConstPri, &[1])?;
    asm.emit_branch(Opcode::Jump, "join")?;
    asm.define_label("else")?;
    asm.emit(Opcode::ConstPri, &[2])?;
    asm.define_label("join")?;
    asm.emit(Opcode::Retn, &[])?;
    single(asm)
}

fn countdown() -> Result<Program> {
    // while (_arg0 > 0) _arg0--; return 0
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[])?;
    asm.define_label("head")?;
    asm.emit(Opcode::LoadSPri, &[12])?;
    asm.emit(Opcode::ConstAlt, &[0])?;
    asm.emit(Opcode::Sgrtr, &[])?;
    asm.emit_branch(Opcode::Jzer, "exit")?;
    asm.emit(Opcode::DecS, &[12])?;
    asm.emit_branch(Opcode::Jump, "head")?;
    asm.define_label("exit")?;
    asm.emit(Opcode::ZeroPri, &[])?;
    asm.emit(Opcode::Retn, &[])?;
    single(asm)
}

fn nested_loops_with_exit() -> Result<Program> {
    // while (a) { while (b) { if (c) goto done; b--; } a--; } done: return 0
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[])?;
    asm.define_label("outer")?;
    asm.emit(Opcode::LoadSPri, &[12])?;
    asm.emit_branch(Opcode::Jzer, "done")?;
    asm.define_label("inner")?;
    asm.emit(Opcode::LoadSPri, &[16])?;
    asm.emit_branch(Opcode::Jzer, "latch")?;
    asm.emit(Opcode::LoadSPri, &[20])?;
    asm.emit_branch(Opcode::Jnz, "done")?;
    asm.emit(Opcode::DecS, &[16])?;
    asm.emit_branch(Opcode::Jump, "inner")?;
    asm.define_label("latch")?;
    asm.emit(Opcode::DecS, &[12])?;
    asm.emit_branch(Opcode::Jump, "outer")?;
    asm.define_label("done")?;
    asm.emit(Opcode::ZeroPri, &[])?;
    asm.emit(Opcode::Retn, &[])?;
    single(asm)
}

fn switch() -> Result<Program> {
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[])?;
    asm.emit(Opcode::LoadSPri, &[12])?;
    asm.emit_branch(Opcode::Switch, "table")?;
    asm.define_label("one")?;
    asm.emit(Opcode::ConstPri, &[10])?;
    asm.emit(Opcode::Retn, &[])?;
    asm.define_label("two")?;
    asm.emit(Opcode::ConstPri, &[20])?;
    asm.emit(Opcode::Retn, &[])?;
    asm.define_label("other")?;
    asm.emit(Opcode::ZeroPri, &[])?;
    asm.emit(Opcode::Retn, &[])?;
    asm.define_label("table")?;
    asm.emit_case_table("other", &[(1, "one"), (2, "two"), (3, "two")])?;
    single(asm)
}

#[test]
fn test_every_block_placed_once() -> Result<()> {
    assert_placement(&if_else()?)?;
    assert_placement(&countdown()?)?;
    assert_placement(&nested_loops_with_exit()?)?;
    assert_placement(&switch()?)?;
    Ok(())
}

#[test]
fn test_structuring_requires_full_pipeline() -> Result<()> {
    let program = if_else()?;
    let mut graph = graph_until(&program, 0, Stage::Renamed)?;
    match StructureBuilder::run(&mut graph) {
        Err(Error::PassOrder { expected, found }) => {
            assert_eq!(expected, Stage::DeclarationsCoalesced);
            assert_eq!(found, Stage::Structured);
        }
        other => panic!("expected a pass order error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_typing_rejected_after_heap_analysis() -> Result<()> {
    let program = if_else()?;
    let function = &program.functions()[0];
    let ctx = PassContext::new(&program, function);
    let mut graph = graph_until(&program, 0, Stage::HeapAnalyzed)?;

    let forward = ForwardTypePass::new(Stage::TypesRefined);
    assert!(matches!(
        forward.apply(&mut graph, &ctx),
        Err(Error::PassOrder { .. })
    ));
    let backward = BackwardTypePass::new(Stage::Typed);
    assert!(matches!(
        backward.apply(&mut graph, &ctx),
        Err(Error::PassOrder { .. })
    ));
    assert_eq!(graph.stage(), Stage::HeapAnalyzed);
    Ok(())
}

#[test]
fn test_dead_code_elimination_is_idempotent() -> Result<()> {
    // The argument load is dead: return 3
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[])?;
    asm.emit(Opcode::LoadSPri, &[12])?;
    asm.emit(Opcode::AddC, &[1])?;
    asm.emit(Opcode::ConstPri, &[3])?;
    asm.emit(Opcode::Retn, &[])?;
    let program = single(asm)?;
    let function = &program.functions()[0];
    let ctx = PassContext::new(&program, function);

    for stage in [Stage::Cleaned, Stage::Pruned] {
        let mut graph = graph_until(&program, 0, stage)?;
        let before = graph.len();
        let dce = DeadCodeEliminationPass::new(stage);
        assert!(!dce.run(&mut graph, &ctx)?);
        assert_eq!(graph.len(), before);
        graph.verify()?;
    }
    Ok(())
}

#[test]
fn test_types_only_move_up() -> Result<()> {
    // Float:f(Float:a, b) { return a + b; }
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[])?;
    asm.emit(Opcode::LoadSPri, &[12])?;
    asm.emit(Opcode::LoadSAlt, &[16])?;
    asm.emit(Opcode::FloatAdd, &[])?;
    asm.emit(Opcode::Retn, &[])?;
    let program = single(asm)?;
    let function = &program.functions()[0];
    let ctx = PassContext::new(&program, function);

    let mut graph = graph_until(&program, 0, Stage::TypesRefined)?;
    let before: Vec<(smxscope::analysis::NodeRef, Type)> =
        graph.iter().map(|(r, n)| (r, n.ty().clone())).collect();

    ForwardTypePass::new(Stage::TypesRefined).apply(&mut graph, &ctx)?;
    BackwardTypePass::new(Stage::TypesRefined).apply(&mut graph, &ctx)?;

    for (node, old) in before {
        let new = graph[node].ty();
        assert!(old.is_at_most(new), "{node}: {old} became {new}");
    }
    let ret = graph.control(0).ok_or(Error::Error("no control".into()))?;
    let sum = graph[ret].operand(0).ok_or(Error::Error("no value".into()))?;
    assert_eq!(graph[sum].ty(), &Type::Float);
    Ok(())
}

#[test]
fn test_missing_arguments_are_synthesized() -> Result<()> {
    // Declares one argument but reads three
    let mut asm = Assembler::new();
    asm.emit(Opcode::Proc, &[])?;
    asm.emit(Opcode::LoadSPri, &[20])?;
    asm.emit(Opcode::Retn, &[])?;

    let mut function = Function::new("f", 0, u32::MAX);
    function.args = vec![Argument::new(VariableKind::Scalar, "first")];
    let program = Program::builder()
        .code(asm.finalize()?)
        .function_with(function)
        .build();

    let mut decompiler = Decompiler::new(program);
    assert!(decompiler.preprocess().is_empty());
    let args = &decompiler.program().functions()[0].args;
    let names: Vec<&str> = args.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["first", "_arg1", "_arg2"]);
    assert!(args[1..].iter().all(|a| a.synthesized));
    Ok(())
}

#[test]
fn test_failure_is_isolated() -> Result<()> {
    let mut first = Assembler::new();
    first.emit(Opcode::Proc, &[])?;
    first.emit(Opcode::ZeroPri, &[])?;
    first.emit(Opcode::Retn, &[])?;
    let mut third = Assembler::new();
    third.emit(Opcode::Proc, &[])?;
    third.emit(Opcode::ConstPri, &[7])?;
    third.emit(Opcode::Retn, &[])?;

    let mut code = first.finalize()?;
    let broken = code.len() as u32;
    code.extend_from_slice(&0x7fff_0000_i32.to_le_bytes());
    let last = code.len() as u32;
    code.extend(third.finalize()?);

    let program = Program::builder()
        .code(code)
        .function("first", 0)
        .function("broken", broken)
        .function("third", last)
        .build();
    let decompilation = Decompiler::new(program).run();

    let outputs = decompilation.functions();
    assert_eq!(outputs.len(), 3);
    assert!(!outputs[0].is_failed());
    assert!(outputs[1].is_failed());
    assert!(!outputs[2].is_failed());
    assert_eq!(decompilation.failed_count(), 1);
    assert_eq!(decompilation.preprocess_failures().len(), 1);
    assert_eq!(decompilation.preprocess_failures()[0].index, 1);
    Ok(())
}

#[test]
fn test_absurd_frame_offset_fails_alone() -> Result<()> {
    let mut first = Assembler::new();
    first.emit(Opcode::Proc, &[])?;
    first.emit(Opcode::ZeroPri, &[])?;
    first.emit(Opcode::Retn, &[])?;
    let mut broken = Assembler::new();
    broken.emit(Opcode::Proc, &[])?;
    broken.emit(Opcode::LoadSPri, &[0x7fff_fff0])?;
    broken.emit(Opcode::Retn, &[])?;
    let mut third = Assembler::new();
    third.emit(Opcode::Proc, &[])?;
    third.emit(Opcode::ConstPri, &[7])?;
    third.emit(Opcode::Retn, &[])?;

    let mut code = first.finalize()?;
    let middle = code.len() as u32;
    code.extend(broken.finalize()?);
    let last = code.len() as u32;
    code.extend(third.finalize()?);

    let program = Program::builder()
        .code(code)
        .function("first", 0)
        .function("broken", middle)
        .function("third", last)
        .build();
    let mut decompiler = Decompiler::new(program);
    let decompilation = decompiler.run();

    assert!(decompiler.program().functions()[1].args.is_empty());
    let failures = decompilation.preprocess_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].error, Error::Malformed { .. }));
    let outputs = decompilation.functions();
    assert!(!outputs[0].is_failed());
    assert!(outputs[1].is_failed());
    assert!(!outputs[2].is_failed());
    Ok(())
}
