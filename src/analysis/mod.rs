//! Program analysis infrastructure for compiled functions.
//!
//! This module recovers the structure the compiler flattened away. It builds upon the
//! generic graph infrastructure in [`crate::utils::graph`] to provide the domain-specific
//! representations the rewrite pipeline in [`crate::compiler`] works on.
//!
//! # Architecture
//!
//! The analysis module is organized into focused sub-modules:
//!
//! - [`cfg`] - Control flow graph recovery, dominators and natural loops
//! - [`nodes`] - The node graph: an SSA-like IR built by abstract interpretation
//! - [`types`] - The type lattice and the forward and backward propagation passes
//!
//! # Usage
//!
//! ```rust
//! use smxscope::{analysis::NodeBuilder, assembly::Assembler, disassembler::Opcode, Program};
//!
//! let mut asm = Assembler::new();
//! asm.emit(Opcode::Proc, &[])?;
//! asm.emit(Opcode::LoadSPri, &[12])?;
//! asm.emit(Opcode::Retn, &[])?;
//! let program = Program::builder().code(asm.finalize()?).function("id", 0).build();
//!
//! let graph = NodeBuilder::new(&program, &program.functions()[0]).build()?;
//! assert_eq!(graph.cfg().block_count(), 1);
//! graph.verify()?;
//! # Ok::<(), smxscope::Error>(())
//! ```

pub mod cfg;
pub mod nodes;
pub mod types;

// Re-export primary types at module level
pub use cfg::{CfgEdgeKind, ControlFlowGraph, NaturalLoop};
pub use nodes::{
    BinaryOp, Literal, Node, NodeBuilder, NodeFlags, NodeGraph, NodeKind, NodeRef, UnaryOp,
};
pub use types::{BackwardTypePass, ForwardTypePass, Type};

#[cfg(test)]
mod tests {
    use crate::{
        analysis::{CfgEdgeKind, ControlFlowGraph},
        assembly::Assembler,
        disassembler::Opcode,
        utils::graph::NodeId,
    };

    fn build_cfg(asm: Assembler) -> ControlFlowGraph {
        let code = asm.finalize().unwrap();
        ControlFlowGraph::build(&code, 0).unwrap()
    }

    #[test]
    fn test_sequential_function() {
        // return arg0 + arg1
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[16]).unwrap();
        asm.emit(Opcode::Add, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let cfg = build_cfg(asm);

        assert_eq!(cfg.block_count(), 1);
        assert!(cfg.loops().is_empty());
        assert_eq!(cfg.entry(), NodeId::new(0));
        assert_eq!(cfg.exits(), &[NodeId::new(0)]);
        assert_eq!(cfg.argument_count().unwrap(), 2);
    }

    #[test]
    fn test_if_else_diamond() {
        // if (arg0) pri = 1 else pri = 2; return pri
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit_branch(Opcode::Jzer, "else").unwrap();
        asm.emit(Opcode::ConstPri, &[1]).unwrap();
        asm.emit_branch(Opcode::Jump, "join").unwrap();
        asm.define_label("else").unwrap();
        asm.emit(Opcode::ConstPri, &[2]).unwrap();
        asm.define_label("join").unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();

        let cfg = build_cfg(asm);

        assert_eq!(cfg.block_count(), 4);
        let kinds: Vec<CfgEdgeKind> = cfg.outgoing_edges(cfg.entry()).map(|(_, k)| k).collect();
        assert!(kinds.iter().all(|k| k.is_conditional()));
        assert_eq!(cfg.exits().len(), 1);
        let join = cfg.exits()[0];
        assert!(cfg.dominates(cfg.entry(), join));
    }
}
