//! Control flow graph recovery.
//!
//! - [`ControlFlowGraph`] - blocks in reverse postorder with typed edges, dominators and loops
//! - [`CfgEdgeKind`] - edge classification
//! - [`NaturalLoop`] - loop forest entries

mod edge;
mod graph;

pub use edge::CfgEdgeKind;
pub use graph::{ControlFlowGraph, NaturalLoop, FIRST_ARG_OFFSET, MAX_ARGUMENTS};
