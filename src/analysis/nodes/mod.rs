//! The node graph: an SSA-like IR over the recovered blocks.
//!
//! - [`NodeGraph`] - arena of nodes with per-block order and use lists
//! - [`NodeBuilder`] - abstract interpretation of the bytecode into nodes
//! - [`Node`], [`NodeKind`], [`NodeRef`] - the IR itself

mod builder;
mod graph;
mod node;

pub use builder::NodeBuilder;
pub use graph::NodeGraph;
pub use node::{BinaryOp, Literal, Node, NodeFlags, NodeKind, NodeRef, UnaryOp};
