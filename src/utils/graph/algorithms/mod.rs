//! Generic graph algorithms over the [`crate::graph`] traits.

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, compute_dominators_rooted, DominatorTree};
pub use traversal::{postorder, reverse_postorder};
