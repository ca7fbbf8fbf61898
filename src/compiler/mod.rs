//! The per-function rewrite pipeline.
//!
//! This module sits between the node graph construction in [`crate::analysis`] and control
//! flow structuring in [`crate::structure`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Node Pipeline                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Built                    NodeBuilder output                     │
//! │  Cleaned                  dead phis removed                      │
//! │  Rewritten                slots become locals, branches normalized│
//! │  ArraysCollapsed          element accesses (syntactic)           │
//! │  Typed                    forward + backward rounds              │
//! │  ArraysRetyped            element accesses (type-directed)       │
//! │  TypesRefined             one more forward + backward round      │
//! │  LoadStoresCoalesced      x = x op v  =>  x op= v                │
//! │  MemCopiesRecognized      string and array initializers          │
//! │  HeapAnalyzed             heap temporaries resolved (final types)│
//! │  GuardsRemoved            bounds checks dropped                  │
//! │  Pruned                   second dead code elimination           │
//! │  Renamed                  final names                            │
//! │  DeclarationsCoalesced    new x; x = v  =>  new x = v            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every [`NodePass`] names the [`Stage`] it completes. The [`PassScheduler`] runs the fixed
//! sequence and [`crate::analysis::NodeGraph::advance`] rejects anything out of order, so
//! for instance type propagation after heap analysis fails with
//! [`crate::Error::PassOrder`].

mod pass;
mod passes;
mod scheduler;

use strum::Display;

pub use pass::{NodePass, PassContext};
pub use passes::{
    ArrayCollapsePass, DeadCodeEliminationPass, DeclarationCoalescingPass, GuardRemovalPass,
    HeapAnalysisPass, LoadStoreCoalescingPass, MemCopyPass, RenamePass, RewritePass,
};
pub use scheduler::PassScheduler;

/// Pipeline stage a node graph has reached.
///
/// The stages are totally ordered; a graph only ever moves to the directly following stage,
/// or stays in [`Stage::Typed`] or [`Stage::TypesRefined`] for repeated propagation rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Stage {
    /// Fresh from the builder
    Built,
    /// Unreferenced phis removed
    Cleaned,
    /// Stack slots, call arguments and branch conditions rewritten
    Rewritten,
    /// Syntactic array element accesses recognized
    ArraysCollapsed,
    /// Initial type propagation rounds
    Typed,
    /// Type-directed array element accesses recognized
    ArraysRetyped,
    /// Final type propagation round
    TypesRefined,
    /// Compound assignments recognized
    LoadStoresCoalesced,
    /// Aggregate initializers recognized
    MemCopiesRecognized,
    /// Heap temporaries classified; types are frozen from here on
    HeapAnalyzed,
    /// Bounds guards removed
    GuardsRemoved,
    /// Dead nodes exposed by guard removal eliminated
    Pruned,
    /// Final names assigned
    Renamed,
    /// Declarations merged with their first store
    DeclarationsCoalesced,
    /// Control flow structured
    Structured,
}

impl Stage {
    /// The stage directly following this one.
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        use Stage::*;
        Some(match self {
            Built => Cleaned,
            Cleaned => Rewritten,
            Rewritten => ArraysCollapsed,
            ArraysCollapsed => Typed,
            Typed => ArraysRetyped,
            ArraysRetyped => TypesRefined,
            TypesRefined => LoadStoresCoalesced,
            LoadStoresCoalesced => MemCopiesRecognized,
            MemCopiesRecognized => HeapAnalyzed,
            HeapAnalyzed => GuardsRemoved,
            GuardsRemoved => Pruned,
            Pruned => Renamed,
            Renamed => DeclarationsCoalesced,
            DeclarationsCoalesced => Structured,
            Structured => return None,
        })
    }

    /// Returns `true` for stages a pass may re-enter.
    #[must_use]
    pub fn is_repeatable(self) -> bool {
        matches!(self, Stage::Typed | Stage::TypesRefined)
    }

    /// Returns `true` while type propagation is still legal.
    #[must_use]
    pub fn allows_typing(self) -> bool {
        self < Stage::HeapAnalyzed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_order() {
        let mut stage = Stage::Built;
        let mut count = 1;
        while let Some(next) = stage.next() {
            assert!(next > stage);
            stage = next;
            count += 1;
        }
        assert_eq!(stage, Stage::Structured);
        assert_eq!(count, 15);
    }

    #[test]
    fn test_typing_window() {
        assert!(Stage::TypesRefined.allows_typing());
        assert!(!Stage::HeapAnalyzed.allows_typing());
        assert!(Stage::Typed.is_repeatable());
        assert!(!Stage::Renamed.is_repeatable());
        assert_eq!(Stage::Typed.to_string(), "Typed");
    }
}
