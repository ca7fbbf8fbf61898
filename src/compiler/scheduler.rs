//! Pass scheduler for orchestrating the node pipeline.
//!
//! The `PassScheduler` owns the fixed pass sequence from a freshly built graph up to the
//! point where control flow is structured. Unlike an optimizer it never iterates to a
//! fixpoint: every pass runs once, except type propagation which runs a configured number
//! of rounds.

use log::{debug, trace};

use crate::{
    analysis::{BackwardTypePass, ForwardTypePass, NodeGraph},
    compiler::{
        pass::{NodePass, PassContext},
        passes::{
            ArrayCollapsePass, DeadCodeEliminationPass, DeclarationCoalescingPass,
            GuardRemovalPass, HeapAnalysisPass, LoadStoreCoalescingPass, MemCopyPass, RenamePass,
            RewritePass,
        },
        Stage,
    },
    Result,
};

/// Orchestrates the node passes of one function.
///
/// The sequence is:
///
/// 1. **Cleanup**: dead code elimination, rewriting, syntactic array collapse
/// 2. **Typing**: `type_rounds` forward and backward rounds, type-directed array collapse,
///    one refining round
/// 3. **Idioms**: compound assignments, initializers, heap temporaries, bounds guards
/// 4. **Naming**: a second dead code elimination, renaming, declaration coalescing
///
/// One scheduler serves any number of functions, including from several threads at once.
pub struct PassScheduler {
    /// Number of forward and backward rounds before the type-directed array collapse.
    type_rounds: usize,
    /// The pass sequence, in execution order.
    passes: Vec<Box<dyn NodePass>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(2)
    }
}

impl PassScheduler {
    /// Creates the standard pipeline.
    ///
    /// # Arguments
    ///
    /// * `type_rounds` - Forward and backward rounds run before the type-directed array
    ///   collapse. At least one round always runs.
    ///
    /// # Returns
    ///
    /// A new `PassScheduler`.
    #[must_use]
    pub fn new(type_rounds: usize) -> Self {
        let type_rounds = type_rounds.max(1);
        let mut passes: Vec<Box<dyn NodePass>> = vec![
            Box::new(DeadCodeEliminationPass::new(Stage::Cleaned)),
            Box::new(RewritePass::new()),
            Box::new(ArrayCollapsePass::syntactic()),
        ];
        for _ in 0..type_rounds {
            passes.push(Box::new(ForwardTypePass::new(Stage::Typed)));
            passes.push(Box::new(BackwardTypePass::new(Stage::Typed)));
        }
        passes.push(Box::new(ArrayCollapsePass::typed()));
        passes.push(Box::new(ForwardTypePass::new(Stage::TypesRefined)));
        passes.push(Box::new(BackwardTypePass::new(Stage::TypesRefined)));
        passes.push(Box::new(LoadStoreCoalescingPass::new()));
        passes.push(Box::new(MemCopyPass::new()));
        passes.push(Box::new(HeapAnalysisPass::new()));
        passes.push(Box::new(GuardRemovalPass::new()));
        passes.push(Box::new(DeadCodeEliminationPass::new(Stage::Pruned)));
        passes.push(Box::new(RenamePass::new()));
        passes.push(Box::new(DeclarationCoalescingPass::new()));

        Self {
            type_rounds,
            passes,
        }
    }

    /// Number of initial type propagation rounds.
    #[must_use]
    pub fn type_rounds(&self) -> usize {
        self.type_rounds
    }

    /// The passes in execution order.
    #[must_use]
    pub fn passes(&self) -> &[Box<dyn NodePass>] {
        &self.passes
    }

    /// Runs the whole sequence.
    ///
    /// # Arguments
    ///
    /// * `graph` - A graph fresh from the builder.
    /// * `ctx` - Program and function the graph belongs to.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a pass, including [`crate::Error::PassOrder`] if
    /// the graph is not at [`Stage::Built`].
    pub fn run(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<()> {
        self.run_until(graph, ctx, Stage::DeclarationsCoalesced)
    }

    /// Runs the passes completing stages up to and including `last`.
    ///
    /// Passes for stages the graph has already left are skipped, so a partially processed
    /// graph can be resumed.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a pass.
    pub fn run_until(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>, last: Stage) -> Result<()> {
        for pass in &self.passes {
            let stage = pass.stage();
            if stage > last {
                break;
            }
            if stage < graph.stage() {
                continue;
            }
            let changed = pass.apply(graph, ctx)?;
            debug!(
                "{}: pass {} (stage {}) changed={}",
                ctx.function.name,
                pass.name(),
                stage,
                changed
            );
        }
        trace!("{}: {} nodes after {}", ctx.function.name, graph.len(), last);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_sequence() {
        let scheduler = PassScheduler::new(2);
        let stages: Vec<Stage> = scheduler.passes().iter().map(|p| p.stage()).collect();
        assert_eq!(stages.first(), Some(&Stage::Cleaned));
        assert_eq!(stages.last(), Some(&Stage::DeclarationsCoalesced));
        assert_eq!(stages.iter().filter(|&&s| s == Stage::Typed).count(), 4);
        assert_eq!(
            stages.iter().filter(|&&s| s == Stage::TypesRefined).count(),
            2
        );
        assert!(stages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_at_least_one_round() {
        assert_eq!(PassScheduler::new(0).type_rounds(), 1);
        assert_eq!(PassScheduler::default().type_rounds(), 2);
    }
}
