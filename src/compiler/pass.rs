//! Pass trait for the node pipeline.

use crate::{
    analysis::NodeGraph,
    compiler::Stage,
    program::{Function, Program},
    Result,
};

/// Read-only environment shared by the passes of one function.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    /// The program, for globals, natives, callee signatures and the data segment
    pub program: &'a Program,
    /// The function being decompiled, after preprocessing
    pub function: &'a Function,
}

impl<'a> PassContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(program: &'a Program, function: &'a Function) -> Self {
        PassContext { program, function }
    }
}

/// A rewrite of the node graph.
///
/// All passes must be thread-safe (Send + Sync) so one instance can serve functions
/// processed in parallel. A pass mutates the graph in place and is idempotent: running it
/// again without intervening changes reports no change.
///
/// # Pipeline Integration
///
/// Passes do not order themselves. [`NodePass::stage`] names the stage the graph is in
/// after the pass, and [`NodePass::apply`] advances the graph to it before running, which
/// fails with [`crate::Error::PassOrder`] when the pass is out of order.
pub trait NodePass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// The stage this pass completes.
    fn stage(&self) -> Stage;

    /// Runs the pass; returns `true` if the graph changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is structurally inconsistent.
    fn run(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<bool>;

    /// Advances the graph to [`NodePass::stage`], then runs the pass.
    ///
    /// # Errors
    ///
    /// [`crate::Error::PassOrder`] if the graph is not at the preceding stage, or any error
    /// of [`NodePass::run`].
    fn apply(&self, graph: &mut NodeGraph, ctx: &PassContext<'_>) -> Result<bool> {
        graph.advance(self.stage())?;
        self.run(graph, ctx)
    }

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
