//! The phase trait implemented by every graph transformation of the pipeline.

use crate::{compiler::context::CompilationContext, ir::Graph, Result};

/// A named transformation of a graph.
///
/// Phases must be thread-safe (`Send + Sync`): one set of suites is shared by
/// all compilations of a session, each running on its own worker. A phase
/// therefore keeps no per-compilation state in `self`; anything it needs comes
/// from the graph or the [`CompilationContext`].
///
/// # Pipeline Integration
///
/// Phases are grouped into [`PhaseSuite`](crate::compiler::PhaseSuite)s, one per
/// [`Tier`](crate::compiler::Tier). The suite runs its phases in order, checks
/// the node budget after each of them and attaches the phase name to errors. The
/// graph is verified at every tier boundary.
pub trait Phase: Send + Sync {
    /// Unique name, used to look phases up in a suite and in diagnostics.
    fn name(&self) -> &'static str;

    /// Should this phase run on this graph?
    ///
    /// Called before [`Phase::run`]. Override to skip phases that are disabled
    /// by configuration.
    fn should_run(&self, _graph: &Graph, _ctx: &CompilationContext) -> bool {
        true
    }

    /// Transforms the graph in place.
    ///
    /// Returns `true` if the graph changed. Events should be recorded directly
    /// to `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns a bailout for unsupported constructs and an internal fault for
    /// graphs that violate the phase's preconditions.
    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool>;

    /// Short description of what this phase does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
