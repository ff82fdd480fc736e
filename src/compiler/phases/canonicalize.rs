//! Canonicalization as a pipeline phase.

use crate::{
    canonical::{Canonicalizer, CanonicalizerTable},
    compiler::{context::CompilationContext, phase::Phase},
    ir::Graph,
    Result,
};

/// Runs the canonicalizer over the whole graph.
///
/// The step limit comes from the configuration; rewrites are recorded to the
/// context's event log.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalizePhase;

impl CanonicalizePhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for CanonicalizePhase {
    fn name(&self) -> &'static str {
        "canonicalize"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        let stats = Canonicalizer::new(CanonicalizerTable::default())
            .with_step_limit(ctx.config.canonicalizer_step_limit)
            .with_events(&ctx.events)
            .canonicalize(graph)?;
        Ok(stats.changed())
    }

    fn description(&self) -> &'static str {
        "Constant folding, algebraic simplification and control-flow cleanup"
    }
}
