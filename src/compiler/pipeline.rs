//! The `compile` entry point: tiers, boundary verification and scheduling.

use std::time::Instant;

use log::{debug, warn};
use strum::IntoEnumIterator;

use crate::{
    compiler::{
        context::CompilationContext,
        events::EventKind,
        suite::{Suites, Tier},
    },
    ir::Graph,
    schedule::{schedule, Schedule},
    Result,
};

/// A lowered graph together with its block schedule.
///
/// This is what a code generator consumes: blocks in reverse postorder, each
/// with a total order of its nodes.
#[derive(Debug)]
pub struct ScheduledGraph {
    /// The lowered graph.
    pub graph: Graph,
    /// Block assignment and per-block order of every node in `graph`.
    pub schedule: Schedule,
}

/// Runs the high, mid and low tier suites on `graph`, then schedules it.
///
/// The graph is verified after every tier; a violation is reported as an
/// internal fault whose phase is `"<tier> tier boundary"`. The schedule is
/// computed with the configured policy and validated before it is returned.
///
/// `compile` takes the graph by value: a failed compilation never hands a
/// partially transformed graph back to the caller.
///
/// # Errors
///
/// Returns the first phase error (bailouts included), a verification fault, or
/// a scheduling fault. Every error is also recorded as a
/// [`EventKind::Bailout`] event.
///
/// # Examples
///
/// ```rust
/// use tiergraph::compiler::{compile, CompilationContext, Suites};
/// use tiergraph::ir::{BinaryOp, GraphBuilder, ValueKind};
///
/// let mut b = GraphBuilder::new();
/// let x = b.parameter(0, ValueKind::Int)?;
/// let three = b.int(3)?;
/// let five = b.int(5)?;
/// let seven = b.binary(BinaryOp::Or, ValueKind::Int, three, five)?;
/// let sum = b.binary(BinaryOp::Add, ValueKind::Int, x, seven)?;
/// b.ret(Some(sum))?;
///
/// let ctx = CompilationContext::default();
/// let compiled = compile(b.finish(), &Suites::standard(), &ctx)?;
/// assert_eq!(compiled.schedule.block_count(), 1);
/// # Ok::<(), tiergraph::Error>(())
/// ```
pub fn compile(
    mut graph: Graph,
    suites: &Suites,
    ctx: &CompilationContext,
) -> Result<ScheduledGraph> {
    let started = Instant::now();
    match run_tiers(&mut graph, suites, ctx) {
        Ok(schedule) => {
            debug!(
                "[{}] compiled {} nodes into {} blocks in {:?}",
                ctx.id(),
                graph.node_count(),
                schedule.block_count(),
                started.elapsed()
            );
            Ok(ScheduledGraph { graph, schedule })
        }
        Err(error) => {
            warn!("[{}] compilation abandoned: {error}", ctx.id());
            ctx.events
                .record(EventKind::Bailout)
                .method(graph.method())
                .message(error.to_string());
            Err(error)
        }
    }
}

fn run_tiers(graph: &mut Graph, suites: &Suites, ctx: &CompilationContext) -> Result<Schedule> {
    for tier in Tier::iter() {
        suites.suite(tier).apply(graph, ctx, tier)?;
        graph
            .verify()
            .map_err(|e| e.in_phase(&format!("{tier} tier boundary")))?;
        ctx.events
            .record(EventKind::TierCompleted)
            .method(graph.method())
            .phase(tier.to_string())
            .message(format!("{} nodes", graph.node_count()));
    }

    let schedule = schedule(graph, ctx.config.schedule_policy)?;
    schedule.validate(graph)?;
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{phase::Phase, CompilerConfig, PhaseSuite, TargetDescription},
        ir::{
            BinaryOp, Condition, DeoptimizationReason, FieldRef, GraphBuilder, NodeClass,
            NodeKind, ValueKind,
        },
        Error,
    };

    #[test]
    fn test_compile_lowers_and_schedules() -> Result<()> {
        let length = FieldRef::new("Array", "length", 0, ValueKind::Int);
        let mut b = GraphBuilder::new();
        let array = b.parameter(0, ValueKind::Object)?;
        let index = b.parameter(1, ValueKind::Int)?;
        let null = b.is_null(array)?;
        b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        let size = b.load_field(length, array)?;
        let in_bounds = b.compare(Condition::Lt, index, size)?;
        b.fixed_guard(in_bounds, DeoptimizationReason::BoundsCheckException, false)?;
        let eight = b.int(8)?;
        let scaled = b.binary(BinaryOp::Mul, ValueKind::Int, index, eight)?;
        b.ret(Some(scaled))?;

        let ctx = CompilationContext::default();
        let compiled = compile(b.finish(), &Suites::standard(), &ctx)?;
        let graph = &compiled.graph;

        for class in [
            NodeClass::FixedGuard,
            NodeClass::Guard,
            NodeClass::LoadField,
            NodeClass::Read,
        ] {
            assert_eq!(graph.nodes_of(class).count(), 0, "{class}");
        }
        assert_eq!(graph.nodes_of(NodeClass::FloatingRead).count(), 1);
        assert!(graph.nodes().any(|id| matches!(
            graph.kind(id),
            NodeKind::Binary {
                op: BinaryOp::Shl,
                ..
            }
        )));
        // Entry block, two deoptimizing branches and two passing branches.
        assert_eq!(compiled.schedule.block_count(), 5);
        assert_eq!(ctx.events.count_kind(EventKind::TierCompleted), 3);
        compiled.schedule.validate(graph)
    }

    struct Corrupt;

    impl Phase for Corrupt {
        fn name(&self) -> &'static str {
            "corrupt"
        }

        fn run(&self, graph: &mut Graph, _ctx: &CompilationContext) -> Result<bool> {
            let start = graph.start();
            graph.add(crate::ir::Node::new(NodeKind::LoopExit, vec![start]))?;
            Ok(true)
        }
    }

    #[test]
    fn test_boundary_fault_names_tier() -> Result<()> {
        let mut b = GraphBuilder::new();
        b.ret(None)?;
        let mut suites = Suites::empty();
        suites.mid.append(Corrupt);

        let ctx = CompilationContext::default();
        let err = compile(b.finish(), &suites, &ctx).unwrap_err();
        match err {
            Error::InternalFault { ref phase, .. } => {
                assert_eq!(phase.as_deref(), Some("mid tier boundary"));
            }
            ref other => panic!("unexpected error {other}"),
        }
        assert_eq!(ctx.events.count_kind(EventKind::Bailout), 1);
        assert_eq!(ctx.events.count_kind(EventKind::TierCompleted), 1);
        Ok(())
    }

    #[test]
    fn test_budget_bailout_is_recoverable() -> Result<()> {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let y = b.unary(crate::ir::UnaryOp::Neg, ValueKind::Int, x)?;
        b.ret(Some(y))?;

        let mut high = PhaseSuite::new();
        high.append(crate::compiler::phases::CanonicalizePhase);
        let suites = Suites {
            high,
            ..Suites::empty()
        };
        let ctx = CompilationContext::new(
            CompilerConfig::default().with_node_budget(2),
            TargetDescription::amd64(),
        );
        let err = compile(b.finish(), &suites, &ctx).unwrap_err();
        assert!(err.is_bailout());
        Ok(())
    }
}
