//! Guard elimination and guard lowering.

use std::collections::HashMap;

use crate::{
    compiler::{
        config::GuardElimination, context::CompilationContext, events::EventKind, phase::Phase,
    },
    ir::{DeoptimizationAction, DeoptimizationReason, Graph, Node, NodeClass, NodeId, NodeKind},
    schedule::{BlockId, ControlFlowGraph, DominatorTree},
    Result,
};

/// Removes fixed guards that repeat an earlier guard on the same condition.
///
/// With `eliminate-redundant-guards=on` the earlier guard must be in the same
/// block; with `aggressive` it may be in any dominating block. Usages of a
/// removed guard move to the guard that made it redundant.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardEliminationPhase;

impl GuardEliminationPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for GuardEliminationPhase {
    fn name(&self) -> &'static str {
        "guard-elimination"
    }

    fn should_run(&self, graph: &Graph, ctx: &CompilationContext) -> bool {
        ctx.config.guard_elimination != GuardElimination::Off
            && graph.nodes_of(NodeClass::FixedGuard).nth(1).is_some()
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        let aggressive = ctx.config.guard_elimination == GuardElimination::Aggressive;
        let cfg = ControlFlowGraph::build(graph)?;
        let dominators = DominatorTree::compute(&cfg);

        // Guards already seen, per (condition, negated), with their blocks.
        let mut seen: HashMap<(NodeId, bool), Vec<(NodeId, BlockId)>> = HashMap::new();
        let mut redundant: Vec<(NodeId, NodeId)> = Vec::new();
        for block in cfg.blocks() {
            for &node in block.nodes() {
                let NodeKind::FixedGuard { negated, .. } = *graph.kind(node) else {
                    continue;
                };
                let Some(condition) = graph[node].input(0) else {
                    continue;
                };
                let earlier = seen.entry((condition, negated)).or_default();
                let covering = earlier.iter().find(|&&(_, b)| {
                    b == block.id() || (aggressive && dominators.dominates(b, block.id()))
                });
                match covering {
                    Some(&(guard, _)) => redundant.push((node, guard)),
                    None => earlier.push((node, block.id())),
                }
            }
        }

        for &(node, guard) in &redundant {
            graph.replace_at_usages(node, guard)?;
            graph.remove_fixed(node)?;
            ctx.events
                .record(EventKind::GuardEliminated)
                .method(graph.method())
                .node(node)
                .message(format!("covered by {guard}"));
        }
        Ok(!redundant.is_empty())
    }

    fn description(&self) -> &'static str {
        "Removes guards repeated in the same or a dominating block"
    }
}

/// Turns every `FixedGuard` and floating `Guard` into explicit control flow:
///
/// ```text
///   pred                      pred
///    |                         |
///  FixedGuard(c)     =>       If(c)
///    |                       /     \
///   next                  Begin   Begin
///                           |       |
///                          next  Deoptimize
/// ```
///
/// For negated guards the branches are swapped. A floating guard is
/// materialized right after its anchor. Usages move to the passing `Begin`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardLoweringPhase;

impl GuardLoweringPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for GuardLoweringPhase {
    fn name(&self) -> &'static str {
        "guard-lowering"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        super::ensure_lowered(graph)?;
        let guards: Vec<NodeId> = graph
            .nodes()
            .filter(|&id| {
                matches!(
                    graph.kind(id),
                    NodeKind::FixedGuard { .. } | NodeKind::Guard { .. }
                )
            })
            .collect();

        for &guard in &guards {
            let (action, reason, negated) = match *graph.kind(guard) {
                NodeKind::FixedGuard {
                    action,
                    reason,
                    negated,
                }
                | NodeKind::Guard {
                    action,
                    reason,
                    negated,
                } => (action, reason, negated),
                _ => continue,
            };
            let Some(condition) = graph[guard].input(0) else {
                return Err(internal_fault!(node = guard, "guard without condition"));
            };

            // The fixed node and successor slot the branch is attached to.
            let (after, slot, next) = if graph.kind(guard).is_fixed() {
                let predecessor = graph[guard]
                    .predecessor()
                    .ok_or_else(|| internal_fault!(node = guard, "guard without predecessor"))?;
                let next = graph[guard].next();
                graph.set_successor(guard, 0, None)?;
                let slot = graph.successor_slot(predecessor, guard)?;
                graph.set_successor(predecessor, slot, None)?;
                (predecessor, slot, next)
            } else {
                let anchor = graph[guard]
                    .input(1)
                    .ok_or_else(|| internal_fault!(node = guard, "guard without anchor"))?;
                let next = graph[anchor].next();
                graph.set_successor(anchor, 0, None)?;
                (anchor, 0, next)
            };

            let branch = lower(graph, condition, action, reason, negated)?;
            graph.set_successor(after, slot, Some(branch.split))?;
            if let Some(next) = next {
                graph.set_next(branch.pass, next)?;
            }

            graph.replace_at_usages(guard, branch.pass)?;
            graph.clear_inputs(guard)?;
            graph.delete(guard)?;
            ctx.events
                .record(EventKind::GuardLowered)
                .method(graph.method())
                .node(guard)
                .message(reason.to_string());
        }
        Ok(!guards.is_empty())
    }

    fn description(&self) -> &'static str {
        "Lowers guards to branches into deoptimization"
    }
}

struct LoweredGuard {
    split: NodeId,
    pass: NodeId,
}

fn lower(
    graph: &mut Graph,
    condition: NodeId,
    action: DeoptimizationAction,
    reason: DeoptimizationReason,
    negated: bool,
) -> Result<LoweredGuard> {
    let split = graph.add(Node::new(NodeKind::If, vec![condition]))?;
    let pass = graph.add(Node::new(NodeKind::Begin, Vec::new()))?;
    let fail = graph.add(Node::new(NodeKind::Begin, Vec::new()))?;
    let deopt = graph.add(Node::new(NodeKind::Deoptimize { action, reason }, Vec::new()))?;
    graph.set_next(fail, deopt)?;
    let (on_true, on_false) = if negated { (fail, pass) } else { (pass, fail) };
    graph.set_successor(split, 0, Some(on_true))?;
    graph.set_successor(split, 1, Some(on_false))?;
    Ok(LoweredGuard { split, pass })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{CompilerConfig, TargetDescription},
        ir::{Condition, GraphBuilder, ValueKind},
    };

    fn context(mode: GuardElimination) -> CompilationContext {
        CompilationContext::new(
            CompilerConfig::default().with_guard_elimination(mode),
            TargetDescription::amd64(),
        )
    }

    /// Null check on `p` at entry, in both branches, and again after the merge.
    fn checks() -> Result<(Graph, [NodeId; 4])> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Object)?;
        let q = b.parameter(1, ValueKind::Int)?;
        let zero = b.int(0)?;
        let null = b.is_null(p)?;
        let first = b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        let cond = b.compare(Condition::Eq, q, zero)?;
        let (t, f) = b.branch(cond)?;
        b.switch_to(t);
        let left = b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        let l_end = b.end()?;
        b.switch_to(f);
        let r_end = b.end()?;
        b.merge(&[l_end, r_end])?;
        let after = b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        let again = b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        b.ret(None)?;
        Ok((b.finish(), [first, left, after, again]))
    }

    #[test]
    fn test_same_block_only() -> Result<()> {
        let (mut graph, [first, left, after, again]) = checks()?;
        let ctx = context(GuardElimination::On);
        assert!(GuardEliminationPhase.run(&mut graph, &ctx)?);
        assert!(graph.is_alive(first) && graph.is_alive(left) && graph.is_alive(after));
        assert!(!graph.is_alive(again));
        graph.verify()
    }

    #[test]
    fn test_aggressive_uses_dominance() -> Result<()> {
        let (mut graph, [first, left, after, again]) = checks()?;
        let ctx = context(GuardElimination::Aggressive);
        assert!(GuardEliminationPhase.run(&mut graph, &ctx)?);
        assert!(graph.is_alive(first));
        for guard in [left, after, again] {
            assert!(!graph.is_alive(guard), "{guard}");
        }
        assert_eq!(ctx.events.count_kind(EventKind::GuardEliminated), 3);
        graph.verify()
    }

    #[test]
    fn test_disabled() -> Result<()> {
        let (graph, _) = checks()?;
        assert!(!GuardEliminationPhase.should_run(&graph, &context(GuardElimination::Off)));
        Ok(())
    }

    #[test]
    fn test_lowering_leaves_no_guards() -> Result<()> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Object)?;
        let null = b.is_null(p)?;
        let guard = b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        let ret = b.ret(None)?;
        let mut graph = b.finish();

        let ctx = context(GuardElimination::On);
        assert!(GuardLoweringPhase.run(&mut graph, &ctx)?);
        assert!(!graph.is_alive(guard));
        assert_eq!(graph.nodes_of(NodeClass::FixedGuard).count(), 0);

        let split = graph[graph.start()]
            .next()
            .ok_or_else(|| internal_fault!("start has no next"))?;
        assert_eq!(graph.kind(split), &NodeKind::If);
        // Negated: the true branch deoptimizes, the false branch continues.
        let on_true = graph[split].successors()[0].ok_or_else(|| internal_fault!("no true"))?;
        let on_false = graph[split].successors()[1].ok_or_else(|| internal_fault!("no false"))?;
        assert!(matches!(
            graph[on_true].next().map(|n| graph.kind(n)),
            Some(NodeKind::Deoptimize { .. })
        ));
        assert_eq!(graph[on_false].next(), Some(ret));
        assert_eq!(ctx.events.count_kind(EventKind::GuardLowered), 1);
        graph.verify()
    }

    #[test]
    fn test_floating_guard_lowered_at_anchor() -> Result<()> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let positive = b.compare(Condition::Gt, p, zero)?;
        let ret = b.ret(Some(p))?;
        let mut graph = b.finish();
        let start = graph.start();
        graph.add(Node::new(
            NodeKind::Guard {
                action: DeoptimizationAction::InvalidateReprofile,
                reason: DeoptimizationReason::RuntimeConstraint,
                negated: false,
            },
            vec![positive, start],
        ))?;

        GuardLoweringPhase.run(&mut graph, &context(GuardElimination::On))?;
        assert_eq!(graph.nodes_of(NodeClass::Guard).count(), 0);
        let split = graph[start].next().ok_or_else(|| internal_fault!("no next"))?;
        assert_eq!(graph[split].inputs(), &[positive]);
        let on_true = graph[split].successors()[0].ok_or_else(|| internal_fault!("no true"))?;
        assert_eq!(graph[on_true].next(), Some(ret));
        graph.verify()
    }
}
