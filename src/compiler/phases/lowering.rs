//! Lowering of high-level field accesses to memory operations.

use std::collections::HashSet;

use log::trace;

use crate::{
    compiler::{context::CompilationContext, events::EventKind, phase::Phase},
    ir::{
        Callee, Constant, DeoptimizationAction, DeoptimizationReason, Graph, Node, NodeId,
        NodeKind,
    },
    schedule::{BlockId, ControlFlowGraph, DominatorTree},
    Error, Result,
};

/// Turns `LoadField`/`StoreField` into `Read`/`Write` at
/// `header + index * word_size` of the target.
///
/// A lowered access whose base may be null and is not already checked gets
/// an implicit null check: a floating
/// `Guard(IsNull(base), negated, NullCheckException)` anchored at the begin of
/// the access's block. The guard becomes the access's last input, so anything
/// derived from the access stays below the check after guard lowering.
/// Bases that are allocations or non-null constants need no check. A base is
/// already checked when a negated null-check guard on it sits earlier in the
/// same block or in a dominating block.
///
/// Calls whose callee was never resolved are rejected with
/// [`Error::Unsupported`]. A `NeverPartOfCompilation` marker must have been
/// removed by partial evaluation; reaching this phase is an internal fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoweringPhase;

impl LoweringPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn unsupported(construct: impl Into<String>) -> Error {
    Error::Unsupported {
        construct: construct.into(),
        phase: "lowering".to_string(),
    }
}

impl Phase for LoweringPhase {
    fn name(&self) -> &'static str {
        "lowering"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        let nodes: Vec<NodeId> = graph.nodes().collect();
        let mut accesses = Vec::new();
        for id in nodes {
            let kind = match graph.kind(id) {
                NodeKind::LoadField { field } => NodeKind::Read {
                    field: field.clone(),
                    offset: ctx.target.field_offset(field.index),
                },
                NodeKind::StoreField { field } => NodeKind::Write {
                    field: field.clone(),
                    offset: ctx.target.field_offset(field.index),
                },
                NodeKind::NeverPartOfCompilation { message } => {
                    return Err(internal_fault!(
                        node = id,
                        "never part of compilation: {}",
                        message
                    )
                    .in_phase("lowering"));
                }
                NodeKind::CallTarget {
                    callee: Callee::Unresolved(name),
                    ..
                } => {
                    return Err(unsupported(format!("unresolved call to {name}")));
                }
                _ => continue,
            };
            trace!("{id}: {} -> {kind}", graph.kind(id));
            graph.set_kind(id, kind)?;
            ctx.events
                .record(EventKind::NodeLowered)
                .method(graph.method())
                .node(id);
            accesses.push(id);
        }

        if !accesses.is_empty() {
            insert_null_checks(graph, ctx, &accesses)?;
        }
        Ok(!accesses.is_empty())
    }

    fn description(&self) -> &'static str {
        "Lowers field accesses to reads and writes at target offsets"
    }
}

/// Guards every access in `accesses` whose base may be null.
///
/// Blocks are visited in reverse postorder so a guard inserted for one access
/// covers the accesses of every block it dominates.
fn insert_null_checks(
    graph: &mut Graph,
    ctx: &CompilationContext,
    accesses: &[NodeId],
) -> Result<()> {
    let cfg = ControlFlowGraph::build(graph)?;
    let dominators = DominatorTree::compute(&cfg);
    let pending: HashSet<NodeId> = accesses.iter().copied().collect();

    for block in cfg.blocks() {
        for (position, &access) in block.nodes().iter().enumerate() {
            if !pending.contains(&access) {
                continue;
            }
            let Some(base) = graph[access].input(0) else {
                return Err(internal_fault!(node = access, "memory access without base"));
            };
            if is_non_null(graph, base) {
                continue;
            }

            let at = (block.id(), position);
            match covering_check(graph, &cfg, &dominators, base, at) {
                Some(guard) if matches!(graph.kind(guard), NodeKind::FixedGuard { .. }) => {}
                Some(guard) => graph.push_input(access, guard)?,
                None => {
                    let null = graph.unique(Node::new(NodeKind::IsNull, vec![base]))?;
                    let guard = graph.unique(Node::new(
                        NodeKind::Guard {
                            action: DeoptimizationAction::InvalidateReprofile,
                            reason: DeoptimizationReason::NullCheckException,
                            negated: true,
                        },
                        vec![null, block.begin()],
                    ))?;
                    graph.push_input(access, guard)?;
                    trace!("{access}: null check {guard} on {base}");
                    ctx.events
                        .record(EventKind::GuardInserted)
                        .method(graph.method())
                        .node(guard)
                        .message(format!("null check of {base} for {access}"));
                }
            }
        }
    }
    Ok(())
}

fn is_non_null(graph: &Graph, value: NodeId) -> bool {
    matches!(
        graph.kind(value),
        NodeKind::NewInstance { .. }
            | NodeKind::ExceptionObject
            | NodeKind::Constant(Constant::Object(_))
    )
}

/// A negated null-check guard on `base` that executes before position `at`.
fn covering_check(
    graph: &Graph,
    cfg: &ControlFlowGraph,
    dominators: &DominatorTree,
    base: NodeId,
    at: (BlockId, usize),
) -> Option<NodeId> {
    let (block, position) = at;
    for &test in graph[base].usages() {
        if !matches!(graph.kind(test), NodeKind::IsNull) {
            continue;
        }
        for &guard in graph[test].usages() {
            if graph[guard].input(0) != Some(test) {
                continue;
            }
            let (guard_block, guard_position) = match *graph.kind(guard) {
                NodeKind::FixedGuard { negated: true, .. } => {
                    let Some(b) = cfg.block_of(guard) else {
                        continue;
                    };
                    let p = cfg.block(b).nodes().iter().position(|&n| n == guard);
                    (b, p.unwrap_or(usize::MAX))
                }
                NodeKind::Guard { negated: true, .. } => {
                    let Some(b) = graph[guard].input(1).and_then(|a| cfg.block_of(a)) else {
                        continue;
                    };
                    (b, 0)
                }
                _ => continue,
            };
            let covers = if guard_block == block {
                guard_position < position
            } else {
                dominators.dominates(guard_block, block)
            };
            if covers {
                return Some(guard);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{CompilerConfig, TargetDescription},
        ir::{Condition, FieldRef, GraphBuilder, InvokeKind, NodeClass, ValueKind},
    };

    fn field(index: u16) -> FieldRef {
        FieldRef::new("Box", "value", index, ValueKind::Int)
    }

    #[test]
    fn test_field_offsets() -> Result<()> {
        let mut b = GraphBuilder::new();
        let object = b.parameter(0, ValueKind::Object)?;
        let value = b.parameter(1, ValueKind::Int)?;
        let store = b.store_field(field(2), object, value)?;
        let load = b.load_field(field(0), object)?;
        b.ret(Some(load))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::new(CompilerConfig::default(), TargetDescription::x86());
        assert!(LoweringPhase.run(&mut graph, &ctx)?);
        assert_eq!(
            graph.kind(store),
            &NodeKind::Write {
                field: field(2),
                offset: 8 + 2 * 4
            }
        );
        assert_eq!(
            graph.kind(load),
            &NodeKind::Read {
                field: field(0),
                offset: 8
            }
        );
        assert_eq!(graph.nodes_of(NodeClass::LoadField).count(), 0);
        assert_eq!(ctx.events.count_kind(EventKind::NodeLowered), 2);
        graph.verify()
    }

    #[test]
    fn test_unchecked_base_gets_anchored_null_check() -> Result<()> {
        let mut b = GraphBuilder::new();
        let object = b.parameter(0, ValueKind::Object)?;
        let value = b.parameter(1, ValueKind::Int)?;
        let store = b.store_field(field(1), object, value)?;
        let load = b.load_field(field(0), object)?;
        b.ret(Some(load))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::default();
        LoweringPhase.run(&mut graph, &ctx)?;

        let guards: Vec<NodeId> = graph.nodes_of(NodeClass::Guard).collect();
        assert_eq!(guards.len(), 1);
        let guard = guards[0];
        assert_eq!(
            graph.kind(guard),
            &NodeKind::Guard {
                action: DeoptimizationAction::InvalidateReprofile,
                reason: DeoptimizationReason::NullCheckException,
                negated: true,
            }
        );
        let test = graph[guard].inputs()[0];
        assert_eq!(graph.kind(test), &NodeKind::IsNull);
        assert_eq!(graph[test].inputs(), &[object]);
        assert_eq!(graph[guard].input(1), Some(graph.start()));

        // Both accesses share the guard as their last input.
        assert_eq!(graph[store].inputs(), &[object, value, guard]);
        assert_eq!(graph[load].inputs(), &[object, guard]);
        assert_eq!(ctx.events.count_kind(EventKind::GuardInserted), 1);
        graph.verify()
    }

    #[test]
    fn test_checked_or_allocated_bases_need_no_guard() -> Result<()> {
        let mut b = GraphBuilder::new();
        let object = b.parameter(0, ValueKind::Object)?;
        let null = b.is_null(object)?;
        b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        let first = b.load_field(field(0), object)?;
        let fresh = b.new_instance("Box", 1)?;
        b.store_field(field(0), fresh, first)?;
        let second = b.load_field(field(0), fresh)?;
        b.ret(Some(second))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::default();
        assert!(LoweringPhase.run(&mut graph, &ctx)?);
        assert_eq!(graph.nodes_of(NodeClass::Guard).count(), 0);
        assert_eq!(graph[first].inputs(), &[object]);
        assert_eq!(ctx.events.count_kind(EventKind::GuardInserted), 0);
        graph.verify()
    }

    #[test]
    fn test_guard_covers_dominated_blocks() -> Result<()> {
        let mut b = GraphBuilder::new();
        let object = b.parameter(0, ValueKind::Object)?;
        let flag = b.parameter(1, ValueKind::Int)?;
        let zero = b.int(0)?;
        let entry = b.load_field(field(0), object)?;
        let cond = b.compare(Condition::Eq, flag, zero)?;
        let (t, f) = b.branch(cond)?;
        b.switch_to(t);
        let inner = b.load_field(field(1), object)?;
        b.ret(Some(inner))?;
        b.switch_to(f);
        b.ret(Some(entry))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::default();
        LoweringPhase.run(&mut graph, &ctx)?;
        let guards: Vec<NodeId> = graph.nodes_of(NodeClass::Guard).collect();
        assert_eq!(guards.len(), 1);
        assert_eq!(graph[guards[0]].input(1), Some(graph.start()));
        assert_eq!(graph[inner].inputs(), &[object, guards[0]]);
        graph.verify()
    }

    #[test]
    fn test_sibling_branches_get_their_own_guards() -> Result<()> {
        let mut b = GraphBuilder::new();
        let object = b.parameter(0, ValueKind::Object)?;
        let flag = b.parameter(1, ValueKind::Int)?;
        let zero = b.int(0)?;
        let cond = b.compare(Condition::Eq, flag, zero)?;
        let (t, f) = b.branch(cond)?;
        b.switch_to(t);
        let left = b.load_field(field(0), object)?;
        b.ret(Some(left))?;
        b.switch_to(f);
        let right = b.load_field(field(1), object)?;
        b.ret(Some(right))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::default();
        LoweringPhase.run(&mut graph, &ctx)?;
        let anchors: HashSet<Option<NodeId>> = graph
            .nodes_of(NodeClass::Guard)
            .map(|g| graph[g].input(1))
            .collect();
        assert_eq!(anchors, HashSet::from([Some(t), Some(f)]));
        assert_eq!(ctx.events.count_kind(EventKind::GuardInserted), 2);
        graph.verify()
    }

    #[test]
    fn test_unresolved_call_is_unsupported() -> Result<()> {
        let mut b = GraphBuilder::new();
        let result = b.invoke(
            0,
            InvokeKind::Static,
            Callee::Unresolved("Lib.missing".into()),
            ValueKind::Int,
            &[],
            None,
        )?;
        b.ret(Some(result))?;
        let mut graph = b.finish();

        let err = LoweringPhase
            .run(&mut graph, &CompilationContext::default())
            .unwrap_err();
        assert!(err.is_bailout());
        assert!(matches!(err, Error::Unsupported { ref phase, .. } if phase == "lowering"));
        Ok(())
    }

    #[test]
    fn test_surviving_marker_is_internal_fault() -> Result<()> {
        let mut b = GraphBuilder::new();
        let marker = b.never_part_of_compilation("slow path")?;
        b.ret(None)?;
        let mut graph = b.finish();

        let err = LoweringPhase
            .run(&mut graph, &CompilationContext::default())
            .unwrap_err();
        assert!(err.is_internal());
        assert!(matches!(
            err,
            Error::InternalFault { node: Some(n), ref phase, .. } if n == marker && phase.as_deref() == Some("lowering")
        ));
        Ok(())
    }
}
