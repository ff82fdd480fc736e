//! Dead code elimination.

use std::collections::HashSet;

use log::debug;

use crate::{
    compiler::{context::CompilationContext, events::EventKind, phase::Phase},
    ir::{verify::reachable_fixed, Graph, NodeId, NodeKind},
    Result,
};

/// Removes fixed nodes unreachable from the start and floating nodes that no
/// live node depends on.
///
/// Ends of unreachable regions that feed a reachable merge are detached from the
/// merge first (dropping the matching phi values), and merges left with a single
/// end are collapsed afterwards. Parameters always survive.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeEliminationPhase;

impl DeadCodeEliminationPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for DeadCodeEliminationPhase {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        let removed = eliminate_dead_code(graph)?;
        if removed > 0 {
            debug!("removed {removed} dead nodes");
            ctx.events
                .record(EventKind::NodeRemoved)
                .method(graph.method())
                .message(format!("{removed} dead nodes"));
        }
        Ok(removed > 0)
    }

    fn description(&self) -> &'static str {
        "Removes unreachable control flow and unused data nodes"
    }
}

/// Removes every dead node of `graph`, returning how many were deleted.
///
/// # Errors
///
/// Only fails on a malformed graph.
pub fn eliminate_dead_code(graph: &mut Graph) -> Result<usize> {
    let reachable = reachable_fixed(graph);
    let before = graph.node_count();

    let unreachable: Vec<NodeId> = graph
        .nodes()
        .filter(|&id| graph.kind(id).is_fixed() && !reachable.contains(&id))
        .collect();

    let mut touched = Vec::new();
    for &id in &unreachable {
        if !graph.kind(id).is_end() {
            continue;
        }
        let merge = graph[id]
            .usages()
            .iter()
            .copied()
            .find(|&u| graph.kind(u).is_merge() && reachable.contains(&u));
        if let Some(merge) = merge {
            graph.remove_end(merge, id)?;
            touched.push(merge);
        }
    }
    for &id in &unreachable {
        if graph.is_alive(id) {
            graph.delete_forced(id)?;
        }
    }

    // Liveness: reachable control, anchored phis and guards, and their inputs.
    let mut live: HashSet<NodeId> = reachable.clone();
    let mut worklist: Vec<NodeId> = reachable.iter().copied().collect();
    for id in graph.nodes() {
        let anchor = match graph.kind(id) {
            NodeKind::Phi { .. } => graph[id].input(0),
            NodeKind::Guard { .. } => graph[id].input(1),
            _ => None,
        };
        if anchor.is_some_and(|a| reachable.contains(&a)) && live.insert(id) {
            worklist.push(id);
        }
    }
    while let Some(id) = worklist.pop() {
        for &input in graph[id].inputs() {
            if live.insert(input) {
                worklist.push(input);
            }
        }
    }

    let dead: Vec<NodeId> = graph
        .nodes()
        .filter(|&id| !live.contains(&id) && !matches!(graph.kind(id), NodeKind::Parameter { .. }))
        .collect();
    for id in dead {
        if graph.is_alive(id) {
            graph.delete_forced(id)?;
        }
    }

    for merge in touched {
        if graph.is_alive(merge) {
            graph.collapse_merge(merge)?;
        }
    }
    Ok(before.saturating_sub(graph.node_count()))
}
