//! Scalar replacement of allocations that never escape.
//!
//! An allocation is virtualized when every usage is a field load or store on
//! the allocation itself, located in the allocation's straight-line successor
//! chain. The chain is then walked in control order, tracking the current value
//! of each field: stores update the tracked value and disappear, loads are
//! replaced by the tracked value (the field's default before the first store).
//! The allocation is removed last.

use std::collections::HashSet;

use crate::{
    compiler::{context::CompilationContext, events::EventKind, events::EventLog, phase::Phase},
    ir::{Constant, Graph, NodeClass, NodeId, NodeKind, ValueKind},
    Result,
};

/// Removes non-escaping `NewInstance` allocations.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscapeAnalysisPhase;

impl EscapeAnalysisPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for EscapeAnalysisPhase {
    fn name(&self) -> &'static str {
        "escape-analysis"
    }

    fn should_run(&self, _graph: &Graph, ctx: &CompilationContext) -> bool {
        ctx.config.escape_analysis
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        Ok(virtualize_allocations(graph, Some(&ctx.events))? > 0)
    }

    fn description(&self) -> &'static str {
        "Scalar replacement of allocations that do not escape"
    }
}

fn default_value(kind: ValueKind) -> Option<Constant> {
    match kind {
        ValueKind::Int => Some(Constant::Int(0)),
        ValueKind::Long => Some(Constant::Long(0)),
        ValueKind::Object => Some(Constant::Null),
        ValueKind::Void => None,
    }
}

/// Field accessed by `user` on `allocation`, if `user` is a load or store that
/// keeps the allocation local.
fn local_access(graph: &Graph, allocation: NodeId, user: NodeId, fields: u16) -> Option<u16> {
    let node = graph.get(user)?;
    let field = match node.kind() {
        NodeKind::LoadField { field } => field,
        NodeKind::StoreField { field } if node.input(1) != Some(allocation) => field,
        _ => return None,
    };
    (node.input(0) == Some(allocation) && field.index < fields && default_value(field.kind).is_some())
        .then_some(field.index)
}

/// Virtualizes every non-escaping allocation of `graph`.
///
/// Returns the number of removed allocations.
///
/// # Errors
///
/// Only fails on a malformed graph.
pub fn virtualize_allocations(graph: &mut Graph, events: Option<&EventLog>) -> Result<usize> {
    let allocations: Vec<NodeId> = graph.nodes_of(NodeClass::NewInstance).collect();
    let mut removed = 0;

    for allocation in allocations {
        let NodeKind::NewInstance { fields, .. } = *graph.kind(allocation) else {
            continue;
        };
        let chain = graph.straight_line_from(allocation);
        let in_chain: HashSet<NodeId> = chain.iter().copied().collect();
        let local = graph[allocation].usages().iter().all(|&user| {
            in_chain.contains(&user) && local_access(graph, allocation, user, fields).is_some()
        });
        if !local {
            continue;
        }

        let mut values: Vec<Option<NodeId>> = vec![None; usize::from(fields)];
        for &node in &chain[1..] {
            if graph[node].input(0) != Some(allocation) {
                continue;
            }
            let Some(index) = local_access(graph, allocation, node, fields) else {
                continue;
            };
            let slot = usize::from(index);
            match graph.kind(node) {
                NodeKind::StoreField { .. } => {
                    values[slot] = graph[node].input(1);
                    graph.remove_fixed(node)?;
                }
                NodeKind::LoadField { field } => {
                    let value = match values[slot] {
                        Some(value) => value,
                        None => {
                            let Some(default) = default_value(field.kind) else {
                                continue;
                            };
                            graph.constant(default)?
                        }
                    };
                    graph.replace_fixed_with_floating(node, value)?;
                }
                _ => {}
            }
        }

        graph.remove_fixed(allocation)?;
        removed += 1;
        if let Some(events) = events {
            events
                .record(EventKind::AllocationVirtualized)
                .method(graph.method())
                .node(allocation);
        }
    }
    Ok(removed)
}
