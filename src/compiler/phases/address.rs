//! Address lowering.

use crate::{
    compiler::{context::CompilationContext, events::EventKind, phase::Phase},
    ir::{Graph, Node, NodeId, NodeKind},
    Result,
};

/// Splits memory accesses whose offset does not fit the target's addressing
/// mode into an explicit `Address(base + offset)` and an access at offset 0.
///
/// Accesses with the same base and offset share one address node.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressLoweringPhase;

impl AddressLoweringPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for AddressLoweringPhase {
    fn name(&self) -> &'static str {
        "address-lowering"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        super::ensure_lowered(graph)?;
        let limit = ctx.target.max_displacement;

        let accesses: Vec<NodeId> = graph
            .nodes()
            .filter(|&id| match graph.kind(id) {
                NodeKind::Read { offset, .. }
                | NodeKind::Write { offset, .. }
                | NodeKind::FloatingRead { offset, .. } => offset.abs() > limit,
                _ => false,
            })
            .collect();

        for &access in &accesses {
            let Some(base) = graph[access].input(0) else {
                return Err(internal_fault!(node = access, "memory access without base"));
            };
            let (lowered, displacement) = match graph.kind(access).clone() {
                NodeKind::Read { field, offset } => (NodeKind::Read { field, offset: 0 }, offset),
                NodeKind::Write { field, offset } => {
                    (NodeKind::Write { field, offset: 0 }, offset)
                }
                NodeKind::FloatingRead { field, offset } => {
                    (NodeKind::FloatingRead { field, offset: 0 }, offset)
                }
                _ => continue,
            };
            let address = graph.unique(Node::new(NodeKind::Address { displacement }, vec![base]))?;
            graph.set_input(access, 0, address)?;
            graph.set_kind(access, lowered)?;
            ctx.events
                .record(EventKind::AddressLowered)
                .method(graph.method())
                .node(access)
                .message(format!("displacement {displacement} exceeds {limit}"));
        }
        Ok(!accesses.is_empty())
    }

    fn description(&self) -> &'static str {
        "Materializes addresses the target cannot encode"
    }
}
