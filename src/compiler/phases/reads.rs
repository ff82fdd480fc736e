//! Floating reads.

use crate::{
    compiler::{context::CompilationContext, events::EventKind, phase::Phase},
    ir::{FieldRef, Graph, Node, NodeClass, NodeId, NodeKind},
    Result,
};

/// Turns reads of fields nothing in the graph writes into `FloatingRead`s.
///
/// A field is read-only when no `Write` or `StoreField` to it exists and the
/// graph has no invoke that could write it behind the compiler's back. The
/// floating read keeps its base and takes the nearest preceding begin node or
/// fixed guard as its memory location input, so it is never scheduled above a
/// check it depends on. A null-check guard inserted by lowering stays an input
/// after the location.
#[derive(Debug, Default, Clone, Copy)]
pub struct FloatingReadsPhase;

impl FloatingReadsPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for FloatingReadsPhase {
    fn name(&self) -> &'static str {
        "floating-reads"
    }

    fn should_run(&self, graph: &Graph, _ctx: &CompilationContext) -> bool {
        graph.nodes_of(NodeClass::Read).next().is_some()
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        if graph.nodes_of(NodeClass::Invoke).next().is_some() {
            return Ok(false);
        }
        let written: Vec<FieldRef> = graph
            .nodes()
            .filter_map(|id| match graph.kind(id) {
                NodeKind::Write { field, .. } | NodeKind::StoreField { field } => {
                    Some(field.clone())
                }
                _ => None,
            })
            .collect();

        let reads: Vec<NodeId> = graph.nodes_of(NodeClass::Read).collect();
        let mut floated = 0;
        for read in reads {
            let NodeKind::Read { field, offset } = graph.kind(read).clone() else {
                continue;
            };
            if written.contains(&field) {
                continue;
            }
            let Some(base) = graph[read].input(0) else {
                return Err(internal_fault!(node = read, "read without base"));
            };
            let location = last_location(graph, read)?;
            let mut inputs = vec![base, location];
            inputs.extend(graph[read].inputs().iter().skip(1).copied());
            let floating = graph.add(Node::new(NodeKind::FloatingRead { field, offset }, inputs))?;
            graph.replace_fixed_with_floating(read, floating)?;
            ctx.events
                .record(EventKind::ReadFloated)
                .method(graph.method())
                .node(read);
            floated += 1;
        }
        Ok(floated > 0)
    }

    fn description(&self) -> &'static str {
        "Lets reads of unwritten fields float"
    }
}

/// Nearest begin node or fixed guard before `node` in control order.
fn last_location(graph: &Graph, node: NodeId) -> Result<NodeId> {
    let mut current = node;
    loop {
        let Some(predecessor) = graph[current].predecessor() else {
            return Err(internal_fault!(node = current, "no memory location before read"));
        };
        let kind = graph.kind(predecessor);
        if kind.is_begin() || matches!(kind, NodeKind::FixedGuard { .. }) {
            return Ok(predecessor);
        }
        current = predecessor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::phases::LoweringPhase,
        ir::{BinaryOp, DeoptimizationReason, GraphBuilder, ValueKind},
    };

    #[test]
    fn test_read_only_field_floats() -> Result<()> {
        let size = FieldRef::new("Array", "length", 0, ValueKind::Int);
        let mut b = GraphBuilder::new();
        let array = b.parameter(0, ValueKind::Object)?;
        let null = b.is_null(array)?;
        let check = b.fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
        let first = b.load_field(size.clone(), array)?;
        let second = b.load_field(size, array)?;
        let sum = b.binary(BinaryOp::Add, ValueKind::Int, first, second)?;
        let ret = b.ret(Some(sum))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::default();
        LoweringPhase.run(&mut graph, &ctx)?;
        assert!(FloatingReadsPhase.run(&mut graph, &ctx)?);
        assert_eq!(graph.nodes_of(NodeClass::Read).count(), 0);
        assert_eq!(graph[check].next(), Some(ret));

        let sum = graph[ret].inputs()[0];
        for &input in graph[sum].inputs() {
            assert!(matches!(graph.kind(input), NodeKind::FloatingRead { .. }));
            assert_eq!(graph[input].inputs(), &[array, check]);
        }
        assert_eq!(ctx.events.count_kind(EventKind::ReadFloated), 2);
        graph.verify()
    }

    #[test]
    fn test_written_field_stays_fixed() -> Result<()> {
        let count = FieldRef::new("Counter", "count", 0, ValueKind::Int);
        let mut b = GraphBuilder::new();
        let object = b.parameter(0, ValueKind::Object)?;
        let one = b.int(1)?;
        let value = b.load_field(count.clone(), object)?;
        let next = b.binary(BinaryOp::Add, ValueKind::Int, value, one)?;
        b.store_field(count, object, next)?;
        b.ret(None)?;
        let mut graph = b.finish();

        let ctx = CompilationContext::default();
        LoweringPhase.run(&mut graph, &ctx)?;
        assert!(!FloatingReadsPhase.run(&mut graph, &ctx)?);
        assert_eq!(graph.nodes_of(NodeClass::Read).count(), 1);
        Ok(())
    }
}
