//! Strength reduction.

use crate::{
    compiler::{context::CompilationContext, events::EventKind, phase::Phase},
    ir::{BinaryOp, Constant, Graph, Node, NodeClass, NodeId, NodeKind},
    Result,
};

/// Replaces `x * 2^k` (k >= 1) by `x << k`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrengthReductionPhase;

impl StrengthReductionPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for StrengthReductionPhase {
    fn name(&self) -> &'static str {
        "strength-reduction"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        let candidates: Vec<NodeId> = graph.nodes_of(NodeClass::Binary).collect();
        let mut reduced = 0;
        for id in candidates {
            if !graph.is_alive(id) {
                continue;
            }
            let NodeKind::Binary {
                op: BinaryOp::Mul,
                kind,
            } = *graph.kind(id)
            else {
                continue;
            };
            let (Some(x), Some(y)) = (graph[id].input(0), graph[id].input(1)) else {
                continue;
            };
            let Some(shift) = graph.int_value(y).and_then(power_of_two) else {
                continue;
            };

            let distance = graph.constant(Constant::Int(shift))?;
            let shl = graph.unique(Node::new(
                NodeKind::Binary {
                    op: BinaryOp::Shl,
                    kind,
                },
                vec![x, distance],
            ))?;
            graph.replace_at_usages(id, shl)?;
            graph.kill_unused_floating(id)?;
            ctx.events
                .record(EventKind::StrengthReduced)
                .method(graph.method())
                .node(id)
                .message(format!("* {} -> << {shift}", 1_i64 << shift));
            reduced += 1;
        }
        Ok(reduced > 0)
    }

    fn description(&self) -> &'static str {
        "Replaces multiplications by powers of two with shifts"
    }
}

/// `k` if `value == 2^k` with `k >= 1`.
fn power_of_two(value: i64) -> Option<i32> {
    (value > 1 && value.count_ones() == 1).then(|| value.trailing_zeros() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, ValueKind};

    #[test]
    fn test_power_of_two() {
        assert_eq!(power_of_two(8), Some(3));
        assert_eq!(power_of_two(2), Some(1));
        assert_eq!(power_of_two(1), None);
        assert_eq!(power_of_two(6), None);
        assert_eq!(power_of_two(-4), None);
        assert_eq!(power_of_two(1 << 40), Some(40));
    }

    #[test]
    fn test_multiply_becomes_shift() -> Result<()> {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Long)?;
        let sixteen = b.long(16)?;
        let product = b.binary(BinaryOp::Mul, ValueKind::Long, x, sixteen)?;
        let ret = b.ret(Some(product))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::default();
        assert!(StrengthReductionPhase.run(&mut graph, &ctx)?);
        assert!(!graph.is_alive(product));
        let shl = graph[ret].inputs()[0];
        assert_eq!(
            graph.kind(shl),
            &NodeKind::Binary {
                op: BinaryOp::Shl,
                kind: ValueKind::Long
            }
        );
        assert_eq!(graph[shl].inputs()[0], x);
        assert_eq!(graph.int_value(graph[shl].inputs()[1]), Some(4));
        assert_eq!(ctx.events.count_kind(EventKind::StrengthReduced), 1);
        graph.verify()
    }

    #[test]
    fn test_other_multipliers_kept() -> Result<()> {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let three = b.int(3)?;
        let product = b.binary(BinaryOp::Mul, ValueKind::Int, x, three)?;
        b.ret(Some(product))?;
        let mut graph = b.finish();
        assert!(!StrengthReductionPhase.run(&mut graph, &CompilationContext::default())?);
        assert!(graph.is_alive(product));
        Ok(())
    }
}
