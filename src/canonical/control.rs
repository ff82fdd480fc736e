//! Canonicalization rules for control flow, phis and guards.

use crate::{
    canonical::Canonical,
    ir::{Graph, Node, NodeId, NodeKind},
    Result,
};

/// A phi whose values are all the same node (ignoring self references) is that node.
pub(crate) fn phi(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let mut unique = None;
    for &value in &graph[id].inputs()[1..] {
        if value == id {
            continue;
        }
        match unique {
            None => unique = Some(value),
            Some(seen) if seen == value => {}
            Some(_) => return Ok(Canonical::Unchanged),
        }
    }
    Ok(unique.map_or(Canonical::Unchanged, Canonical::Replaced))
}

/// Folds an `If` on a constant condition.
///
/// The dead successor region is killed (removing its merge ends and phi values),
/// the surviving begin takes the place of the `If`.
pub(crate) fn branch(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let node = &graph[id];
    let Some(value) = node.input(0).and_then(|c| graph.int_value(c)) else {
        return Ok(Canonical::Unchanged);
    };
    let Some(predecessor) = node.predecessor() else {
        return Ok(Canonical::Unchanged);
    };
    let (taken, dead) = if value != 0 {
        (node.successors()[0], node.successors()[1])
    } else {
        (node.successors()[1], node.successors()[0])
    };
    let Some(taken) = taken else {
        return Err(internal_fault!(node = id, "constant branch without taken successor"));
    };

    if let Some(dead) = dead {
        graph.kill_cfg(dead)?;
    }
    let slot = graph.successor_slot(id, taken)?;
    graph.set_successor(id, slot, None)?;
    let slot = graph.successor_slot(predecessor, id)?;
    graph.set_successor(predecessor, slot, Some(taken))?;
    graph.clear_inputs(id)?;
    graph.delete(id)?;
    Ok(Canonical::Simplified)
}

/// Removes a `Begin` that anchors nothing and does not start a branch.
pub(crate) fn begin(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let node = &graph[id];
    if node.has_usages() {
        return Ok(Canonical::Unchanged);
    }
    let Some(predecessor) = node.predecessor() else {
        return Ok(Canonical::Unchanged);
    };
    if !graph.kind(predecessor).is_straight_line() {
        return Ok(Canonical::Unchanged);
    }
    graph.remove_fixed(id)?;
    Ok(Canonical::Simplified)
}

/// Collapses merges and loop headers left with a single forward end.
pub(crate) fn merge(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    Ok(if graph.collapse_merge(id)? {
        Canonical::Simplified
    } else {
        Canonical::Unchanged
    })
}

fn guard_passes(graph: &Graph, condition: NodeId, negated: bool) -> Option<bool> {
    graph.int_value(condition).map(|v| (v != 0) != negated)
}

/// Removes a fixed guard whose condition always holds, or turns one that
/// always fails into an unconditional deoptimization.
pub(crate) fn fixed_guard(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let NodeKind::FixedGuard {
        action,
        reason,
        negated,
    } = *graph.kind(id)
    else {
        return Ok(Canonical::Unchanged);
    };
    let node = &graph[id];
    let Some(passes) = node
        .input(0)
        .and_then(|c| guard_passes(graph, c, negated))
    else {
        return Ok(Canonical::Unchanged);
    };
    let Some(predecessor) = node.predecessor() else {
        return Ok(Canonical::Unchanged);
    };

    if passes {
        graph.replace_at_usages(id, predecessor)?;
        graph.remove_fixed(id)?;
        return Ok(Canonical::Simplified);
    }

    let next = node.next();
    let deopt = graph.add(Node::new(NodeKind::Deoptimize { action, reason }, Vec::new()))?;
    graph.replace_at_usages(id, deopt)?;
    graph.set_successor(id, 0, None)?;
    let slot = graph.successor_slot(predecessor, id)?;
    graph.set_successor(predecessor, slot, Some(deopt))?;
    graph.clear_inputs(id)?;
    graph.delete(id)?;
    if let Some(next) = next {
        graph.kill_cfg(next)?;
    }
    Ok(Canonical::Simplified)
}

/// A floating guard on a constant condition either disappears (usages move to
/// its anchor) or deoptimizes unconditionally at its anchor.
pub(crate) fn guard(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let NodeKind::Guard {
        action,
        reason,
        negated,
    } = *graph.kind(id)
    else {
        return Ok(Canonical::Unchanged);
    };
    let &[condition, anchor] = graph[id].inputs() else {
        return Ok(Canonical::Unchanged);
    };
    let Some(passes) = guard_passes(graph, condition, negated) else {
        return Ok(Canonical::Unchanged);
    };
    if passes {
        return Ok(Canonical::Replaced(anchor));
    }

    if graph.kind(anchor).successor_slots() == 0 || !graph.kind(anchor).is_straight_line() {
        return Ok(Canonical::Unchanged);
    }
    let next = graph[anchor].next();
    let deopt = graph.add(Node::new(NodeKind::Deoptimize { action, reason }, Vec::new()))?;
    graph.set_successor(anchor, 0, None)?;
    if let Some(next) = next {
        graph.kill_cfg(next)?;
    }
    graph.set_next(anchor, deopt)?;
    Ok(Canonical::Replaced(anchor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        Condition, DeoptimizationAction, DeoptimizationReason, GraphBuilder, NodeClass, ValueKind,
    };

    fn diamond(condition: Option<i32>) -> Result<(Graph, NodeId, NodeId, NodeId)> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int)?;
        let cond = match condition {
            Some(c) => b.int(c)?,
            None => p,
        };
        let one = b.int(1)?;
        let two = b.int(2)?;
        let (t, f) = b.branch(cond)?;
        b.switch_to(t);
        let e1 = b.end()?;
        b.switch_to(f);
        let e2 = b.end()?;
        let merge = b.merge(&[e1, e2])?;
        let phi = b.phi(ValueKind::Int, merge, &[one, two])?;
        let ret = b.ret(Some(phi))?;
        let graph = b.finish();
        let split = graph.nodes_of(NodeClass::If).next().unwrap();
        Ok((graph, split, phi, ret))
    }

    #[test]
    fn test_trivial_phi() -> Result<()> {
        let (mut graph, _, phi_node, _) = diamond(None)?;
        assert_eq!(phi(&mut graph, phi_node)?, Canonical::Unchanged);
        let one = graph[phi_node].inputs()[1];
        graph.set_input(phi_node, 2, one)?;
        assert_eq!(phi(&mut graph, phi_node)?, Canonical::Replaced(one));
        Ok(())
    }

    #[test]
    fn test_branch_folding_true() -> Result<()> {
        let (mut graph, split, phi, ret) = diamond(Some(1))?;
        assert_eq!(branch(&mut graph, split)?, Canonical::Simplified);
        assert!(!graph.is_alive(split));
        assert!(!graph.is_alive(phi));
        assert_eq!(graph.int_value(graph[ret].inputs()[0]), Some(1));
        assert_eq!(graph.nodes_of(NodeClass::Merge).count(), 0);
        graph.verify()
    }

    #[test]
    fn test_branch_folding_false() -> Result<()> {
        let (mut graph, split, _, ret) = diamond(Some(0))?;
        assert_eq!(branch(&mut graph, split)?, Canonical::Simplified);
        assert_eq!(graph.int_value(graph[ret].inputs()[0]), Some(2));
        graph.verify()
    }

    #[test]
    fn test_branch_on_parameter_unchanged() -> Result<()> {
        let (mut graph, split, _, _) = diamond(None)?;
        assert_eq!(branch(&mut graph, split)?, Canonical::Unchanged);
        Ok(())
    }

    #[test]
    fn test_begin_after_start_removed() -> Result<()> {
        let mut b = GraphBuilder::new();
        let begin = b.append(NodeKind::Begin, Vec::new())?;
        let ret = b.ret(None)?;
        let mut graph = b.finish();
        assert_eq!(super::begin(&mut graph, begin)?, Canonical::Simplified);
        assert_eq!(graph[graph.start()].next(), Some(ret));
        graph.verify()
    }

    #[test]
    fn test_branch_begins_kept() -> Result<()> {
        let (mut graph, split, _, _) = diamond(None)?;
        let t = graph[split].successors()[0].unwrap();
        assert_eq!(begin(&mut graph, t)?, Canonical::Unchanged);
        Ok(())
    }

    #[test]
    fn test_fixed_guard_passing_removed() -> Result<()> {
        let mut b = GraphBuilder::new();
        let one = b.int(1)?;
        let g = b.fixed_guard(one, DeoptimizationReason::NullCheckException, false)?;
        let ret = b.ret(None)?;
        let mut graph = b.finish();
        assert_eq!(fixed_guard(&mut graph, g)?, Canonical::Simplified);
        assert!(!graph.is_alive(g));
        assert_eq!(graph[graph.start()].next(), Some(ret));
        Ok(())
    }

    #[test]
    fn test_fixed_guard_failing_deoptimizes() -> Result<()> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let cmp = b.compare(Condition::Eq, p, zero)?;
        let g = b.fixed_guard(zero, DeoptimizationReason::BoundsCheckException, false)?;
        let ret = b.ret(Some(cmp))?;
        let mut graph = b.finish();
        assert_eq!(fixed_guard(&mut graph, g)?, Canonical::Simplified);
        assert!(!graph.is_alive(ret));
        assert!(!graph.is_alive(cmp));
        let next = graph[graph.start()].next().unwrap();
        assert_eq!(
            graph.kind(next),
            &NodeKind::Deoptimize {
                action: DeoptimizationAction::InvalidateReprofile,
                reason: DeoptimizationReason::BoundsCheckException,
            }
        );
        graph.verify()
    }

    #[test]
    fn test_floating_guard() -> Result<()> {
        let mut b = GraphBuilder::new();
        let begin = b.append(NodeKind::Begin, Vec::new())?;
        let one = b.int(1)?;
        b.ret(None)?;
        let mut graph = b.finish();
        let g = graph.add(Node::new(
            NodeKind::Guard {
                action: DeoptimizationAction::InvalidateRecompile,
                reason: DeoptimizationReason::ClassCastException,
                negated: true,
            },
            vec![one, begin],
        ))?;
        let Canonical::Replaced(anchor) = guard(&mut graph, g)? else {
            panic!("failing guard should be replaced by its anchor");
        };
        assert_eq!(anchor, begin);
        let next = graph[begin].next().unwrap();
        assert!(matches!(graph.kind(next), NodeKind::Deoptimize { .. }));
        Ok(())
    }
}
