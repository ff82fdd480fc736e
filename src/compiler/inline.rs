//! Splicing a callee graph in place of an invoke.
//!
//! This is the shared mechanism behind the inlining phase and partial
//! evaluation. The callee is copied node by node into the caller:
//!
//! - parameters are replaced by the call's arguments
//! - constants are interned in the caller
//! - the callee's start is replaced by the invoke's predecessor
//! - returns are merged into a single value (a merge plus a phi if there are
//!   several) that replaces the invoke's usages
//! - unwinds are routed to the invoke's exception edge if it has one, and stay
//!   terminators otherwise

use std::collections::HashMap;

use crate::{
    ir::{Callee, Graph, MethodId, Node, NodeId, NodeKind, ValueKind},
    Result,
};

/// What a splice added to the caller.
#[derive(Debug, Clone, Default)]
pub struct Splice {
    /// Nodes copied from the callee that are still alive.
    pub nodes: Vec<NodeId>,
    /// Invokes copied from the callee.
    pub invokes: Vec<NodeId>,
    /// The value that replaced the invoke, if the callee returns one.
    pub result: Option<NodeId>,
}

/// The statically bound target of `invoke`: a direct callee with static or
/// special dispatch.
#[must_use]
pub fn direct_callee(graph: &Graph, invoke: NodeId) -> Option<MethodId> {
    let target = graph.get(invoke)?.input(0)?;
    match graph.kind(target) {
        NodeKind::CallTarget {
            invoke_kind,
            callee: Callee::Direct(method),
            ..
        } if invoke_kind.is_direct() => Some(*method),
        _ => None,
    }
}

/// Replaces `invoke` by a copy of `callee`.
///
/// The call target of `invoke` must be direct; its inputs are the arguments in
/// parameter order.
///
/// # Errors
///
/// Returns an internal fault if `invoke` is not a linked direct invoke or the
/// callee uses a parameter the call does not supply.
pub fn splice(graph: &mut Graph, invoke: NodeId, callee: &Graph) -> Result<Splice> {
    let node = graph.node(invoke)?;
    if !matches!(node.kind(), NodeKind::Invoke { .. }) {
        return Err(internal_fault!(node = invoke, "cannot inline {}", node.kind()));
    }
    let Some(target) = node.input(0) else {
        return Err(internal_fault!(node = invoke, "invoke without call target"));
    };
    let state = node.input(1);
    let Some(predecessor) = node.predecessor() else {
        return Err(internal_fault!(node = invoke, "invoke without predecessor"));
    };
    let next = node.next();
    let exception = node.successors().get(1).copied().flatten();

    let return_kind = match graph.kind(target) {
        NodeKind::CallTarget {
            callee: Callee::Direct(_),
            return_kind,
            ..
        } => *return_kind,
        other => {
            return Err(internal_fault!(
                node = invoke,
                "inlining needs a direct call target, found {}",
                other
            ))
        }
    };
    let arguments = graph[target].inputs().to_vec();

    let Some(entry) = callee[callee.start()].next() else {
        return Err(internal_fault!(node = callee.start(), "callee start has no next node"));
    };

    let mut map: HashMap<NodeId, NodeId> = HashMap::new();
    let mut created = Vec::new();
    for id in callee.nodes() {
        let mapped = match callee.kind(id) {
            _ if id == callee.start() => predecessor,
            NodeKind::Parameter { index, .. } => {
                *arguments.get(usize::from(*index)).ok_or_else(|| {
                    internal_fault!(node = invoke, "call supplies no argument {}", index)
                })?
            }
            NodeKind::Constant(c) => graph.constant(*c)?,
            kind => {
                let copy = graph.add(Node::new(kind.clone(), Vec::new()))?;
                created.push((id, copy));
                copy
            }
        };
        map.insert(id, mapped);
    }

    for &(original, copy) in &created {
        for input in callee[original].inputs() {
            graph.push_input(copy, map[input])?;
        }
        for (slot, successor) in callee[original].successors().iter().enumerate() {
            let Some(successor) = successor else {
                continue;
            };
            if slot < graph[copy].successors().len() {
                graph.set_successor(copy, slot, Some(map[successor]))?;
            } else {
                graph.push_successor(copy, map[successor])?;
            }
        }
    }

    graph.set_successor(invoke, 0, None)?;
    if exception.is_some() {
        graph.set_successor(invoke, 1, None)?;
    }
    graph.replace_at_predecessor(invoke, map[&entry])?;

    let copies: Vec<NodeId> = created.iter().map(|&(_, copy)| copy).collect();
    let returns: Vec<NodeId> = copies
        .iter()
        .copied()
        .filter(|&copy| matches!(graph.kind(copy), NodeKind::Return))
        .collect();
    let unwinds: Vec<NodeId> = copies
        .iter()
        .copied()
        .filter(|&copy| matches!(graph.kind(copy), NodeKind::Unwind))
        .collect();

    let result = join(graph, &returns, next, return_kind)?;
    match result {
        Some(value) => graph.replace_at_usages(invoke, value)?,
        None if returns.is_empty() => {
            if let Some(next) = next {
                graph.kill_cfg(next)?;
            }
        }
        None => {}
    }

    if let Some(exception) = exception {
        if unwinds.is_empty() {
            graph.kill_cfg(exception)?;
        } else {
            let handler_next = graph[exception].next();
            graph.set_successor(exception, 0, None)?;
            let value = join(graph, &unwinds, handler_next, ValueKind::Object)?;
            if let Some(value) = value {
                graph.replace_at_usages(exception, value)?;
            }
            graph.delete_forced(exception)?;
        }
    }

    graph.clear_inputs(invoke)?;
    graph.delete_forced(invoke)?;
    graph.kill_unused_floating(target)?;
    if let Some(state) = state {
        graph.kill_unused_floating(state)?;
    }

    let invokes = copies
        .iter()
        .copied()
        .filter(|&copy| graph.is_alive(copy) && matches!(graph.kind(copy), NodeKind::Invoke { .. }))
        .collect();
    let nodes = copies
        .into_iter()
        .filter(|&copy| graph.is_alive(copy))
        .collect();
    Ok(Splice {
        nodes,
        invokes,
        result,
    })
}

/// Replaces the terminators `exits` (returns or unwinds) by control flow to
/// `continuation`, returning the joined value of their first inputs.
fn join(
    graph: &mut Graph,
    exits: &[NodeId],
    continuation: Option<NodeId>,
    kind: ValueKind,
) -> Result<Option<NodeId>> {
    let mut values = Vec::with_capacity(exits.len());
    let mut tails = Vec::with_capacity(exits.len());
    for &exit in exits {
        values.push(graph[exit].input(0));
        let Some(predecessor) = graph[exit].predecessor() else {
            return Err(internal_fault!(node = exit, "exit without predecessor"));
        };
        let slot = graph.successor_slot(predecessor, exit)?;
        graph.set_successor(predecessor, slot, None)?;
        graph.clear_inputs(exit)?;
        graph.delete(exit)?;
        tails.push((predecessor, slot));
    }

    match tails.as_slice() {
        [] => Ok(None),
        &[(predecessor, slot)] => {
            if let Some(continuation) = continuation {
                graph.set_successor(predecessor, slot, Some(continuation))?;
            }
            Ok(values[0])
        }
        _ => {
            let merge = graph.add(Node::new(NodeKind::Merge, Vec::new()))?;
            for &(predecessor, slot) in &tails {
                let end = graph.add(Node::new(NodeKind::End, Vec::new()))?;
                graph.set_successor(predecessor, slot, Some(end))?;
                graph.push_input(merge, end)?;
            }
            if let Some(continuation) = continuation {
                graph.set_next(merge, continuation)?;
            }
            if kind == ValueKind::Void || values.iter().any(Option::is_none) {
                return Ok(None);
            }
            let mut inputs = vec![merge];
            inputs.extend(values.into_iter().flatten());
            graph.add(Node::new(NodeKind::Phi { kind }, inputs)).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Condition, GraphBuilder, InvokeKind, NodeClass};

    /// `m1(a, b) = a + b`
    fn add_method() -> Result<Graph> {
        let mut b = GraphBuilder::for_method(MethodId(1));
        let x = b.parameter(0, ValueKind::Int)?;
        let y = b.parameter(1, ValueKind::Int)?;
        let sum = b.binary(BinaryOp::Add, ValueKind::Int, x, y)?;
        b.ret(Some(sum))?;
        Ok(b.finish())
    }

    /// `m2(a) = a < 0 ? -1 : 1`
    fn sign_method() -> Result<Graph> {
        let mut b = GraphBuilder::for_method(MethodId(2));
        let x = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let one = b.int(1)?;
        let minus = b.int(-1)?;
        let cond = b.compare(Condition::Lt, x, zero)?;
        let (t, f) = b.branch(cond)?;
        b.switch_to(t);
        b.ret(Some(minus))?;
        b.switch_to(f);
        b.ret(Some(one))?;
        Ok(b.finish())
    }

    fn caller(callee: MethodId, args: usize) -> Result<(Graph, NodeId, NodeId)> {
        let mut b = GraphBuilder::for_method(MethodId(9));
        let params: Vec<NodeId> = (0..args)
            .map(|i| b.parameter(i as u16, ValueKind::Int))
            .collect::<Result<_>>()?;
        let invoke = b.invoke(
            0,
            InvokeKind::Static,
            Callee::Direct(callee),
            ValueKind::Int,
            &params,
            None,
        )?;
        let ret = b.ret(Some(invoke))?;
        Ok((b.finish(), invoke, ret))
    }

    #[test]
    fn test_single_return() -> Result<()> {
        let (mut graph, invoke, ret) = caller(MethodId(1), 2)?;
        let splice = splice(&mut graph, invoke, &add_method()?)?;
        assert!(!graph.is_alive(invoke));
        let value = graph[ret].inputs()[0];
        assert_eq!(splice.result, Some(value));
        assert_eq!(
            graph.kind(value),
            &NodeKind::Binary {
                op: BinaryOp::Add,
                kind: ValueKind::Int
            }
        );
        assert_eq!(graph[value].inputs(), graph.parameters().as_slice());
        assert_eq!(graph.nodes_of(NodeClass::CallTarget).count(), 0);
        graph.verify()
    }

    #[test]
    fn test_multiple_returns_merge() -> Result<()> {
        let (mut graph, invoke, ret) = caller(MethodId(2), 1)?;
        splice(&mut graph, invoke, &sign_method()?)?;
        let phi = graph[ret].inputs()[0];
        assert!(graph.kind(phi).is_phi());
        let merge = graph[phi].inputs()[0];
        assert_eq!(graph[merge].inputs().len(), 2);
        assert_eq!(graph[merge].next(), Some(ret));
        graph.verify()
    }

    #[test]
    fn test_missing_argument_is_fault() -> Result<()> {
        let (mut graph, invoke, _) = caller(MethodId(1), 1)?;
        let err = splice(&mut graph, invoke, &add_method()?).unwrap_err();
        assert!(err.is_internal());
        Ok(())
    }
}
