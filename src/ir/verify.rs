//! Structural invariant checks run at tier boundaries.
//!
//! [`verify`] reports the first violation as an [`Error::InternalFault`] naming
//! the offending node. The pipeline attaches the phase name through
//! [`Error::in_phase`].
//!
//! Checked invariants:
//!
//! 1. Every edge points at a live node and usage multisets mirror input lists.
//! 2. Successor and predecessor links agree; every fixed node other than the
//!    start and merges has a predecessor.
//! 3. Connected successor slots: straight-line nodes and invokes have a next
//!    node, `If` has both branches.
//! 4. Merges have ends as inputs (`LoopBegin`: one forward `End` then `LoopEnd`s),
//!    and every end feeds exactly one merge.
//! 5. Every phi's value count equals its merge's end count.
//! 6. Frame states have at most one usage.
//! 7. Every fixed node is reachable from the start; every floating node is
//!    input-free, anchored (phis, guards) at a reachable node, or used
//!    (transitively) by a reachable node.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::{
        graph::Graph,
        kind::NodeKind,
        node::NodeId,
    },
    Result,
};

/// Checks the structural invariants of `graph`.
///
/// # Errors
///
/// Returns [`crate::Error::InternalFault`] describing the first violation.
pub fn verify(graph: &Graph) -> Result<()> {
    check_edges(graph)?;
    for id in graph.nodes() {
        check_control(graph, id)?;
        check_merge_shape(graph, id)?;
    }
    check_reachability(graph)
}

fn check_edges(graph: &Graph) -> Result<()> {
    let mut counts: HashMap<(NodeId, NodeId), isize> = HashMap::new();
    for id in graph.nodes() {
        let node = &graph[id];
        for &input in node.inputs() {
            if !graph.is_alive(input) {
                return Err(internal_fault!(node = id, "input {} is deleted", input));
            }
            *counts.entry((input, id)).or_default() += 1;
        }
        for &user in node.usages() {
            if !graph.is_alive(user) {
                return Err(internal_fault!(node = id, "usage {} is deleted", user));
            }
            *counts.entry((id, user)).or_default() -= 1;
        }
    }
    if let Some(((node, user), _)) = counts.into_iter().find(|(_, count)| *count != 0) {
        return Err(internal_fault!(
            node = node,
            "usage count of {} disagrees with its inputs",
            user
        ));
    }
    Ok(())
}

fn check_control(graph: &Graph, id: NodeId) -> Result<()> {
    let node = &graph[id];
    let kind = node.kind();

    for successor in node.successor_ids() {
        match graph.get(successor) {
            None => {
                return Err(internal_fault!(node = id, "successor {} is deleted", successor));
            }
            Some(s) if s.predecessor() != Some(id) => {
                return Err(internal_fault!(
                    node = successor,
                    "predecessor link does not point back to {}",
                    id
                ));
            }
            Some(_) => {}
        }
    }

    if !kind.is_fixed() {
        if node.predecessor().is_some() || !node.successors().is_empty() {
            return Err(internal_fault!(node = id, "floating node has control edges"));
        }
        return Ok(());
    }

    if id == graph.start() || kind.is_merge() {
        if node.predecessor().is_some() {
            return Err(internal_fault!(node = id, "{} must not have a predecessor", kind));
        }
    } else {
        let Some(predecessor) = node.predecessor() else {
            return Err(internal_fault!(node = id, "fixed node without predecessor"));
        };
        let linked = graph
            .get(predecessor)
            .is_some_and(|p| p.successor_ids().any(|s| s == id));
        if !linked {
            return Err(internal_fault!(
                node = id,
                "predecessor {} has no successor link",
                predecessor
            ));
        }
    }

    let complete = match kind {
        NodeKind::If => node.successors().len() == 2 && node.successors().iter().all(Option::is_some),
        NodeKind::Invoke { .. } => node.successors().iter().all(Option::is_some) && node.next().is_some(),
        k if k.is_straight_line() => node.next().is_some(),
        _ => true,
    };
    if !complete {
        return Err(internal_fault!(node = id, "{} has an unconnected successor", kind));
    }
    Ok(())
}

fn check_merge_shape(graph: &Graph, id: NodeId) -> Result<()> {
    let node = &graph[id];
    match node.kind() {
        NodeKind::Merge | NodeKind::LoopBegin => {
            if node.inputs().is_empty() {
                return Err(internal_fault!(node = id, "merge without ends"));
            }
            let is_loop = matches!(node.kind(), NodeKind::LoopBegin);
            for (index, &end) in node.inputs().iter().enumerate() {
                let expected_back_edge = is_loop && index > 0;
                let ok = match graph.kind(end) {
                    NodeKind::End => !expected_back_edge,
                    NodeKind::LoopEnd => expected_back_edge,
                    _ => false,
                };
                if !ok {
                    return Err(internal_fault!(
                        node = id,
                        "input {} ({}) is not a valid merge end",
                        index,
                        graph.kind(end)
                    ));
                }
            }
        }
        NodeKind::End | NodeKind::LoopEnd => {
            if node.usages().len() != 1 || !graph.kind(node.usages()[0]).is_merge() {
                return Err(internal_fault!(node = id, "end must feed exactly one merge"));
            }
        }
        NodeKind::LoopExit => {
            let loop_begin = node.input(0).map(|l| graph.kind(l));
            if !matches!(loop_begin, Some(NodeKind::LoopBegin)) || node.inputs().len() != 1 {
                return Err(internal_fault!(node = id, "loop exit without loop begin"));
            }
        }
        NodeKind::Phi { .. } => {
            let Some(merge) = node.input(0) else {
                return Err(internal_fault!(node = id, "phi without merge"));
            };
            if !graph.kind(merge).is_merge() {
                return Err(internal_fault!(node = id, "phi input 0 is not a merge"));
            }
            let ends = graph[merge].inputs().len();
            let values = node.inputs().len() - 1;
            if values != ends {
                return Err(internal_fault!(
                    node = id,
                    "phi has {} values but merge {} has {} ends",
                    values,
                    merge,
                    ends
                ));
            }
        }
        NodeKind::FrameState { .. } => {
            if node.usages().len() > 1 {
                return Err(internal_fault!(
                    node = id,
                    "frame state has {} usages",
                    node.usages().len()
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Fixed nodes reachable from the start along successor and end-to-merge edges.
pub(crate) fn reachable_fixed(graph: &Graph) -> HashSet<NodeId> {
    let mut reached = HashSet::new();
    let mut worklist = vec![graph.start()];
    while let Some(id) = worklist.pop() {
        if !reached.insert(id) {
            continue;
        }
        let node = &graph[id];
        worklist.extend(node.successor_ids());
        if node.kind().is_end() {
            worklist.extend(
                node.usages()
                    .iter()
                    .copied()
                    .filter(|&u| graph.kind(u).is_merge()),
            );
        }
    }
    reached
}

fn check_reachability(graph: &Graph) -> Result<()> {
    let reached = reachable_fixed(graph);

    let mut live: HashSet<NodeId> = reached.clone();
    let mut worklist: Vec<NodeId> = reached.iter().copied().collect();
    for id in graph.nodes() {
        let anchor = match graph.kind(id) {
            NodeKind::Phi { .. } => graph[id].input(0),
            NodeKind::Guard { .. } => graph[id].input(1),
            _ => None,
        };
        if anchor.is_some_and(|a| reached.contains(&a)) {
            worklist.push(id);
        }
    }
    while let Some(id) = worklist.pop() {
        for &input in graph[id].inputs() {
            if live.insert(input) {
                worklist.push(input);
            }
        }
        live.insert(id);
    }

    for id in graph.nodes() {
        let node = &graph[id];
        if live.contains(&id) {
            continue;
        }
        if node.kind().is_fixed() {
            return Err(internal_fault!(node = id, "fixed node is unreachable from start"));
        }
        if !node.inputs().is_empty() {
            return Err(internal_fault!(node = id, "floating node is unreachable from start"));
        }
    }
    Ok(())
}

impl Graph {
    /// Checks the structural invariants of this graph; see [`verify`].
    ///
    /// # Errors
    ///
    /// Returns an internal fault describing the first violation.
    pub fn verify(&self) -> Result<()> {
        verify(self)
    }
}
