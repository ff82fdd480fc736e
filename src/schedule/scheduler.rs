//! Placement and ordering of every node.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use log::trace;

use crate::{
    compiler::SchedulePolicy,
    ir::{Graph, NodeId, NodeKind},
    schedule::{
        cfg::{BlockId, ControlFlowGraph},
        dominators::DominatorTree,
        loops::LoopTree,
    },
    Result,
};

/// The linearized form of a graph: a block for every node and a total order
/// of the nodes inside each block.
#[derive(Debug, Clone)]
pub struct Schedule {
    policy: SchedulePolicy,
    cfg: ControlFlowGraph,
    dominators: DominatorTree,
    loops: LoopTree,
    block_of: HashMap<NodeId, BlockId>,
    order: Vec<Vec<NodeId>>,
}

impl Schedule {
    /// The policy the floating nodes were placed with.
    #[must_use]
    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// The block graph.
    #[must_use]
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    /// The dominator tree of the block graph.
    #[must_use]
    pub fn dominators(&self) -> &DominatorTree {
        &self.dominators
    }

    /// Loop nesting of the block graph.
    #[must_use]
    pub fn loops(&self) -> &LoopTree {
        &self.loops
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.order.len()
    }

    /// Block ids in reverse postorder.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> {
        (0..self.order.len()).map(BlockId::new)
    }

    /// The block `node` was placed in.
    #[must_use]
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.block_of.get(&node).copied()
    }

    /// The nodes of `block` in emission order.
    #[must_use]
    pub fn nodes(&self, block: BlockId) -> &[NodeId] {
        self.order.get(block.index()).map_or(&[], Vec::as_slice)
    }

    /// Number of scheduled nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.block_of.len()
    }

    /// Checks the schedule against `graph`.
    ///
    /// - every live node is scheduled exactly once
    /// - fixed nodes keep their block and control order
    /// - every input is available: its block dominates the user's block, and
    ///   comes earlier when it is the same block
    /// - phi value `i` is available at the end of the merge's `i`-th predecessor
    ///
    /// # Errors
    ///
    /// Returns an internal fault naming the first offending node.
    pub fn validate(&self, graph: &Graph) -> Result<()> {
        let mut position: HashMap<NodeId, usize> = HashMap::new();
        for block in self.blocks() {
            for (index, &node) in self.nodes(block).iter().enumerate() {
                if position.insert(node, index).is_some() {
                    return Err(internal_fault!(node = node, "scheduled twice"));
                }
                if self.block_of(node) != Some(block) {
                    return Err(internal_fault!(node = node, "block map disagrees with order"));
                }
            }
            let fixed: Vec<NodeId> = self
                .nodes(block)
                .iter()
                .copied()
                .filter(|&n| graph.kind(n).is_fixed())
                .collect();
            if fixed != self.cfg.block(block).nodes() {
                return Err(internal_fault!(
                    node = self.cfg.block(block).begin(),
                    "fixed nodes of {} out of control order",
                    block
                ));
            }
        }
        for node in graph.nodes() {
            if !position.contains_key(&node) {
                return Err(internal_fault!(node = node, "{} not scheduled", graph.kind(node)));
            }
        }

        let available = |value: NodeId, block: BlockId, before: Option<usize>| -> bool {
            let Some(value_block) = self.block_of(value) else {
                return false;
            };
            if value_block == block {
                before.map_or(true, |p| position[&value] < p)
            } else {
                self.dominators.dominates(value_block, block)
            }
        };

        for node in graph.nodes() {
            let kind = graph.kind(node);
            if kind.is_merge() {
                continue;
            }
            let Some(block) = self.block_of(node) else {
                continue;
            };
            let here = position[&node];
            for (index, &input) in graph[node].inputs().iter().enumerate() {
                let ok = if kind.is_phi() && index > 0 {
                    let merge = graph[node].inputs()[0];
                    match graph[merge].inputs().get(index - 1) {
                        Some(&end) => self
                            .block_of(end)
                            .is_some_and(|pred| available(input, pred, None)),
                        None => false,
                    }
                } else {
                    available(input, block, Some(here))
                };
                if !ok {
                    return Err(internal_fault!(
                        node = node,
                        "input {} ({}) is not available in {}",
                        input,
                        graph.kind(input),
                        block
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.blocks() {
            let depth = self.loops.loop_depth(block);
            write!(f, "{block}")?;
            if depth > 0 {
                write!(f, " (loop depth {depth})")?;
            }
            write!(f, ":")?;
            for node in self.nodes(block) {
                write!(f, " {node}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Schedules `graph` with `policy`.
///
/// Floating nodes are placed as follows. Phis stay at their merge and guards
/// at their anchor. Every other node's earliest block is the deepest block (in
/// the dominator tree) among its inputs' blocks. `Earliest` uses it directly.
/// `Latest` computes the common dominator of all usage blocks and walks up
/// from it towards the earliest block, taking the block with the smallest loop
/// depth (the latest one on ties). Floating reads always use the earliest
/// block.
///
/// # Errors
///
/// Returns an internal fault for floating cycles that do not pass through a
/// phi, and for nodes that depend on unreachable control flow.
pub fn schedule(graph: &Graph, policy: SchedulePolicy) -> Result<Schedule> {
    let cfg = ControlFlowGraph::build(graph)?;
    let dominators = DominatorTree::compute(&cfg);
    let loops = LoopTree::compute(graph, &cfg, &dominators)?;

    let mut block_of: HashMap<NodeId, BlockId> = HashMap::new();
    for block in cfg.blocks() {
        for &node in block.nodes() {
            block_of.insert(node, block.id());
        }
    }
    for node in graph.nodes() {
        if graph.kind(node).is_fixed() && !block_of.contains_key(&node) {
            return Err(internal_fault!(node = node, "fixed node is unreachable"));
        }
    }

    // Earliest placement; `topological` lists floating nodes inputs first.
    let mut topological = Vec::new();
    let mut state: HashMap<NodeId, Visit> = HashMap::new();
    for node in graph.nodes() {
        if graph.kind(node).is_floating() {
            place_earliest(
                graph,
                &cfg,
                &dominators,
                node,
                &mut block_of,
                &mut state,
                &mut topological,
            )?;
        }
    }

    if policy == SchedulePolicy::Latest {
        for &node in topological.iter().rev() {
            let kind = graph.kind(node);
            if is_pinned(kind) || matches!(kind, NodeKind::FloatingRead { .. }) {
                continue;
            }
            let earliest = block_of[&node];
            let Some(latest) = latest_block(graph, &dominators, &block_of, node) else {
                continue;
            };
            if !dominators.dominates(earliest, latest) {
                continue;
            }
            let mut best = latest;
            for candidate in dominators.dominators(latest) {
                if loops.loop_depth(candidate) < loops.loop_depth(best) {
                    best = candidate;
                }
                if candidate == earliest {
                    break;
                }
            }
            trace!("{node}: earliest {earliest}, latest {latest}, placed {best}");
            block_of.insert(node, best);
        }
    }

    let mut floating_in: Vec<Vec<NodeId>> = vec![Vec::new(); cfg.len()];
    for &node in &topological {
        floating_in[block_of[&node].index()].push(node);
    }
    let order = cfg
        .blocks()
        .iter()
        .map(|block| {
            let floating = &floating_in[block.id().index()];
            order_block(graph, block.nodes(), floating, &block_of, block.id())
        })
        .collect();

    Ok(Schedule {
        policy,
        cfg,
        dominators,
        loops,
        block_of,
        order,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done,
}

fn is_pinned(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::Phi { .. } | NodeKind::Guard { .. })
}

/// The fixed node a pinned floating node is attached to.
fn pin(graph: &Graph, node: NodeId) -> Option<NodeId> {
    match graph.kind(node) {
        NodeKind::Phi { .. } => graph[node].input(0),
        NodeKind::Guard { .. } => graph[node].input(1),
        _ => None,
    }
}

/// Depth-first placement over inputs with an explicit stack.
fn place_earliest(
    graph: &Graph,
    cfg: &ControlFlowGraph,
    dominators: &DominatorTree,
    root: NodeId,
    block_of: &mut HashMap<NodeId, BlockId>,
    state: &mut HashMap<NodeId, Visit>,
    topological: &mut Vec<NodeId>,
) -> Result<()> {
    if state.contains_key(&root) {
        return Ok(());
    }
    let mut stack = vec![(root, false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            let block = if is_pinned(graph.kind(node)) {
                pin(graph, node)
                    .and_then(|anchor| block_of.get(&anchor).copied())
                    .ok_or_else(|| internal_fault!(node = node, "anchor is not scheduled"))?
            } else {
                let mut deepest = cfg.entry();
                for input in graph[node].inputs() {
                    let Some(&block) = block_of.get(input) else {
                        return Err(internal_fault!(node = node, "input {} has no block", input));
                    };
                    if dominators.depth(block) > dominators.depth(deepest) {
                        deepest = block;
                    }
                }
                deepest
            };
            block_of.insert(node, block);
            state.insert(node, Visit::Done);
            topological.push(node);
            continue;
        }

        match state.get(&node) {
            Some(Visit::Done) => continue,
            Some(Visit::Active) => {
                return Err(internal_fault!(node = node, "floating cycle without a phi"));
            }
            None => {}
        }
        state.insert(node, Visit::Active);
        stack.push((node, true));
        if is_pinned(graph.kind(node)) {
            continue;
        }
        for &input in graph[node].inputs().iter().rev() {
            if !graph.kind(input).is_floating() {
                continue;
            }
            match state.get(&input) {
                Some(Visit::Done) => {}
                Some(Visit::Active) => {
                    return Err(internal_fault!(node = input, "floating cycle without a phi"));
                }
                None => stack.push((input, false)),
            }
        }
    }

    Ok(())
}

/// Common dominator of the blocks where `node` is used, `None` if unused.
fn latest_block(
    graph: &Graph,
    dominators: &DominatorTree,
    block_of: &HashMap<NodeId, BlockId>,
    node: NodeId,
) -> Option<BlockId> {
    let mut latest: Option<BlockId> = None;
    let mut visit = |block: BlockId| {
        latest = Some(latest.map_or(block, |l| dominators.lca(l, block)));
    };
    for &user in graph[node].usages() {
        if graph.kind(user).is_phi() {
            let merge = graph[user].input(0)?;
            for (index, &input) in graph[user].inputs().iter().enumerate().skip(1) {
                if input != node {
                    continue;
                }
                let end = *graph[merge].inputs().get(index - 1)?;
                visit(*block_of.get(&end)?);
            }
        } else {
            visit(*block_of.get(&user)?);
        }
    }
    latest
}

/// Orders one block: begin, phis, then each fixed node preceded by its
/// not yet emitted in-block floating inputs. Floating nodes nothing in the
/// block needs go right before the last fixed node, or right after it when
/// they depend on its value.
fn order_block(
    graph: &Graph,
    fixed: &[NodeId],
    floating: &[NodeId],
    block_of: &HashMap<NodeId, BlockId>,
    block: BlockId,
) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(fixed.len() + floating.len());
    let mut emitted: HashSet<NodeId> = HashSet::new();

    let mut emit = |node: NodeId, order: &mut Vec<NodeId>| {
        let mut stack = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                if emitted.insert(current) {
                    order.push(current);
                }
                continue;
            }
            if emitted.contains(&current) {
                continue;
            }
            stack.push((current, true));
            // Phi values flow in from the predecessors.
            if graph.kind(current).is_phi() {
                continue;
            }
            for &input in graph[current].inputs().iter().rev() {
                if graph.kind(input).is_floating()
                    && block_of.get(&input) == Some(&block)
                    && !emitted.contains(&input)
                {
                    stack.push((input, false));
                }
            }
        }
    };

    let Some((&begin, rest)) = fixed.split_first() else {
        return order;
    };
    emit(begin, &mut order);
    for &phi in floating.iter().filter(|&&n| graph.kind(n).is_phi()) {
        emit(phi, &mut order);
    }
    let Some((&last, middle)) = rest.split_last() else {
        for &node in floating {
            emit(node, &mut order);
        }
        return order;
    };
    for &node in middle {
        emit(node, &mut order);
    }
    for &input in graph[last].inputs() {
        if graph.kind(input).is_floating() && block_of.get(&input) == Some(&block) {
            emit(input, &mut order);
        }
    }
    let after_last = dependents_of(graph, last, floating);
    for &node in floating.iter().filter(|n| !after_last.contains(n)) {
        emit(node, &mut order);
    }
    emit(last, &mut order);
    for &node in floating.iter().filter(|n| after_last.contains(n)) {
        emit(node, &mut order);
    }
    order
}

/// Non-phi nodes of `floating` that use `value` directly or through each other.
///
/// When the last fixed node of a block produces a value (a straight-line node
/// followed by a begin), these must come after it.
fn dependents_of(graph: &Graph, value: NodeId, floating: &[NodeId]) -> HashSet<NodeId> {
    let mut dependents = HashSet::new();
    let mut grew = true;
    while grew {
        grew = false;
        for &node in floating {
            if dependents.contains(&node) || graph.kind(node).is_phi() {
                continue;
            }
            if graph[node]
                .inputs()
                .iter()
                .any(|&input| input == value || dependents.contains(&input))
            {
                dependents.insert(node);
                grew = true;
            }
        }
    }
    dependents
}
