//! Canonicalization: local, fixpoint-driven simplification of graph nodes.
//!
//! The [`Canonicalizer`] runs a worklist over the graph. For each node it looks
//! up the rule registered for the node's class in a [`CanonicalizerTable`] and
//! applies it. A rule sees only the node and its immediate neighbourhood and
//! answers with a [`Canonical`]:
//!
//! ```text
//!   Unchanged       nothing to do
//!   Replaced(n)     usages are rewired to n, former usages are re-queued
//!   Simplified      the rule edited the graph itself (branch folding, merge
//!                   collapsing, ...); the neighbourhood is re-queued
//! ```
//!
//! Around the rules the worklist also removes dead floating nodes (and re-queues
//! their inputs) and merges structurally equal value-numberable nodes.
//!
//! # Termination
//!
//! Every applied rule either removes nodes or moves constants towards the
//! leaves, so the loop reaches a fixpoint. A configurable step limit stops
//! pathological inputs; hitting it is logged, not an error.
//!
//! # Example
//!
//! ```rust
//! use tiergraph::canonical::Canonicalizer;
//! use tiergraph::ir::{BinaryOp, Constant, GraphBuilder, ValueKind};
//!
//! let mut b = GraphBuilder::new();
//! let x = b.int(3)?;
//! let y = b.int(5)?;
//! let or = b.binary(BinaryOp::Or, ValueKind::Int, x, y)?;
//! let ret = b.ret(Some(or))?;
//! let mut graph = b.finish();
//!
//! Canonicalizer::default().canonicalize(&mut graph)?;
//! let folded = graph[ret].input(0).unwrap();
//! assert_eq!(graph.constant_of(folded), Some(Constant::Int(7)));
//! # Ok::<(), tiergraph::Error>(())
//! ```

mod arithmetic;
mod call;
mod control;
mod table;

use std::collections::{HashSet, VecDeque};

use log::{trace, warn};

pub use table::{CanonicalRule, CanonicalizerTable};

use crate::{
    compiler::{EventKind, EventLog},
    ir::{Graph, NodeClass, NodeId},
    Result,
};

/// Default maximum number of worklist steps per run.
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

/// Outcome of applying a canonicalization rule to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    /// No canonicalization possible.
    Unchanged,
    /// The node is equivalent to this (existing or new) node.
    Replaced(NodeId),
    /// The rule changed the graph in place.
    Simplified,
}

/// Counters of one canonicalizer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalStats {
    /// Worklist steps taken.
    pub steps: usize,
    /// Nodes replaced by an equivalent node.
    pub replaced: usize,
    /// In-place simplifications.
    pub simplified: usize,
    /// Dead nodes removed.
    pub removed: usize,
    /// The step limit stopped the run before the fixpoint.
    pub limit_hit: bool,
}

impl CanonicalStats {
    /// Returns `true` if the run changed the graph.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.replaced + self.simplified + self.removed > 0
    }
}

/// Worklist-driven canonicalization engine.
pub struct Canonicalizer<'a> {
    table: CanonicalizerTable,
    step_limit: usize,
    events: Option<&'a EventLog>,
}

impl Default for Canonicalizer<'_> {
    fn default() -> Self {
        Self::new(CanonicalizerTable::default())
    }
}

impl<'a> Canonicalizer<'a> {
    /// Creates a canonicalizer using `table`.
    #[must_use]
    pub fn new(table: CanonicalizerTable) -> Self {
        Self {
            table,
            step_limit: DEFAULT_STEP_LIMIT,
            events: None,
        }
    }

    /// Sets the maximum number of worklist steps.
    #[must_use]
    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Records transformations into `events`.
    #[must_use]
    pub fn with_events(mut self, events: &'a EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// The rule table.
    #[must_use]
    pub fn table(&self) -> &CanonicalizerTable {
        &self.table
    }

    /// Canonicalizes every node of `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error only if a rule met a malformed graph.
    pub fn canonicalize(&self, graph: &mut Graph) -> Result<CanonicalStats> {
        let seeds: Vec<NodeId> = graph.nodes().collect();
        self.canonicalize_nodes(graph, seeds)
    }

    /// Canonicalizes starting from `seeds` only (incremental run).
    ///
    /// # Errors
    ///
    /// Returns an error only if a rule met a malformed graph.
    pub fn canonicalize_nodes(
        &self,
        graph: &mut Graph,
        seeds: impl IntoIterator<Item = NodeId>,
    ) -> Result<CanonicalStats> {
        let mut run = Run {
            worklist: VecDeque::new(),
            queued: HashSet::new(),
            stats: CanonicalStats::default(),
        };
        for seed in seeds {
            run.push(seed);
        }

        while let Some(id) = run.pop() {
            if !graph.is_alive(id) {
                continue;
            }
            run.stats.steps += 1;
            if run.stats.steps > self.step_limit {
                warn!(
                    "canonicalizer step limit {} reached with {} queued nodes",
                    self.step_limit,
                    run.worklist.len() + 1
                );
                if let Some(events) = self.events {
                    events.warn(format!("canonicalizer step limit {} reached", self.step_limit));
                }
                run.stats.limit_hit = true;
                break;
            }
            self.step(graph, id, &mut run)?;
        }
        Ok(run.stats)
    }

    fn step(&self, graph: &mut Graph, id: NodeId, run: &mut Run) -> Result<()> {
        if graph.is_dead_floating(id) {
            self.retire(graph, id, run)?;
            return Ok(());
        }

        if let Some(existing) = graph.find_duplicate(id) {
            trace!("{id} is a duplicate of {existing}");
            self.replace(graph, id, existing, run)?;
            return Ok(());
        }

        let class = graph[id].class();
        let Some(rule) = self.table.lookup(class) else {
            return Ok(());
        };

        let mut neighbours: Vec<NodeId> = graph[id].inputs().to_vec();
        neighbours.extend_from_slice(graph[id].usages());
        if let Some(predecessor) = graph[id].predecessor() {
            neighbours.push(predecessor);
        }
        neighbours.extend(graph[id].successor_ids());
        let bound = graph.id_bound();

        match rule(graph, id)? {
            Canonical::Unchanged => {}
            Canonical::Replaced(replacement) if replacement == id => {}
            Canonical::Replaced(replacement) => {
                if graph.kind(id).is_fixed() {
                    return Err(internal_fault!(
                        node = id,
                        "rule for {} replaced a fixed node",
                        class
                    ));
                }
                let folded = graph.constant_of(replacement).is_some();
                trace!("{id} ({}) -> {replacement}", graph.kind(id));
                if let Some(events) = self.events {
                    let kind = if class == NodeClass::Guard {
                        EventKind::GuardEliminated
                    } else if folded {
                        EventKind::NodeFolded
                    } else {
                        EventKind::NodeSimplified
                    };
                    events
                        .record(kind)
                        .method(graph.method())
                        .node(id)
                        .message(format!("{} -> {}", graph.kind(id), graph.kind(replacement)));
                }
                self.replace(graph, id, replacement, run)?;
            }
            Canonical::Simplified => {
                trace!("{id} ({class}) simplified in place");
                run.stats.simplified += 1;
                if let Some(events) = self.events {
                    let kind = match class {
                        NodeClass::If => EventKind::BranchFolded,
                        NodeClass::Merge | NodeClass::LoopBegin => EventKind::MergeCollapsed,
                        NodeClass::CallTarget => EventKind::CallDevirtualized,
                        NodeClass::FixedGuard => EventKind::GuardEliminated,
                        _ => EventKind::NodeSimplified,
                    };
                    events
                        .record(kind)
                        .method(graph.method())
                        .node(id)
                        .message(format!("{class} {id}"));
                }
                run.push(id);
                for neighbour in neighbours {
                    run.push(neighbour);
                }
                for fresh in bound..graph.id_bound() {
                    run.push(NodeId::new(fresh));
                }
            }
        }
        Ok(())
    }

    fn replace(&self, graph: &mut Graph, id: NodeId, replacement: NodeId, run: &mut Run) -> Result<()> {
        let users: Vec<NodeId> = graph[id].usages().to_vec();
        graph.replace_at_usages(id, replacement)?;
        run.stats.replaced += 1;
        for user in users {
            run.push(user);
        }
        run.push(replacement);

        let unused = graph[id].usages().iter().all(|&u| u == id);
        if unused && graph.kind(id).is_floating() {
            self.retire(graph, id, run)?;
        }
        Ok(())
    }

    fn retire(&self, graph: &mut Graph, id: NodeId, run: &mut Run) -> Result<()> {
        let inputs: Vec<NodeId> = graph[id].inputs().to_vec();
        graph.delete_forced(id)?;
        run.stats.removed += 1;
        if let Some(events) = self.events {
            events.record(EventKind::NodeRemoved).method(graph.method()).node(id);
        }
        for input in inputs {
            run.push(input);
        }
        Ok(())
    }
}

struct Run {
    worklist: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    stats: CanonicalStats,
}

impl Run {
    fn push(&mut self, id: NodeId) {
        if self.queued.insert(id) {
            self.worklist.push_back(id);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let id = self.worklist.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }
}

/// Canonicalizes `graph` with the built-in rules.
///
/// # Errors
///
/// Returns an error only if a rule met a malformed graph.
pub fn canonicalize(graph: &mut Graph) -> Result<CanonicalStats> {
    Canonicalizer::default().canonicalize(graph)
}
