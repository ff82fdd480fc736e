//! Structural editing utilities on top of the raw edge API.
//!
//! These helpers keep the control-flow skeleton well formed while nodes are
//! inserted, removed or whole branches die:
//!
//! - straight-line insertion and removal of fixed nodes
//! - [`Graph::kill_cfg`]: delete a dead branch, remove its ends from merges (and
//!   the matching phi values), then collapse merges left with a single end
//! - [`Graph::add_merge_end`] / [`Graph::remove_end`]: keep every phi's value count
//!   equal to its merge's end count
//! - [`Graph::kill_unused_floating`]: recursive dead data removal

use std::collections::HashSet;

use crate::{
    ir::{
        graph::Graph,
        kind::NodeKind,
        node::{Node, NodeId},
    },
    Error, Result,
};

impl Graph {
    /// Inserts the detached straight-line node `new` directly before `fixed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `new` is not a detached straight-line node.
    pub fn insert_before(&mut self, fixed: NodeId, new: NodeId) -> Result<()> {
        self.check_detached(new)?;
        self.replace_at_predecessor(fixed, new)?;
        self.set_next(new, fixed)
    }

    /// Inserts the detached straight-line node `new` directly after `fixed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `fixed` has no next slot or `new` is not a
    /// detached straight-line node.
    pub fn insert_after(&mut self, fixed: NodeId, new: NodeId) -> Result<()> {
        self.check_detached(new)?;
        let next = self.node(fixed)?.next();
        self.set_successor(fixed, 0, Some(new))?;
        if let Some(next) = next {
            self.set_next(new, next)?;
        }
        Ok(())
    }

    fn check_detached(&self, new: NodeId) -> Result<()> {
        let node = self.node(new)?;
        if !node.kind().is_straight_line()
            || node.predecessor().is_some()
            || node.next().is_some()
        {
            return Err(Error::InvalidEdge {
                node: new,
                message: "expected a detached straight-line node".to_string(),
            });
        }
        Ok(())
    }

    /// Unlinks a straight-line fixed node from the control flow and deletes it.
    ///
    /// The node must not have usages; value-producing nodes are replaced first
    /// (see [`Graph::replace_fixed_with_floating`]).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEdge`] if the node is not straight-line
    /// - [`Error::NodeInUse`] if the node still has usages
    pub fn remove_fixed(&mut self, node: NodeId) -> Result<()> {
        let entry = self.node(node)?;
        if !entry.kind().is_straight_line() || entry.kind().is_merge() {
            return Err(Error::InvalidEdge {
                node,
                message: format!("{} cannot be unlinked", entry.kind()),
            });
        }
        if entry.has_usages() {
            return Err(Error::NodeInUse {
                node,
                usages: entry.usages().len(),
            });
        }

        let next = entry.next();
        let predecessor = entry.predecessor();
        self.set_successor(node, 0, None)?;
        if let Some(predecessor) = predecessor {
            let slot = self.successor_slot(predecessor, node)?;
            self.set_successor(predecessor, slot, next)?;
        }
        self.clear_inputs(node)?;
        self.delete(node)
    }

    /// Replaces a value-producing fixed node by a floating node and unlinks it.
    ///
    /// # Errors
    ///
    /// See [`Graph::remove_fixed`].
    pub fn replace_fixed_with_floating(&mut self, fixed: NodeId, floating: NodeId) -> Result<()> {
        self.replace_at_usages(fixed, floating)?;
        self.remove_fixed(fixed)
    }

    /// Replaces the straight-line node `old` with the detached straight-line node
    /// `new`, moving usages and control edges, then deletes `old`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `new` is not detached.
    pub fn replace_fixed(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.check_detached(new)?;
        self.replace_at_usages(old, new)?;
        let next = self.node(old)?.next();
        self.set_successor(old, 0, None)?;
        self.replace_at_predecessor(old, new)?;
        if let Some(next) = next {
            self.set_next(new, next)?;
        }
        self.clear_inputs(old)?;
        self.delete(old)
    }

    /// Distinct phis attached to `merge`.
    #[must_use]
    pub fn phis_of(&self, merge: NodeId) -> Vec<NodeId> {
        let Some(node) = self.get(merge) else {
            return Vec::new();
        };
        let mut phis: Vec<NodeId> = node
            .usages()
            .iter()
            .copied()
            .filter(|&u| self.kind(u).is_phi() && self[u].input(0) == Some(merge))
            .collect();
        phis.sort_unstable();
        phis.dedup();
        phis
    }

    /// Adds `end` as a new predecessor of `merge`, growing every phi by the value
    /// `value_for(phi)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `merge` is not a merge or `end` is not an end.
    pub fn add_merge_end(
        &mut self,
        merge: NodeId,
        end: NodeId,
        mut value_for: impl FnMut(NodeId) -> NodeId,
    ) -> Result<()> {
        if !self.node(merge)?.kind().is_merge() || !self.node(end)?.kind().is_end() {
            return Err(Error::InvalidEdge {
                node: merge,
                message: format!("cannot add {end} as merge end"),
            });
        }
        let phis = self.phis_of(merge);
        self.push_input(merge, end)?;
        for phi in phis {
            let value = value_for(phi);
            self.push_input(phi, value)?;
        }
        Ok(())
    }

    /// Removes `end` from `merge` together with the matching value of every phi.
    ///
    /// Returns the removed phi values. Does not collapse the merge; see
    /// [`Graph::collapse_merge`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `end` is not an input of `merge`.
    pub fn remove_end(&mut self, merge: NodeId, end: NodeId) -> Result<Vec<NodeId>> {
        let index = self
            .node(merge)?
            .inputs()
            .iter()
            .position(|&input| input == end)
            .ok_or_else(|| Error::InvalidEdge {
                node: merge,
                message: format!("{end} is not an end of this merge"),
            })?;

        let mut values = Vec::new();
        for phi in self.phis_of(merge) {
            values.push(self.remove_input(phi, index + 1)?);
        }
        self.remove_input(merge, index)?;
        Ok(values)
    }

    /// Replaces a merge that has a single forward end (and, for loops, no back
    /// edges) by a plain `Begin`.
    ///
    /// Phis are replaced by their only value, loop exits become `Begin`s.
    /// Returns `true` if the merge was collapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph around the merge is malformed.
    pub fn collapse_merge(&mut self, merge: NodeId) -> Result<bool> {
        let node = self.node(merge)?;
        if !node.kind().is_merge() || node.inputs().len() != 1 {
            return Ok(false);
        }
        let end = node.inputs()[0];
        let next = node.next();

        if matches!(node.kind(), NodeKind::LoopBegin) {
            let exits: Vec<NodeId> = node
                .usages()
                .iter()
                .copied()
                .filter(|&u| matches!(self.kind(u), NodeKind::LoopExit))
                .collect();
            for exit in exits {
                let begin = self.add(Node::new(NodeKind::Begin, Vec::new()))?;
                self.replace_fixed(exit, begin)?;
            }
        }

        for phi in self.phis_of(merge) {
            let value = self.node(phi)?.input(1).ok_or_else(|| {
                internal_fault!(node = phi, "phi without value at single-end merge")
            })?;
            if value == phi {
                self.delete_forced(phi)?;
            } else {
                self.replace_at_usages(phi, value)?;
                self.clear_inputs(phi)?;
                self.delete(phi)?;
            }
        }

        let predecessor = self
            .node(end)?
            .predecessor()
            .ok_or_else(|| internal_fault!(node = end, "merge end without predecessor"))?;
        let begin = self.add(Node::new(NodeKind::Begin, Vec::new()))?;
        self.replace_at_usages(merge, begin)?;
        self.set_successor(merge, 0, None)?;
        let slot = self.successor_slot(predecessor, end)?;
        self.set_successor(predecessor, slot, Some(begin))?;
        if let Some(next) = next {
            self.set_next(begin, next)?;
        }
        self.clear_inputs(merge)?;
        self.delete(end)?;
        self.delete(merge)?;
        Ok(true)
    }

    /// Deletes the control-flow region starting at `node`.
    ///
    /// Every fixed node reachable from `node` dies, except that reaching the end
    /// of a merge that still has other live ends only removes that end (and the
    /// matching phi values). Floating nodes used only by dead nodes die as well.
    /// Merges left with a single end are collapsed afterwards.
    ///
    /// # Errors
    ///
    /// Returns an internal fault if a live fixed node depends on the dead region.
    pub fn kill_cfg(&mut self, node: NodeId) -> Result<()> {
        if let Some(predecessor) = self.node(node)?.predecessor() {
            let slot = self.successor_slot(predecessor, node)?;
            self.set_successor(predecessor, slot, None)?;
        }

        let mut dead = Vec::new();
        let mut seen = HashSet::new();
        let mut touched = Vec::new();
        let mut inputs = Vec::new();
        let mut worklist = vec![node];
        while let Some(current) = worklist.pop() {
            if !seen.insert(current) {
                continue;
            }
            dead.push(current);

            if self.kind(current).is_end() {
                let merge = self[current]
                    .usages()
                    .iter()
                    .copied()
                    .find(|&u| self.kind(u).is_merge());
                if let Some(merge) = merge {
                    let forward_loop_entry = matches!(self.kind(merge), NodeKind::LoopBegin)
                        && self[merge].input(0) == Some(current);
                    if !seen.contains(&merge) {
                        inputs.extend(self.remove_end(merge, current)?);
                        if forward_loop_entry || self[merge].inputs().is_empty() {
                            worklist.push(merge);
                        } else {
                            touched.push(merge);
                        }
                    }
                }
            }
            worklist.extend(self[current].successor_ids());
        }

        let mut dead_set: HashSet<NodeId> = dead.iter().copied().collect();
        let mut index = 0;
        while index < dead.len() {
            let current = dead[index];
            index += 1;
            for &user in self[current].usages() {
                if dead_set.contains(&user) {
                    continue;
                }
                if self.kind(user).is_fixed() {
                    return Err(internal_fault!(
                        node = user,
                        "live fixed node uses dead {}",
                        current
                    ));
                }
                dead_set.insert(user);
                dead.push(user);
            }
        }

        for &current in &dead {
            inputs.extend(
                self[current]
                    .inputs()
                    .iter()
                    .copied()
                    .filter(|i| !dead_set.contains(i)),
            );
        }
        for &current in &dead {
            if self.is_alive(current) {
                self.delete_forced(current)?;
            }
        }
        for input in inputs {
            self.kill_unused_floating(input)?;
        }
        for merge in touched {
            if self.is_alive(merge) {
                self.collapse_merge(merge)?;
            }
        }
        Ok(())
    }

    /// Returns `true` if `id` is a floating node that nothing but itself uses.
    ///
    /// Parameters are never dead: they describe the method signature. Guards are
    /// never dead either: they stay alive as long as their anchor does.
    #[must_use]
    pub fn is_dead_floating(&self, id: NodeId) -> bool {
        let Some(node) = self.get(id) else {
            return false;
        };
        node.kind().is_floating()
            && !matches!(node.kind(), NodeKind::Parameter { .. } | NodeKind::Guard { .. })
            && node.usages().iter().all(|&u| u == id)
    }

    /// Deletes `node` if it is dead floating data, then its inputs recursively.
    ///
    /// Returns the number of deleted nodes.
    ///
    /// # Errors
    ///
    /// Only fails on a malformed graph.
    pub fn kill_unused_floating(&mut self, node: NodeId) -> Result<usize> {
        let mut removed = 0;
        let mut worklist = vec![node];
        while let Some(current) = worklist.pop() {
            if !self.is_dead_floating(current) {
                continue;
            }
            let inputs: Vec<NodeId> = self[current].inputs().to_vec();
            self.delete_forced(current)?;
            removed += 1;
            worklist.extend(inputs.into_iter().filter(|&i| i != current));
        }
        Ok(removed)
    }

    /// The straight-line fixed chain starting at `from` (inclusive), ending at
    /// the first node that is not straight-line or whose next node is a begin.
    #[must_use]
    pub fn straight_line_from(&self, from: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(from);
        while let Some(id) = current {
            let Some(node) = self.get(id) else {
                break;
            };
            chain.push(id);
            if !node.kind().is_straight_line() {
                break;
            }
            current = node
                .next()
                .filter(|&next| !self.kind(next).is_begin());
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        builder::GraphBuilder,
        value::{Constant, ValueKind},
    };

    #[test]
    fn test_insert_and_remove_fixed() -> Result<()> {
        let mut b = GraphBuilder::new();
        let ret = b.ret(None)?;
        let mut graph = b.finish();

        let never = graph.add(Node::new(
            NodeKind::NeverPartOfCompilation {
                message: "x".into(),
            },
            vec![],
        ))?;
        graph.insert_before(ret, never)?;
        assert_eq!(graph[graph.start()].next(), Some(never));
        assert_eq!(graph[never].next(), Some(ret));

        graph.remove_fixed(never)?;
        assert_eq!(graph[graph.start()].next(), Some(ret));
        assert!(!graph.is_alive(never));
        Ok(())
    }

    #[test]
    fn test_kill_branch_collapses_merge() -> Result<()> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int)?;
        let one = b.int(1)?;
        let two = b.int(2)?;
        let (t, f) = b.branch(p)?;
        b.switch_to(t);
        let e1 = b.end()?;
        b.switch_to(f);
        let e2 = b.end()?;
        let merge = b.merge(&[e1, e2])?;
        let phi = b.phi(ValueKind::Int, merge, &[one, two])?;
        let ret = b.ret(Some(phi))?;
        let mut graph = b.finish();

        graph.kill_cfg(f)?;

        assert!(!graph.is_alive(merge));
        assert!(!graph.is_alive(phi));
        assert_eq!(graph[ret].inputs(), &[one]);
        assert!(!graph.is_alive(two));
        assert_eq!(graph[t].next().map(|n| graph.kind(n).clone()), Some(NodeKind::Begin));
        Ok(())
    }

    #[test]
    fn test_add_merge_end_grows_phis() -> Result<()> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int)?;
        let (t, f) = b.branch(p)?;
        b.switch_to(t);
        let e1 = b.end()?;
        let merge = b.merge(&[e1])?;
        let phi = b.phi(ValueKind::Int, merge, &[p])?;
        b.ret(Some(phi))?;
        b.switch_to(f);
        let e2 = b.end()?;
        let mut graph = b.finish();

        let zero = graph.constant(Constant::Int(0))?;
        graph.add_merge_end(merge, e2, |_| zero)?;
        assert_eq!(graph[phi].inputs(), &[merge, p, zero]);
        assert_eq!(graph[merge].inputs(), &[e1, e2]);

        graph.remove_end(merge, e1)?;
        assert_eq!(graph[phi].inputs(), &[merge, zero]);
        Ok(())
    }

    #[test]
    fn test_kill_unused_floating_recurses() -> Result<()> {
        let mut b = GraphBuilder::new();
        let x = b.int(5)?;
        let y = b.int(6)?;
        let sum = b.binary(crate::ir::BinaryOp::Add, ValueKind::Int, x, y)?;
        b.ret(None)?;
        let mut graph = b.finish();
        assert_eq!(graph.kill_unused_floating(sum)?, 3);
        assert!(!graph.is_alive(x));
        Ok(())
    }
}
