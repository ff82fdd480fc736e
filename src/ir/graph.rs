//! The node arena of one compilation unit.
//!
//! [`Graph`] owns every node of a method. Nodes live in a growable arena and are
//! addressed by [`NodeId`]; the graph is the only place where edges are created or
//! removed, so it maintains the inverse edges as part of every mutation:
//!
//! - `usages`: a node `U` appears in `N.usages` exactly as many times as `N`
//!   appears in `U.inputs`
//! - `predecessor`: a fixed node `S` has predecessor `P` exactly when one of
//!   `P`'s successor slots holds `S`
//!
//! # Value Numbering
//!
//! Side-effect free floating nodes are interned through [`Graph::unique`]: a
//! request for a node that is structurally equal (same kind, same inputs) to a
//! live node returns the existing one. The interning table is validated lazily:
//! entries whose node was deleted or whose inputs changed are ignored on lookup.
//!
//! # Example
//!
//! ```rust
//! use tiergraph::ir::{BinaryOp, Constant, Graph, Node, NodeKind, ValueKind};
//!
//! let mut graph = Graph::new();
//! let a = graph.unique(Node::new(NodeKind::Constant(Constant::Int(3)), vec![]))?;
//! let b = graph.unique(Node::new(NodeKind::Constant(Constant::Int(3)), vec![]))?;
//! assert_eq!(a, b);
//!
//! let or = graph.add(Node::new(
//!     NodeKind::Binary { op: BinaryOp::Or, kind: ValueKind::Int },
//!     vec![a, a],
//! ))?;
//! assert_eq!(graph[a].usages(), &[or, or]);
//! # Ok::<(), tiergraph::Error>(())
//! ```

use std::{collections::HashMap, ops::Index};

use crate::{
    ir::{
        kind::{NodeCategory, NodeClass, NodeKind, NodeTraits},
        node::{Node, NodeId},
        value::{Constant, MethodId, ValueKind},
    },
    Error, Result,
};

/// Structural identity of a value-numberable node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ValueKey {
    kind: NodeKind,
    inputs: Vec<NodeId>,
}

impl ValueKey {
    fn of(node: &Node) -> Self {
        Self {
            kind: node.kind.clone(),
            inputs: node.inputs.clone(),
        }
    }
}

/// A program graph: an arena of nodes with bidirectional edges.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    live: usize,
    start: NodeId,
    method: Option<MethodId>,
    gvn: HashMap<ValueKey, NodeId>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates a graph that contains only its `Start` node.
    #[must_use]
    pub fn new() -> Self {
        let start = Node::new(NodeKind::Start, Vec::new());
        Self {
            nodes: vec![Some(start)],
            live: 1,
            start: NodeId::new(0),
            method: None,
            gvn: HashMap::new(),
        }
    }

    /// Creates an empty graph for `method`.
    #[must_use]
    pub fn for_method(method: MethodId) -> Self {
        let mut graph = Self::new();
        graph.method = Some(method);
        graph
    }

    /// The method this graph was built for, if any.
    #[must_use]
    pub fn method(&self) -> Option<MethodId> {
        self.method
    }

    /// Sets the method this graph belongs to.
    pub fn set_method(&mut self, method: Option<MethodId>) {
        self.method = method;
    }

    /// The unique `Start` node.
    #[must_use]
    pub fn start(&self) -> NodeId {
        self.start
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.live
    }

    /// One past the largest id ever allocated; valid as a dense map size.
    #[must_use]
    pub fn id_bound(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if `id` refers to a live node.
    #[must_use]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Resolves `id`, returning `None` for deleted or unknown ids.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    /// Resolves `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeletedNode`] if the node does not exist.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(Error::DeletedNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(Error::DeletedNode(id))
    }

    /// Shorthand for `graph[id].kind()`.
    ///
    /// # Panics
    ///
    /// Panics if the node was deleted.
    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self[id].kind
    }

    /// Iterates over all live node ids in allocation order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| NodeId::new(index))
    }

    /// Iterates over the live nodes of one class.
    pub fn nodes_of(&self, class: NodeClass) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes().filter(move |&id| self[id].class() == class)
    }

    /// Iterates over the live nodes of one category.
    pub fn nodes_in(&self, category: NodeCategory) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes().filter(move |&id| self[id].category() == category)
    }

    /// Iterates over the live nodes that have all of `traits`.
    pub fn nodes_with(&self, traits: NodeTraits) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes().filter(move |&id| self[id].traits().contains(traits))
    }

    /// Adds `node` to the graph and registers it as a usage of its inputs.
    ///
    /// Successor slots of the template are reset; connect them with
    /// [`Graph::set_successor`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeletedNode`] if an input does not exist.
    pub fn add(&mut self, mut node: Node) -> Result<NodeId> {
        for &input in &node.inputs {
            self.node(input)?;
        }

        let id = NodeId::new(self.nodes.len());
        for &input in &node.inputs {
            self.node_mut(input)?.usages.push(id);
        }

        node.usages.clear();
        node.predecessor = None;
        node.successors.iter_mut().for_each(|slot| *slot = None);
        self.nodes.push(Some(node));
        self.live += 1;
        Ok(id)
    }

    /// Adds `node` unless a structurally equal node already exists.
    ///
    /// Only value-numberable kinds are interned; other nodes are always added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeletedNode`] if an input does not exist.
    pub fn unique(&mut self, node: Node) -> Result<NodeId> {
        if !node.kind.is_value_numberable() {
            return self.add(node);
        }

        let key = ValueKey::of(&node);
        if let Some(existing) = self.lookup(&key) {
            return Ok(existing);
        }

        let id = self.add(node)?;
        self.gvn.insert(key, id);
        Ok(id)
    }

    /// Adds (or reuses) a constant node.
    ///
    /// # Errors
    ///
    /// Never fails for constants; the `Result` mirrors [`Graph::unique`].
    pub fn constant(&mut self, value: Constant) -> Result<NodeId> {
        self.unique(Node::new(NodeKind::Constant(value), Vec::new()))
    }

    fn lookup(&self, key: &ValueKey) -> Option<NodeId> {
        let candidate = *self.gvn.get(key)?;
        let node = self.get(candidate)?;
        (node.kind == key.kind && node.inputs == key.inputs).then_some(candidate)
    }

    /// Finds a live node structurally equal to `id` (other than `id` itself).
    ///
    /// If none exists, `id` becomes the interned representative of its structure.
    /// Non-numberable nodes never have duplicates.
    pub fn find_duplicate(&mut self, id: NodeId) -> Option<NodeId> {
        let node = self.get(id)?;
        if !node.kind.is_value_numberable() {
            return None;
        }

        let key = ValueKey::of(node);
        match self.lookup(&key) {
            Some(existing) if existing != id => Some(existing),
            Some(_) => None,
            None => {
                self.gvn.insert(key, id);
                None
            }
        }
    }

    /// Deletes a node that has no usages.
    ///
    /// The node is removed from its inputs' usages and detached from its control
    /// neighbours (their slots become `None`).
    ///
    /// # Errors
    ///
    /// - [`Error::NodeInUse`] if the node still has usages
    /// - [`Error::DeletedNode`] if it does not exist
    /// - [`Error::InvalidEdge`] for the start node
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if !node.usages.is_empty() {
            return Err(Error::NodeInUse {
                node: id,
                usages: node.usages.len(),
            });
        }
        if id == self.start {
            return Err(Error::InvalidEdge {
                node: id,
                message: "the start node cannot be deleted".to_string(),
            });
        }

        let Some(node) = self.nodes[id.index()].take() else {
            return Err(Error::DeletedNode(id));
        };
        self.live -= 1;

        for &input in &node.inputs {
            if let Some(input) = self.nodes[input.index()].as_mut() {
                remove_one(&mut input.usages, id);
            }
        }
        for successor in node.successors.iter().flatten() {
            if let Some(successor) = self.nodes[successor.index()].as_mut() {
                successor.predecessor = None;
            }
        }
        if let Some(predecessor) = node.predecessor {
            if let Some(predecessor) = self.nodes[predecessor.index()].as_mut() {
                for slot in &mut predecessor.successors {
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Deletes a node regardless of its usages.
    ///
    /// Every input edge pointing at the node is removed from its users, which
    /// changes their arity. Only valid while tearing down a region in bulk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeletedNode`] if the node does not exist.
    pub fn delete_forced(&mut self, id: NodeId) -> Result<()> {
        let mut users = std::mem::take(&mut self.node_mut(id)?.usages);
        users.dedup();
        for user in users {
            if let Some(user) = self.nodes.get_mut(user.index()).and_then(Option::as_mut) {
                user.inputs.retain(|&input| input != id);
            }
        }
        self.delete(id)
    }

    /// Rewires every user of `old` to use `new` instead.
    ///
    /// Afterwards `old` has no usages except, if `new` itself uses `old`, the
    /// edges from `new`, which are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeletedNode`] if either node does not exist.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.node(new)?;
        if old == new {
            return Ok(());
        }

        let users = std::mem::take(&mut self.node_mut(old)?.usages);
        let mut kept = Vec::new();
        for user in users {
            if user == new {
                kept.push(user);
                continue;
            }
            let node = self.node_mut(user)?;
            let Some(slot) = node.inputs.iter_mut().find(|input| **input == old) else {
                return Err(Error::InvalidEdge {
                    node: user,
                    message: format!("usage of {old} without matching input"),
                });
            };
            *slot = new;
            self.node_mut(new)?.usages.push(user);
        }
        self.node_mut(old)?.usages = kept;
        Ok(())
    }

    /// Gives `new` the control predecessor of `old`.
    ///
    /// `old` ends up without predecessor; `new` must not have one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `new` already has a predecessor.
    pub fn replace_at_predecessor(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        if self.node(new)?.predecessor.is_some() {
            return Err(Error::InvalidEdge {
                node: new,
                message: "replacement already has a predecessor".to_string(),
            });
        }
        let Some(predecessor) = self.node(old)?.predecessor else {
            return Ok(());
        };

        let slot = self.successor_slot(predecessor, old)?;
        self.set_successor(predecessor, slot, Some(new))
    }

    /// Index of the successor slot of `node` that holds `successor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if no slot holds it.
    pub fn successor_slot(&self, node: NodeId, successor: NodeId) -> Result<usize> {
        self.node(node)?
            .successors
            .iter()
            .position(|slot| *slot == Some(successor))
            .ok_or_else(|| Error::InvalidEdge {
                node,
                message: format!("{successor} is not a successor"),
            })
    }

    /// Replaces input `index` of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `index` is out of range.
    pub fn set_input(&mut self, node: NodeId, index: usize, value: NodeId) -> Result<()> {
        self.node(value)?;
        let entry = self.node_mut(node)?;
        let Some(slot) = entry.inputs.get_mut(index) else {
            return Err(Error::InvalidEdge {
                node,
                message: format!("input index {index} out of range"),
            });
        };
        let old = std::mem::replace(slot, value);
        if old == value {
            return Ok(());
        }
        remove_one(&mut self.node_mut(old)?.usages, node);
        self.node_mut(value)?.usages.push(node);
        Ok(())
    }

    /// Appends an input to `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeletedNode`] if either node does not exist.
    pub fn push_input(&mut self, node: NodeId, value: NodeId) -> Result<()> {
        self.node(value)?;
        self.node_mut(node)?.inputs.push(value);
        self.node_mut(value)?.usages.push(node);
        Ok(())
    }

    /// Inserts an input of `node` at `index`, shifting later inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `index` is past the end.
    pub fn insert_input(&mut self, node: NodeId, index: usize, value: NodeId) -> Result<()> {
        self.node(value)?;
        let entry = self.node_mut(node)?;
        if index > entry.inputs.len() {
            return Err(Error::InvalidEdge {
                node,
                message: format!("input index {index} out of range"),
            });
        }
        entry.inputs.insert(index, value);
        self.node_mut(value)?.usages.push(node);
        Ok(())
    }

    /// Removes input `index` of `node`, returning the removed input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if `index` is out of range.
    pub fn remove_input(&mut self, node: NodeId, index: usize) -> Result<NodeId> {
        let entry = self.node_mut(node)?;
        if index >= entry.inputs.len() {
            return Err(Error::InvalidEdge {
                node,
                message: format!("input index {index} out of range"),
            });
        }
        let old = entry.inputs.remove(index);
        remove_one(&mut self.node_mut(old)?.usages, node);
        Ok(old)
    }

    /// Swaps two inputs of `node`; usages are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if an index is out of range.
    pub fn swap_inputs(&mut self, node: NodeId, a: usize, b: usize) -> Result<()> {
        let entry = self.node_mut(node)?;
        if a >= entry.inputs.len() || b >= entry.inputs.len() {
            return Err(Error::InvalidEdge {
                node,
                message: format!("input swap {a}/{b} out of range"),
            });
        }
        entry.inputs.swap(a, b);
        Ok(())
    }

    /// Removes every input of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeletedNode`] if the node does not exist.
    pub fn clear_inputs(&mut self, node: NodeId) -> Result<()> {
        let inputs = std::mem::take(&mut self.node_mut(node)?.inputs);
        for input in inputs {
            remove_one(&mut self.node_mut(input)?.usages, node);
        }
        Ok(())
    }

    /// Connects (or clears) successor slot `index` of `node`.
    ///
    /// The previous occupant of the slot loses its predecessor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if the slot does not exist, the successor
    /// is not a fixed node, or it already has a predecessor.
    pub fn set_successor(
        &mut self,
        node: NodeId,
        index: usize,
        successor: Option<NodeId>,
    ) -> Result<()> {
        if let Some(successor) = successor {
            let entry = self.node(successor)?;
            if !entry.kind.is_fixed() {
                return Err(Error::InvalidEdge {
                    node,
                    message: format!("successor {successor} is not a fixed node"),
                });
            }
            if entry.predecessor.is_some_and(|p| p != node) {
                return Err(Error::InvalidEdge {
                    node,
                    message: format!("successor {successor} already has a predecessor"),
                });
            }
        }

        let entry = self.node_mut(node)?;
        let Some(slot) = entry.successors.get_mut(index) else {
            return Err(Error::InvalidEdge {
                node,
                message: format!("successor index {index} out of range"),
            });
        };
        let old = std::mem::replace(slot, successor);

        if let Some(old) = old {
            if let Some(old) = self.nodes[old.index()].as_mut() {
                old.predecessor = None;
            }
        }
        if let Some(successor) = successor {
            self.node_mut(successor)?.predecessor = Some(node);
        }
        Ok(())
    }

    /// Connects the first successor slot of `node`.
    ///
    /// # Errors
    ///
    /// See [`Graph::set_successor`].
    pub fn set_next(&mut self, node: NodeId, next: NodeId) -> Result<()> {
        self.set_successor(node, 0, Some(next))
    }

    /// Appends a successor slot holding `successor` (exception edges).
    ///
    /// # Errors
    ///
    /// See [`Graph::set_successor`].
    pub fn push_successor(&mut self, node: NodeId, successor: NodeId) -> Result<()> {
        let entry = self.node_mut(node)?;
        entry.successors.push(None);
        let index = entry.successors.len() - 1;
        self.set_successor(node, index, Some(successor))
    }

    /// Changes the kind of `node`, keeping its edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if the new kind switches between fixed and
    /// floating.
    pub fn set_kind(&mut self, node: NodeId, kind: NodeKind) -> Result<()> {
        let entry = self.node_mut(node)?;
        if entry.kind.is_fixed() != kind.is_fixed() {
            return Err(Error::InvalidEdge {
                node,
                message: format!("cannot change {} into {kind}", entry.kind),
            });
        }
        entry.kind = kind;
        Ok(())
    }

    /// The constant held by `id`, if it is a constant node.
    #[must_use]
    pub fn constant_of(&self, id: NodeId) -> Option<Constant> {
        self.get(id)?.kind.as_constant().copied()
    }

    /// The integer value of `id`, if it is an integer constant.
    #[must_use]
    pub fn int_value(&self, id: NodeId) -> Option<i64> {
        self.constant_of(id)?.as_i64()
    }

    /// The kind of value produced by `id`.
    ///
    /// Invokes take the return kind of their call target; non-value nodes are `Void`.
    #[must_use]
    pub fn value_kind(&self, id: NodeId) -> ValueKind {
        let Some(node) = self.get(id) else {
            return ValueKind::Void;
        };
        match &node.kind {
            NodeKind::Constant(c) => c.kind(),
            NodeKind::Parameter { kind, .. }
            | NodeKind::Binary { kind, .. }
            | NodeKind::Unary { kind, .. }
            | NodeKind::Phi { kind } => *kind,
            NodeKind::Compare { .. } | NodeKind::IsNull => ValueKind::Int,
            NodeKind::LoadField { field }
            | NodeKind::Read { field, .. }
            | NodeKind::FloatingRead { field, .. } => field.kind,
            NodeKind::NewInstance { .. } | NodeKind::ExceptionObject => ValueKind::Object,
            NodeKind::Address { .. } => ValueKind::Long,
            NodeKind::Invoke { .. } => match node.inputs.first().map(|&t| self.kind(t)) {
                Some(NodeKind::CallTarget { return_kind, .. }) => *return_kind,
                _ => ValueKind::Void,
            },
            _ => ValueKind::Void,
        }
    }

    /// Parameter nodes, sorted by index.
    #[must_use]
    pub fn parameters(&self) -> Vec<NodeId> {
        let mut params: Vec<(u16, NodeId)> = self
            .nodes_of(NodeClass::Parameter)
            .filter_map(|id| match self.kind(id) {
                NodeKind::Parameter { index, .. } => Some((*index, id)),
                _ => None,
            })
            .collect();
        params.sort_unstable();
        params.into_iter().map(|(_, id)| id).collect()
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("node {id} does not exist"),
        }
    }
}

fn remove_one(list: &mut Vec<NodeId>, value: NodeId) {
    if let Some(pos) = list.iter().position(|&v| v == value) {
        list.remove(pos);
    }
}
