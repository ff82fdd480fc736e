//! Node identities and node storage records.

use std::fmt;

use crate::ir::kind::{NodeCategory, NodeClass, NodeKind, NodeTraits};

/// Stable identity of a node within one [`Graph`](crate::ir::Graph).
///
/// Ids are arena indices. They are never reused after the node is deleted, so a
/// stale id resolves to nothing instead of silently aliasing a newer node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates an id from an arena index.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit in 32 bits.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or_else(|_| panic!("node index {index} overflows")))
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A node: its kind plus its edges.
///
/// Edge lists are only mutable through the owning graph, which keeps the inverse
/// edges (`usages`, `predecessor`) in sync. A node value built with
/// [`Node::new`] is a template that [`Graph::add`](crate::ir::Graph::add) consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) successors: Vec<Option<NodeId>>,
    pub(crate) usages: Vec<NodeId>,
    pub(crate) predecessor: Option<NodeId>,
}

impl Node {
    /// Creates a detached node with the given inputs and empty successor slots.
    #[must_use]
    pub fn new(kind: NodeKind, inputs: Vec<NodeId>) -> Self {
        let slots = kind.successor_slots();
        Self {
            kind,
            inputs,
            successors: vec![None; slots],
            usages: Vec::new(),
            predecessor: None,
        }
    }

    /// The node's kind.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Shorthand for `kind().class()`.
    #[must_use]
    pub fn class(&self) -> NodeClass {
        self.kind.class()
    }

    /// Shorthand for `kind().category()`.
    #[must_use]
    pub fn category(&self) -> NodeCategory {
        self.kind.category()
    }

    /// Shorthand for `kind().traits()`.
    #[must_use]
    pub fn traits(&self) -> NodeTraits {
        self.kind.traits()
    }

    /// Ordered data inputs.
    #[must_use]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Input at `index`, if present.
    #[must_use]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index).copied()
    }

    /// Successor slots; `None` marks a slot that is not connected (yet).
    #[must_use]
    pub fn successors(&self) -> &[Option<NodeId>] {
        &self.successors
    }

    /// Connected successors in slot order.
    pub fn successor_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.successors.iter().flatten().copied()
    }

    /// The first successor slot.
    #[must_use]
    pub fn next(&self) -> Option<NodeId> {
        self.successors.first().copied().flatten()
    }

    /// Every node that has this node as input, once per input edge.
    #[must_use]
    pub fn usages(&self) -> &[NodeId] {
        &self.usages
    }

    /// Returns `true` if any node uses this one.
    #[must_use]
    pub fn has_usages(&self) -> bool {
        !self.usages.is_empty()
    }

    /// The control predecessor of a fixed node.
    #[must_use]
    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor
    }
}
