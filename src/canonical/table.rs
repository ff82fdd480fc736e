//! The capability table mapping node classes to canonicalization rules.

use std::collections::HashMap;

use crate::{
    canonical::{arithmetic, call, control, Canonical},
    ir::{Graph, NodeClass, NodeId},
    Result,
};

/// A canonicalization rule for one node class.
///
/// The rule receives a live node of the class it was registered for. It either
/// reports the node as unchanged, names a semantically equivalent replacement
/// (the canonicalizer rewires usages), or edits the graph itself and reports
/// [`Canonical::Simplified`]. Rules for fixed nodes never return a replacement.
pub type CanonicalRule = fn(&mut Graph, NodeId) -> Result<Canonical>;

/// Node class to rule lookup, consulted once per visited node.
///
/// [`CanonicalizerTable::default`] registers the built-in rules. New node
/// classes (or alternative strategies for existing ones) are added with
/// [`CanonicalizerTable::register`].
#[derive(Clone)]
pub struct CanonicalizerTable {
    rules: HashMap<NodeClass, CanonicalRule>,
}

impl Default for CanonicalizerTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register(NodeClass::Binary, arithmetic::binary);
        table.register(NodeClass::Unary, arithmetic::unary);
        table.register(NodeClass::Compare, arithmetic::compare);
        table.register(NodeClass::IsNull, arithmetic::is_null);
        table.register(NodeClass::Phi, control::phi);
        table.register(NodeClass::If, control::branch);
        table.register(NodeClass::Begin, control::begin);
        table.register(NodeClass::Merge, control::merge);
        table.register(NodeClass::LoopBegin, control::merge);
        table.register(NodeClass::FixedGuard, control::fixed_guard);
        table.register(NodeClass::Guard, control::guard);
        table.register(NodeClass::CallTarget, call::call_target);
        table
    }
}

impl CanonicalizerTable {
    /// Creates a table without any rules.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Registers `rule` for `class`, returning the rule it replaces.
    pub fn register(&mut self, class: NodeClass, rule: CanonicalRule) -> Option<CanonicalRule> {
        self.rules.insert(class, rule)
    }

    /// Removes the rule for `class`.
    pub fn unregister(&mut self, class: NodeClass) -> Option<CanonicalRule> {
        self.rules.remove(&class)
    }

    /// The rule for `class`, if one is registered.
    #[must_use]
    pub fn lookup(&self, class: NodeClass) -> Option<CanonicalRule> {
        self.rules.get(&class).copied()
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if no rule is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
