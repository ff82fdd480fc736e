//! Access to the graphs of other methods, used by inlining and partial evaluation.

use std::sync::Arc;

use dashmap::DashMap;

use crate::ir::{Graph, MethodId};

/// Supplies callee graphs and inlining decisions.
///
/// Implementations must be thread-safe: one provider is shared by every
/// compilation of a session.
pub trait MethodProvider: Send + Sync {
    /// The initial graph of `method`, if it is known.
    fn graph(&self, method: MethodId) -> Option<Arc<Graph>>;

    /// Whether `method` may be inlined at all.
    fn is_inlineable(&self, method: MethodId) -> bool {
        let _ = method;
        true
    }

    /// Human readable name of `method`, for diagnostics.
    fn name(&self, method: MethodId) -> Option<String> {
        let _ = method;
        None
    }
}

#[derive(Debug, Clone)]
struct MethodEntry {
    graph: Arc<Graph>,
    name: Option<String>,
    inlineable: bool,
}

/// A concurrent in-memory [`MethodProvider`].
///
/// # Example
///
/// ```rust
/// use tiergraph::compiler::{MethodProvider, MethodRegistry};
/// use tiergraph::ir::{GraphBuilder, MethodId};
///
/// let registry = MethodRegistry::new();
/// let mut b = GraphBuilder::for_method(MethodId(1));
/// let one = b.int(1)?;
/// b.ret(Some(one))?;
/// registry.register(MethodId(1), b.finish());
///
/// assert!(registry.graph(MethodId(1)).is_some());
/// assert!(registry.is_inlineable(MethodId(1)));
/// # Ok::<(), tiergraph::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: DashMap<MethodId, MethodEntry>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the graph of `method`.
    pub fn register(&self, method: MethodId, mut graph: Graph) {
        graph.set_method(Some(method));
        self.methods.insert(
            method,
            MethodEntry {
                graph: Arc::new(graph),
                name: None,
                inlineable: true,
            },
        );
    }

    /// Registers a named method.
    pub fn register_named(&self, method: MethodId, name: &str, graph: Graph) {
        self.register(method, graph);
        if let Some(mut entry) = self.methods.get_mut(&method) {
            entry.name = Some(name.to_string());
        }
    }

    /// Marks `method` as never inlineable. Returns `false` if it is unknown.
    pub fn forbid_inlining(&self, method: MethodId) -> bool {
        match self.methods.get_mut(&method) {
            Some(mut entry) => {
                entry.inlineable = false;
                true
            }
            None => false,
        }
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if no method is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl MethodProvider for MethodRegistry {
    fn graph(&self, method: MethodId) -> Option<Arc<Graph>> {
        self.methods.get(&method).map(|e| Arc::clone(&e.graph))
    }

    fn is_inlineable(&self, method: MethodId) -> bool {
        self.methods.get(&method).is_some_and(|e| e.inlineable)
    }

    fn name(&self, method: MethodId) -> Option<String> {
        self.methods.get(&method).and_then(|e| e.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let registry = MethodRegistry::new();
        assert!(registry.is_empty());
        registry.register_named(MethodId(4), "Box.get", Graph::new());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name(MethodId(4)).as_deref(), Some("Box.get"));
        assert_eq!(
            registry.graph(MethodId(4)).and_then(|g| g.method()),
            Some(MethodId(4))
        );

        assert!(registry.forbid_inlining(MethodId(4)));
        assert!(!registry.is_inlineable(MethodId(4)));
        assert!(!registry.forbid_inlining(MethodId(5)));
        assert!(!registry.is_inlineable(MethodId(5)));
    }
}
