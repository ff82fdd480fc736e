//! Callee graph cache shared by specializations.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;

use crate::{
    canonical::Canonicalizer,
    compiler::MethodProvider,
    ir::{Constant, Graph, MethodId, NodeKind},
    Result,
};

/// Per-argument constants of a call site; `None` for non-constant arguments.
pub type CallSiteShape = Vec<Option<Constant>>;

/// Counters of a [`GraphCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: usize,
    /// Lookups that had to load or build a graph.
    pub misses: usize,
    /// Cached plain graphs.
    pub graphs: usize,
    /// Cached argument-specialized graphs.
    pub specialized: usize,
}

/// Caches callee graphs by method, and argument-specialized copies by
/// `(method, call-site shape)`.
///
/// Cached graphs are immutable and shared (`Arc`); callers splice copies of
/// them. The cache is safe to share across threads.
#[derive(Debug, Default)]
pub struct GraphCache {
    graphs: DashMap<MethodId, Arc<Graph>>,
    specialized: DashMap<(MethodId, CallSiteShape), Arc<Graph>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl GraphCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The graph of `method`, loaded from `provider` on first use.
    pub fn graph(&self, method: MethodId, provider: &dyn MethodProvider) -> Option<Arc<Graph>> {
        if let Some(graph) = self.graphs.get(&method) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&graph));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let graph = provider.graph(method)?;
        self.graphs.insert(method, Arc::clone(&graph));
        Some(graph)
    }

    /// The graph of `method` with its parameters replaced by the constants of
    /// `shape`, simplified by `canonicalizer`.
    ///
    /// The caller's canonicalizer carries its rule table, step limit and event
    /// log into the copy.
    ///
    /// # Errors
    ///
    /// Propagates graph editing failures while building the copy.
    pub fn specialized(
        &self,
        method: MethodId,
        shape: &[Option<Constant>],
        provider: &dyn MethodProvider,
        canonicalizer: &Canonicalizer<'_>,
    ) -> Result<Option<Arc<Graph>>> {
        let key = (method, shape.to_vec());
        if let Some(graph) = self.specialized.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(Arc::clone(&graph)));
        }
        let Some(base) = self.graph(method, provider) else {
            return Ok(None);
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut graph = (*base).clone();
        for parameter in graph.parameters() {
            let NodeKind::Parameter { index, .. } = *graph.kind(parameter) else {
                continue;
            };
            let Some(&Some(value)) = shape.get(usize::from(index)) else {
                continue;
            };
            let constant = graph.constant(value)?;
            graph.replace_at_usages(parameter, constant)?;
        }
        canonicalizer.canonicalize(&mut graph)?;

        let graph = Arc::new(graph);
        self.specialized.insert(key, Arc::clone(&graph));
        Ok(Some(graph))
    }

    /// Drops every cached graph of `method`. Returns the number of entries removed.
    pub fn invalidate(&self, method: MethodId) -> usize {
        let mut removed = usize::from(self.graphs.remove(&method).is_some());
        let before = self.specialized.len();
        self.specialized.retain(|(m, _), _| *m != method);
        removed += before - self.specialized.len();
        removed
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.graphs.clear();
        self.specialized.clear();
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            graphs: self.graphs.len(),
            specialized: self.specialized.len(),
        }
    }
}
