//! Partial evaluation of an interpreter entry point.

use std::{collections::HashMap, sync::Arc};

use log::{debug, warn};

use crate::{
    canonical::{Canonicalizer, CanonicalizerTable},
    compiler::{
        direct_callee, phases::virtualize_allocations, splice, CompilerConfig, EventKind,
        EventLog, MethodProvider,
    },
    ir::{Constant, Graph, MethodId, NodeClass, NodeId, NodeKind},
    specialize::{
        cache::GraphCache,
        descriptor::{Assumption, Assumptions, CallTargetDescriptor},
    },
    Error, Result,
};

/// Expands a call target into a single graph by inlining every statically
/// bound call until nothing changes.
///
/// One specializer may serve many call targets; the [`GraphCache`] is shared
/// between them (and may be shared between specializers with
/// [`Specializer::with_cache`]).
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tiergraph::compiler::{CompilerConfig, MethodRegistry};
/// use tiergraph::ir::{BinaryOp, Callee, Constant, GraphBuilder, InvokeKind, MethodId, ValueKind};
/// use tiergraph::specialize::{Assumptions, CallTargetDescriptor, Specializer};
///
/// let registry = MethodRegistry::new();
/// let mut b = GraphBuilder::new();
/// let x = b.parameter(0, ValueKind::Int)?;
/// let y = b.binary(BinaryOp::Mul, ValueKind::Int, x, x)?;
/// b.ret(Some(y))?;
/// registry.register(MethodId(1), b.finish());
///
/// let mut b = GraphBuilder::new();
/// let receiver = b.parameter(0, ValueKind::Int)?;
/// let r = b.invoke(0, InvokeKind::Static, Callee::Direct(MethodId(1)), ValueKind::Int, &[receiver], None)?;
/// b.ret(Some(r))?;
/// registry.register(MethodId(2), b.finish());
///
/// let specializer = Specializer::new(Arc::new(registry), CompilerConfig::default());
/// let target = CallTargetDescriptor::new(MethodId(2)).with_receiver(Constant::Int(7));
/// let graph = specializer.specialize(&target, &mut Assumptions::new())?;
/// assert!(graph.nodes().any(|n| graph.constant_of(n) == Some(Constant::Int(49))));
/// # Ok::<(), tiergraph::Error>(())
/// ```
pub struct Specializer {
    provider: Arc<dyn MethodProvider>,
    config: CompilerConfig,
    cache: Arc<GraphCache>,
    events: EventLog,
}

impl Specializer {
    /// Creates a specializer with its own cache.
    #[must_use]
    pub fn new(provider: Arc<dyn MethodProvider>, config: CompilerConfig) -> Self {
        Self {
            provider,
            config,
            cache: Arc::new(GraphCache::new()),
            events: EventLog::new(),
        }
    }

    /// Uses `cache` instead of a private one.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<GraphCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The callee graph cache.
    #[must_use]
    pub fn cache(&self) -> &GraphCache {
        &self.cache
    }

    /// Events recorded by all specializations so far.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Options in effect.
    #[must_use]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Builds the specialized graph of `target`.
    ///
    /// The root graph is copied first, so the provider's graph is never
    /// modified. Assumptions are appended to `assumptions` only when the
    /// specialization succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Bailout`] if the root method is unknown or the graph would
    ///   outgrow `specialization_budget`
    /// - [`Error::NeverPartOfCompilation`] if such a marker survives expansion
    /// - an internal fault if the result fails verification
    pub fn specialize(
        &self,
        target: &CallTargetDescriptor,
        assumptions: &mut Assumptions,
    ) -> Result<Graph> {
        let mut expansion = Expansion {
            specializer: self,
            canonicalizer: Canonicalizer::new(CanonicalizerTable::default())
                .with_step_limit(self.config.canonicalizer_step_limit)
                .with_events(&self.events),
            root: target.method,
            paths: HashMap::new(),
            assumptions: Assumptions::new(),
        };

        match expansion.run(target) {
            Ok(graph) => {
                for assumption in expansion.assumptions.iter() {
                    assumptions.record(assumption.clone());
                }
                debug!(
                    "specialized {target}: {} nodes, {} assumptions",
                    graph.node_count(),
                    expansion.assumptions.len()
                );
                Ok(graph)
            }
            Err(error) => {
                let kind = if error.is_bailout() {
                    EventKind::Bailout
                } else {
                    EventKind::Error
                };
                warn!("specialization of {target} failed: {error}");
                self.events
                    .record(kind)
                    .method(Some(target.method))
                    .message(error.to_string());
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Specializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specializer")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .field("events", &self.events.len())
            .finish()
    }
}

/// State of one `specialize` call.
struct Expansion<'a> {
    specializer: &'a Specializer,
    canonicalizer: Canonicalizer<'a>,
    root: MethodId,
    /// Methods inlined around each invoke copied from a callee.
    paths: HashMap<NodeId, Vec<MethodId>>,
    assumptions: Assumptions,
}

impl Expansion<'_> {
    fn run(&mut self, target: &CallTargetDescriptor) -> Result<Graph> {
        let specializer = self.specializer;
        let Some(root) = specializer
            .cache
            .graph(target.method, specializer.provider.as_ref())
        else {
            return Err(Error::bailout(format!("no graph for {}", target.method)));
        };
        let mut graph = (*root).clone();
        if graph.method().is_none() {
            graph.set_method(Some(target.method));
        }

        if let Some(receiver) = target.receiver {
            self.inject_receiver(&mut graph, receiver)?;
        }
        self.canonicalizer.canonicalize(&mut graph)?;

        self.expand_tree(&mut graph)?;
        loop {
            if specializer.config.escape_analysis
                && virtualize_allocations(&mut graph, Some(&specializer.events))? > 0
            {
                self.canonicalizer.canonicalize(&mut graph)?;
            }
            if !self.expand_tree(&mut graph)? {
                break;
            }
        }

        if let Some(marker) = graph.nodes_of(NodeClass::NeverPartOfCompilation).next() {
            let message = match graph.kind(marker) {
                NodeKind::NeverPartOfCompilation { message } => message.to_string(),
                _ => String::new(),
            };
            return Err(Error::NeverPartOfCompilation {
                message,
                node: marker,
            });
        }
        graph.verify()?;
        Ok(graph)
    }

    fn inject_receiver(&mut self, graph: &mut Graph, receiver: Constant) -> Result<()> {
        let parameter = graph
            .parameters()
            .into_iter()
            .find(|&p| matches!(graph.kind(p), NodeKind::Parameter { index: 0, .. }));
        let Some(parameter) = parameter else {
            debug!("{} takes no receiver, ignoring {receiver}", self.root);
            return Ok(());
        };
        let constant = graph.constant(receiver)?;
        graph.replace_at_usages(parameter, constant)?;
        graph.delete(parameter)?;
        self.assumptions.record(Assumption::ConstantReceiver {
            method: self.root,
            receiver,
        });
        Ok(())
    }

    /// Inlines eligible invokes until a round makes no progress.
    fn expand_tree(&mut self, graph: &mut Graph) -> Result<bool> {
        let mut changed = false;
        loop {
            let invokes: Vec<NodeId> = graph.nodes_of(NodeClass::Invoke).collect();
            let mut progress = false;
            for invoke in invokes {
                if graph.is_alive(invoke) && self.inline(graph, invoke)? {
                    progress = true;
                }
            }
            if !progress {
                return Ok(changed);
            }
            changed = true;
        }
    }

    fn inline(&mut self, graph: &mut Graph, invoke: NodeId) -> Result<bool> {
        let specializer = self.specializer;
        let config = &specializer.config;
        let provider = specializer.provider.as_ref();

        let Some(method) = direct_callee(graph, invoke) else {
            return Ok(false);
        };
        let path = self.paths.get(&invoke).cloned().unwrap_or_default();
        if method == self.root
            || path.contains(&method)
            || path.len() >= config.max_inline_depth
            || !provider.is_inlineable(method)
        {
            return Ok(false);
        }

        let Some(target) = graph[invoke].input(0) else {
            return Err(internal_fault!(node = invoke, "invoke without call target"));
        };
        let shape: Vec<Option<Constant>> = graph[target]
            .inputs()
            .iter()
            .map(|&argument| graph.constant_of(argument))
            .collect();
        let constant_arguments = shape.iter().any(Option::is_some);
        let callee = if constant_arguments {
            specializer
                .cache
                .specialized(method, &shape, provider, &self.canonicalizer)?
        } else {
            specializer.cache.graph(method, provider)
        };
        let Some(callee) = callee else {
            return Ok(false);
        };

        let budget = config.specialization_budget;
        if graph.node_count() + callee.node_count() > budget {
            return Err(Error::bailout(format!(
                "inlining {method} would grow the graph to {} nodes, budget is {budget}",
                graph.node_count() + callee.node_count()
            )));
        }

        let spliced = splice(graph, invoke, &callee)?;
        self.paths.remove(&invoke);
        specializer
            .events
            .record(EventKind::InvokeInlined)
            .method(Some(self.root))
            .node(invoke)
            .message(format!("{method} ({} nodes)", spliced.nodes.len()));
        self.assumptions.record(if constant_arguments {
            Assumption::ConstantArguments {
                method,
                arguments: shape,
            }
        } else {
            Assumption::MethodInlined { method }
        });

        let mut inner = path;
        inner.push(method);
        for &nested in &spliced.invokes {
            self.paths.insert(nested, inner.clone());
        }
        self.canonicalizer.canonicalize_nodes(
            graph,
            spliced.nodes.iter().copied().chain(spliced.result),
        )?;

        if graph.node_count() > budget {
            return Err(Error::bailout(format!(
                "graph has {} nodes, budget is {budget}",
                graph.node_count()
            )));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::MethodRegistry,
        ir::{BinaryOp, Callee, Condition, GraphBuilder, InvokeKind, ValueKind},
    };

    fn call(b: &mut GraphBuilder, method: u32, args: &[NodeId]) -> Result<NodeId> {
        b.invoke(
            0,
            InvokeKind::Static,
            Callee::Direct(MethodId(method)),
            ValueKind::Int,
            args,
            None,
        )
    }

    /// m1(x) = x + 1
    /// m2(node, x) = node == 1 ? m1(x) : { never part of compilation; 0 }
    /// m3(x) = m3(x)
    /// m10(node, x) = m2(node, x)
    /// m11(x) = m3(x)
    fn registry() -> Result<Arc<MethodRegistry>> {
        let registry = MethodRegistry::new();

        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let one = b.int(1)?;
        let sum = b.binary(BinaryOp::Add, ValueKind::Int, x, one)?;
        b.ret(Some(sum))?;
        registry.register(MethodId(1), b.finish());

        let mut b = GraphBuilder::new();
        let node = b.parameter(0, ValueKind::Int)?;
        let x = b.parameter(1, ValueKind::Int)?;
        let one = b.int(1)?;
        let fast = b.compare(Condition::Eq, node, one)?;
        let (t, f) = b.branch(fast)?;
        b.switch_to(t);
        let result = call(&mut b, 1, &[x])?;
        b.ret(Some(result))?;
        b.switch_to(f);
        b.never_part_of_compilation("uncached node")?;
        let zero = b.int(0)?;
        b.ret(Some(zero))?;
        registry.register(MethodId(2), b.finish());

        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let again = call(&mut b, 3, &[x])?;
        b.ret(Some(again))?;
        registry.register(MethodId(3), b.finish());

        let mut b = GraphBuilder::new();
        let node = b.parameter(0, ValueKind::Int)?;
        let x = b.parameter(1, ValueKind::Int)?;
        let result = call(&mut b, 2, &[node, x])?;
        b.ret(Some(result))?;
        registry.register(MethodId(10), b.finish());

        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let result = call(&mut b, 3, &[x])?;
        b.ret(Some(result))?;
        registry.register(MethodId(11), b.finish());

        Ok(Arc::new(registry))
    }

    #[test]
    fn test_expands_known_receiver() -> Result<()> {
        let specializer = Specializer::new(registry()?, CompilerConfig::default());
        let target = CallTargetDescriptor::new(MethodId(10)).with_receiver(Constant::Int(1));
        let mut assumptions = Assumptions::new();
        let graph = specializer.specialize(&target, &mut assumptions)?;

        assert_eq!(graph.nodes_of(NodeClass::Invoke).count(), 0);
        assert_eq!(graph.nodes_of(NodeClass::NeverPartOfCompilation).count(), 0);
        assert_eq!(graph.nodes_of(NodeClass::If).count(), 0);
        assert!(assumptions.contains(&Assumption::ConstantReceiver {
            method: MethodId(10),
            receiver: Constant::Int(1),
        }));
        assert!(assumptions.contains(&Assumption::ConstantArguments {
            method: MethodId(2),
            arguments: vec![Some(Constant::Int(1)), None],
        }));
        assert!(assumptions.contains(&Assumption::MethodInlined {
            method: MethodId(1)
        }));
        assert_eq!(specializer.events().count_kind(EventKind::InvokeInlined), 2);
        Ok(())
    }

    #[test]
    fn test_surviving_marker_is_hard_failure() -> Result<()> {
        let specializer = Specializer::new(registry()?, CompilerConfig::default());
        let target = CallTargetDescriptor::new(MethodId(10)).with_receiver(Constant::Int(0));
        let mut assumptions = Assumptions::new();
        let err = specializer.specialize(&target, &mut assumptions).unwrap_err();
        assert!(matches!(err, Error::NeverPartOfCompilation { ref message, .. } if message == "uncached node"));
        assert!(!err.is_bailout());
        assert!(assumptions.is_empty());
        Ok(())
    }

    #[test]
    fn test_budget_bailout_leaves_original() -> Result<()> {
        let registry = registry()?;
        let original = registry
            .graph(MethodId(10))
            .ok_or_else(|| internal_fault!("missing m10"))?;
        let before = original.node_count();

        let config = CompilerConfig {
            specialization_budget: before + 2,
            ..CompilerConfig::default()
        };
        let specializer = Specializer::new(registry.clone(), config);
        let target = CallTargetDescriptor::new(MethodId(10)).with_receiver(Constant::Int(1));
        let err = specializer
            .specialize(&target, &mut Assumptions::new())
            .unwrap_err();
        assert!(err.is_bailout());
        assert_eq!(specializer.events().count_kind(EventKind::Bailout), 1);

        let after = registry
            .graph(MethodId(10))
            .ok_or_else(|| internal_fault!("missing m10"))?;
        assert_eq!(after.node_count(), before);
        assert_eq!(after.nodes_of(NodeClass::Invoke).count(), 1);
        Ok(())
    }

    #[test]
    fn test_recursion_terminates() -> Result<()> {
        let specializer = Specializer::new(registry()?, CompilerConfig::default());
        let graph =
            specializer.specialize(&CallTargetDescriptor::new(MethodId(11)), &mut Assumptions::new())?;
        // m3 is inlined once; its self call stays a call.
        assert_eq!(graph.nodes_of(NodeClass::Invoke).count(), 1);
        Ok(())
    }

    #[test]
    fn test_cache_reused_across_targets() -> Result<()> {
        let specializer = Specializer::new(registry()?, CompilerConfig::default());
        let target = CallTargetDescriptor::new(MethodId(10)).with_receiver(Constant::Int(1));
        specializer.specialize(&target, &mut Assumptions::new())?;
        let misses = specializer.cache().stats().misses;
        specializer.specialize(&target, &mut Assumptions::new())?;
        let stats = specializer.cache().stats();
        assert_eq!(stats.misses, misses);
        assert!(stats.hits > 0);
        Ok(())
    }
}
