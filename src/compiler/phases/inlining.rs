//! Inlining of small, statically bound callees.

use std::collections::HashMap;

use log::debug;

use crate::{
    canonical::{Canonicalizer, CanonicalizerTable},
    compiler::{
        context::CompilationContext,
        events::EventKind,
        inline::{direct_callee, splice},
        phase::Phase,
    },
    ir::{Graph, MethodId, NodeClass, NodeId},
    Result,
};

/// Replaces direct invokes by the bodies of their callees.
///
/// A call is inlined when the context's method provider knows the callee and
/// allows inlining, the callee has at most `inline_threshold` nodes, the
/// inline path is shorter than `max_inline_depth`, and the callee is neither
/// the compiled method nor already on the inline path. Invokes copied from a
/// callee are considered in turn. Each splice is followed by an incremental
/// canonicalization of the copied nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct InliningPhase;

impl InliningPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Phase for InliningPhase {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn should_run(&self, _graph: &Graph, ctx: &CompilationContext) -> bool {
        ctx.methods.is_some() && ctx.config.max_inline_depth > 0
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilationContext) -> Result<bool> {
        let Some(methods) = ctx.methods.as_ref() else {
            return Ok(false);
        };
        let config = &ctx.config;
        let root = graph.method();
        let canonicalizer = Canonicalizer::new(CanonicalizerTable::default())
            .with_step_limit(config.canonicalizer_step_limit)
            .with_events(&ctx.events);

        let mut paths: HashMap<NodeId, Vec<MethodId>> = HashMap::new();
        let mut worklist: Vec<NodeId> = graph.nodes_of(NodeClass::Invoke).collect();
        worklist.reverse();
        let mut changed = false;

        while let Some(invoke) = worklist.pop() {
            if !graph.is_alive(invoke) {
                continue;
            }
            let path = paths.remove(&invoke).unwrap_or_default();
            let Some(method) = direct_callee(graph, invoke) else {
                continue;
            };
            if path.len() >= config.max_inline_depth
                || root == Some(method)
                || path.contains(&method)
                || !methods.is_inlineable(method)
            {
                continue;
            }
            let Some(callee) = methods.graph(method) else {
                continue;
            };
            if callee.node_count() > config.inline_threshold {
                debug!("not inlining {method}: {} nodes", callee.node_count());
                continue;
            }
            if graph.node_count() + callee.node_count() > config.node_budget {
                debug!("not inlining {method}: node budget exhausted");
                continue;
            }

            let spliced = splice(graph, invoke, &callee)?;
            ctx.events
                .record(EventKind::InvokeInlined)
                .method(root)
                .node(invoke)
                .message(format!("{method} ({} nodes)", spliced.nodes.len()));

            let mut inner = path;
            inner.push(method);
            for &nested in spliced.invokes.iter().rev() {
                paths.insert(nested, inner.clone());
                worklist.push(nested);
            }
            canonicalizer.canonicalize_nodes(
                graph,
                spliced.nodes.iter().copied().chain(spliced.result),
            )?;
            changed = true;
        }
        Ok(changed)
    }

    fn description(&self) -> &'static str {
        "Inlines small statically bound callees"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        compiler::{CompilerConfig, MethodRegistry, TargetDescription},
        ir::{BinaryOp, Callee, Constant, GraphBuilder, InvokeKind, ValueKind},
    };

    fn call(b: &mut GraphBuilder, callee: MethodId, args: &[NodeId]) -> Result<NodeId> {
        b.invoke(
            0,
            InvokeKind::Static,
            Callee::Direct(callee),
            ValueKind::Int,
            args,
            None,
        )
    }

    /// m1(x) = x * 2, m2(x) = m1(x) + 1, m3(x) = m3(x)
    fn registry() -> Result<Arc<MethodRegistry>> {
        let registry = MethodRegistry::new();

        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let two = b.int(2)?;
        let product = b.binary(BinaryOp::Mul, ValueKind::Int, x, two)?;
        b.ret(Some(product))?;
        registry.register(MethodId(1), b.finish());

        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let inner = call(&mut b, MethodId(1), &[x])?;
        let one = b.int(1)?;
        let sum = b.binary(BinaryOp::Add, ValueKind::Int, inner, one)?;
        b.ret(Some(sum))?;
        registry.register(MethodId(2), b.finish());

        let mut b = GraphBuilder::new();
        let x = b.parameter(0, ValueKind::Int)?;
        let again = call(&mut b, MethodId(3), &[x])?;
        b.ret(Some(again))?;
        registry.register(MethodId(3), b.finish());

        Ok(Arc::new(registry))
    }

    fn context(registry: Arc<MethodRegistry>) -> CompilationContext {
        CompilationContext::new(CompilerConfig::default(), TargetDescription::amd64())
            .with_methods(registry)
    }

    #[test]
    fn test_nested_inlining_folds() -> Result<()> {
        let mut b = GraphBuilder::for_method(MethodId(10));
        let twenty = b.int(20)?;
        let result = call(&mut b, MethodId(2), &[twenty])?;
        let ret = b.ret(Some(result))?;
        let mut graph = b.finish();

        let ctx = context(registry()?);
        assert!(InliningPhase.run(&mut graph, &ctx)?);
        assert_eq!(graph.nodes_of(NodeClass::Invoke).count(), 0);
        let value = graph[ret].inputs()[0];
        assert_eq!(graph.constant_of(value), Some(Constant::Int(41)));
        assert_eq!(ctx.events.count_kind(EventKind::InvokeInlined), 2);
        graph.verify()
    }

    #[test]
    fn test_recursion_is_bounded() -> Result<()> {
        let mut b = GraphBuilder::for_method(MethodId(10));
        let p = b.parameter(0, ValueKind::Int)?;
        let result = call(&mut b, MethodId(3), &[p])?;
        b.ret(Some(result))?;
        let mut graph = b.finish();

        let ctx = context(registry()?);
        assert!(InliningPhase.run(&mut graph, &ctx)?);
        assert_eq!(graph.nodes_of(NodeClass::Invoke).count(), 1);
        assert_eq!(ctx.events.count_kind(EventKind::InvokeInlined), 1);
        graph.verify()
    }

    #[test]
    fn test_threshold_respected() -> Result<()> {
        let mut b = GraphBuilder::for_method(MethodId(10));
        let p = b.parameter(0, ValueKind::Int)?;
        let result = call(&mut b, MethodId(1), &[p])?;
        b.ret(Some(result))?;
        let mut graph = b.finish();

        let ctx = CompilationContext::new(
            CompilerConfig::default().with_inline_threshold(2),
            TargetDescription::amd64(),
        )
        .with_methods(registry()?);
        assert!(!InliningPhase.run(&mut graph, &ctx)?);
        assert_eq!(graph.nodes_of(NodeClass::Invoke).count(), 1);
        Ok(())
    }
}
