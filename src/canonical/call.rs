//! Devirtualization of call targets whose target method is a constant.

use crate::{
    canonical::Canonical,
    ir::{Callee, Constant, Graph, InvokeKind, NodeId, NodeKind},
    Result,
};

/// Turns an indirect call through a constant method into a direct call.
///
/// The target input is dropped; dispatching kinds become `Special` since the
/// receiver no longer selects the method.
pub(crate) fn call_target(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let NodeKind::CallTarget {
        invoke_kind,
        callee: Callee::Indirect,
        return_kind,
    } = *graph.kind(id)
    else {
        return Ok(Canonical::Unchanged);
    };
    let Some(Constant::Method(method)) = graph[id].input(0).and_then(|t| graph.constant_of(t))
    else {
        return Ok(Canonical::Unchanged);
    };

    let invoke_kind = match invoke_kind {
        InvokeKind::Virtual | InvokeKind::Interface => InvokeKind::Special,
        direct => direct,
    };
    let target = graph.remove_input(id, 0)?;
    graph.set_kind(
        id,
        NodeKind::CallTarget {
            invoke_kind,
            callee: Callee::Direct(method),
            return_kind,
        },
    )?;
    graph.kill_unused_floating(target)?;
    Ok(Canonical::Simplified)
}
