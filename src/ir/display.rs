//! Id-independent textual form of a graph.
//!
//! Two graphs that are structurally identical print identically, whatever ids
//! their nodes were allocated under. Nodes are numbered in visiting order: fixed
//! nodes depth-first along successors from the start (a merge is visited once all
//! of its ends have been), each preceded by its not yet numbered inputs.
//!
//! ```text
//! %0 = Start -> %3
//! %1 = Param(0: Int)
//! %2 = Const(-1)
//! %3 = Return(%2)
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fmt::Write as _,
};

use crate::ir::{graph::Graph, kind::NodeKind, node::NodeId};

/// Wrapper that formats a graph in canonical form.
pub struct CanonicalForm<'a>(pub &'a Graph);

struct Numbering {
    order: Vec<NodeId>,
    numbers: HashMap<NodeId, usize>,
    visiting: HashSet<NodeId>,
}

impl Numbering {
    fn visit_inputs(&mut self, graph: &Graph, id: NodeId) {
        let mut stack = vec![(id, 0usize)];
        self.visiting.insert(id);
        while let Some((current, index)) = stack.pop() {
            let inputs = graph[current].inputs();
            if let Some(&input) = inputs.get(index) {
                stack.push((current, index + 1));
                if !self.numbers.contains_key(&input)
                    && !graph.kind(input).is_fixed()
                    && self.visiting.insert(input)
                {
                    stack.push((input, 0));
                }
                continue;
            }
            if !self.numbers.contains_key(&current) {
                self.number(current);
            }
        }
    }

    fn number(&mut self, id: NodeId) {
        self.numbers.insert(id, self.order.len());
        self.order.push(id);
    }

    fn build(graph: &Graph) -> Self {
        let mut numbering = Self {
            order: Vec::new(),
            numbers: HashMap::new(),
            visiting: HashSet::new(),
        };

        let mut parameters = graph.parameters();
        parameters.retain(|&p| graph.is_alive(p));
        numbering.number(graph.start());
        for parameter in parameters {
            numbering.number(parameter);
        }

        let mut pending_ends: HashMap<NodeId, usize> = HashMap::new();
        let mut worklist = vec![graph.start()];
        while let Some(id) = worklist.pop() {
            let node = &graph[id];
            if id != graph.start() {
                if !node.kind().is_merge() {
                    numbering.visit_inputs(graph, id);
                } else if !numbering.numbers.contains_key(&id) {
                    numbering.number(id);
                }
                for phi in graph.phis_of(id) {
                    numbering.visit_inputs(graph, phi);
                }
            }
            for successor in node.successors().iter().rev().flatten() {
                worklist.push(*successor);
            }
            if node.kind().is_end() {
                for &merge in node.usages() {
                    let seen = pending_ends.entry(merge).or_default();
                    *seen += 1;
                    let forward = graph[merge]
                        .inputs()
                        .iter()
                        .filter(|&&e| !matches!(graph.kind(e), NodeKind::LoopEnd))
                        .count();
                    if *seen == forward {
                        worklist.push(merge);
                    }
                }
            }
        }

        let mut leftovers: Vec<NodeId> = graph
            .nodes()
            .filter(|id| !numbering.numbers.contains_key(id))
            .collect();
        leftovers.sort_unstable();
        for id in leftovers {
            if !numbering.numbers.contains_key(&id) {
                numbering.visit_inputs(graph, id);
            }
        }
        numbering
    }
}

impl fmt::Display for CanonicalForm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        let numbering = Numbering::build(graph);
        let name = |id: &NodeId| match numbering.numbers.get(id) {
            Some(n) => format!("%{n}"),
            None => format!("%?{id}"),
        };

        for (n, id) in numbering.order.iter().enumerate() {
            let node = &graph[*id];
            let mut line = format!("%{n} = {}", node.kind());
            if !node.inputs().is_empty() {
                let inputs: Vec<String> = node.inputs().iter().map(name).collect();
                let _ = write!(line, "({})", inputs.join(", "));
            }
            if !node.successors().is_empty() {
                let successors: Vec<String> = node
                    .successors()
                    .iter()
                    .map(|s| s.as_ref().map_or_else(|| "_".to_string(), name))
                    .collect();
                let _ = write!(line, " -> {}", successors.join(", "));
            }
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

impl Graph {
    /// Returns the canonical, id-independent text of this graph.
    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        CanonicalForm(self).to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ir::{builder::GraphBuilder, BinaryOp, ValueKind},
        Result,
    };

    #[test]
    fn test_ids_do_not_matter() -> Result<()> {
        let mut a = GraphBuilder::new();
        let p = a.parameter(0, ValueKind::Int)?;
        let c = a.int(3)?;
        let or = a.binary(BinaryOp::Or, ValueKind::Int, p, c)?;
        a.ret(Some(or))?;

        let mut b = GraphBuilder::new();
        let c = b.int(3)?;
        let unused = b.int(99)?;
        let p = b.parameter(0, ValueKind::Int)?;
        let or = b.binary(BinaryOp::Or, ValueKind::Int, p, c)?;
        b.ret(Some(or))?;
        let mut b = b.finish();
        b.kill_unused_floating(unused)?;

        assert_eq!(a.finish().to_canonical_string(), b.to_canonical_string());
        Ok(())
    }

    #[test]
    fn test_format() -> Result<()> {
        let mut b = GraphBuilder::new();
        let c = b.int(-1)?;
        b.ret(Some(c))?;
        let text = b.finish().to_canonical_string();
        assert_eq!(text, "%0 = Start -> %2\n%1 = Const(-1)\n%2 = Return(%1)\n");
        Ok(())
    }
}
