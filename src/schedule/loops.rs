//! Loop nesting from `LoopEnd -> LoopBegin` back edges.

use std::collections::HashSet;

use crate::{
    ir::{Graph, NodeKind},
    schedule::{
        cfg::{BlockId, ControlFlowGraph},
        dominators::DominatorTree,
    },
    Result,
};

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// Block holding the `LoopBegin`.
    pub header: BlockId,
    /// Blocks of the body, header included, sorted.
    pub blocks: Vec<BlockId>,
    /// Index of the enclosing loop in [`LoopTree::loops`].
    pub parent: Option<usize>,
    /// Nesting depth, 1 for outermost loops.
    pub depth: u32,
}

impl Loop {
    /// Returns `true` if `block` is part of this loop.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.binary_search(&block).is_ok()
    }
}

/// All loops of a block graph and the loop depth of every block.
#[derive(Debug, Clone, Default)]
pub struct LoopTree {
    loops: Vec<Loop>,
    depth: Vec<u32>,
}

impl LoopTree {
    /// Finds the natural loops of `cfg`.
    ///
    /// # Errors
    ///
    /// Returns an internal fault if a loop header does not dominate one of its
    /// back edges (irreducible control flow).
    pub fn compute(graph: &Graph, cfg: &ControlFlowGraph, dom: &DominatorTree) -> Result<Self> {
        let mut loops = Vec::new();
        for block in cfg.blocks() {
            let header = block.begin();
            if !matches!(graph.kind(header), NodeKind::LoopBegin) {
                continue;
            }
            let mut body: HashSet<BlockId> = HashSet::from([block.id()]);
            let mut worklist = Vec::new();
            for &end in graph[header].inputs().iter().skip(1) {
                let Some(tail) = cfg.block_of(end) else {
                    continue;
                };
                if !dom.dominates(block.id(), tail) {
                    return Err(internal_fault!(
                        node = end,
                        "loop header {} does not dominate its back edge",
                        header
                    ));
                }
                if body.insert(tail) {
                    worklist.push(tail);
                }
            }
            while let Some(current) = worklist.pop() {
                for &predecessor in cfg.block(current).predecessors() {
                    if body.insert(predecessor) {
                        worklist.push(predecessor);
                    }
                }
            }
            let mut blocks: Vec<BlockId> = body.into_iter().collect();
            blocks.sort_unstable();
            loops.push(Loop {
                header: block.id(),
                blocks,
                parent: None,
                depth: 0,
            });
        }

        // Headers come in reverse postorder, so enclosing loops precede nested ones.
        for index in 0..loops.len() {
            let header = loops[index].header;
            let parent = (0..index)
                .rev()
                .find(|&outer| loops[outer].contains(header));
            loops[index].parent = parent;
            loops[index].depth = parent.map_or(1, |p| loops[p].depth + 1);
        }

        let mut depth = vec![0; cfg.len()];
        for l in &loops {
            for block in &l.blocks {
                depth[block.index()] = depth[block.index()].max(l.depth);
            }
        }
        Ok(Self { loops, depth })
    }

    /// All loops, outer loops before the loops they enclose.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Number of loops around `block`; 0 outside of loops.
    #[must_use]
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.depth.get(block.index()).copied().unwrap_or(0)
    }

    /// The innermost loop containing `block`.
    #[must_use]
    pub fn innermost(&self, block: BlockId) -> Option<&Loop> {
        self.loops
            .iter()
            .filter(|l| l.contains(block))
            .max_by_key(|l| l.depth)
    }

    /// Returns `true` if `block` is a loop header.
    #[must_use]
    pub fn is_header(&self, block: BlockId) -> bool {
        self.loops.iter().any(|l| l.header == block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Condition, GraphBuilder, NodeId, ValueKind};

    /// `for i in 0..n { for j in 0..n {} }`
    fn nested() -> Result<(Graph, NodeId, NodeId, NodeId)> {
        let mut b = GraphBuilder::new();
        let n = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let one = b.int(1)?;

        let outer = b.loop_begin()?;
        let i = b.phi(ValueKind::Int, outer, &[zero])?;
        let cond = b.compare(Condition::Lt, i, n)?;
        let (outer_body, outer_exit) = b.branch(cond)?;

        b.switch_to(outer_body);
        let inner = b.loop_begin()?;
        let j = b.phi(ValueKind::Int, inner, &[zero])?;
        let cond = b.compare(Condition::Lt, j, n)?;
        let (inner_body, inner_exit) = b.branch(cond)?;
        b.switch_to(inner_body);
        let j_next = b.binary(BinaryOp::Add, ValueKind::Int, j, one)?;
        b.loop_end(inner, |_| j_next)?;

        b.switch_to(inner_exit);
        b.loop_exit(inner)?;
        let i_next = b.binary(BinaryOp::Add, ValueKind::Int, i, one)?;
        b.loop_end(outer, |_| i_next)?;

        b.switch_to(outer_exit);
        b.loop_exit(outer)?;
        let ret = b.ret(None)?;
        Ok((b.finish(), outer, inner, ret))
    }

    #[test]
    fn test_nested_loops() -> Result<()> {
        let (graph, outer, inner, ret) = nested()?;
        graph.verify()?;
        let cfg = ControlFlowGraph::build(&graph)?;
        let dom = DominatorTree::compute(&cfg);
        let loops = LoopTree::compute(&graph, &cfg, &dom)?;
        let block = |n| cfg.block_of(n).ok_or_else(|| internal_fault!(node = n, "no block"));

        assert_eq!(loops.loops().len(), 2);
        assert_eq!(loops.loop_depth(block(outer)?), 1);
        assert_eq!(loops.loop_depth(block(inner)?), 2);
        assert_eq!(loops.loop_depth(block(ret)?), 0);
        assert!(loops.is_header(block(inner)?));
        let innermost = loops
            .innermost(block(inner)?)
            .ok_or_else(|| internal_fault!("no loop"))?;
        assert_eq!(innermost.header, block(inner)?);
        assert_eq!(innermost.parent, Some(0));
        Ok(())
    }
}
