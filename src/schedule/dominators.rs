//! Dominator tree over the block graph.
//!
//! A block `d` **dominates** a block `n` if every path from the entry block to
//! `n` passes through `d`. The **immediate dominator** of `n` is the closest
//! strict dominator; making it each block's parent forms the dominator tree.
//!
//! # Algorithm
//!
//! The iterative data-flow formulation of Cooper, Harvey and Kennedy ("A Simple,
//! Fast Dominance Algorithm"). Blocks are processed in reverse postorder, which
//! the block numbering already is, so two-finger intersection compares block
//! ids directly. It converges in a couple of passes on reducible graphs.

use crate::schedule::cfg::{BlockId, ControlFlowGraph};

/// Immediate dominators and depths of every block.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator of each block. The entry maps to itself.
    idom: Vec<BlockId>,
    depth: Vec<usize>,
}

impl DominatorTree {
    /// Computes the dominator tree of `cfg`.
    #[must_use]
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let count = cfg.len();
        let mut idom: Vec<Option<usize>> = vec![None; count];
        if count == 0 {
            return Self {
                idom: Vec::new(),
                depth: Vec::new(),
            };
        }
        idom[0] = Some(0);

        let mut changed = true;
        while changed {
            changed = false;
            for block in 1..count {
                let mut new_idom: Option<usize> = None;
                for predecessor in cfg.block(BlockId::new(block)).predecessors() {
                    let p = predecessor.index();
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, p, current),
                    });
                }
                if new_idom.is_some() && idom[block] != new_idom {
                    idom[block] = new_idom;
                    changed = true;
                }
            }
        }

        let idom: Vec<BlockId> = idom
            .into_iter()
            .map(|d| BlockId::new(d.unwrap_or(0)))
            .collect();
        let mut depth = vec![0; count];
        for block in 1..count {
            depth[block] = depth[idom[block].index()] + 1;
        }
        Self { idom, depth }
    }

    /// The entry block.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    /// The immediate dominator of `block`, or `None` for the entry.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        (block != self.entry()).then(|| self.idom[block.index()])
    }

    /// Checks if `a` dominates `b`. A block dominates itself.
    ///
    /// # Complexity
    ///
    /// O(depth(b) - depth(a)).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        while self.depth(current) > self.depth(a) {
            current = self.idom[current.index()];
        }
        current == a
    }

    /// Checks if `a` dominates `b` and `a != b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Iterates the dominators of `block`, from `block` itself up to the entry.
    #[must_use]
    pub fn dominators(&self, block: BlockId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: Some(block),
        }
    }

    /// Depth of `block` in the tree; the entry has depth 0.
    #[must_use]
    pub fn depth(&self, block: BlockId) -> usize {
        self.depth[block.index()]
    }

    /// Blocks whose immediate dominator is `block`.
    #[must_use]
    pub fn children(&self, block: BlockId) -> Vec<BlockId> {
        (1..self.idom.len())
            .filter(|&b| self.idom[b] == block)
            .map(BlockId::new)
            .collect()
    }

    /// Nearest common dominator of `a` and `b`.
    #[must_use]
    pub fn lca(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        while self.depth(a) > self.depth(b) {
            a = self.idom[a.index()];
        }
        while self.depth(b) > self.depth(a) {
            b = self.idom[b.index()];
        }
        while a != b {
            a = self.idom[a.index()];
            b = self.idom[b.index()];
        }
        a
    }

    /// Number of blocks in the tree.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

fn intersect(idom: &[Option<usize>], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = idom[a].unwrap_or(0);
        }
        while b > a {
            b = idom[b].unwrap_or(0);
        }
    }
    a
}

/// Iterator over the dominators of a block, innermost first.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<BlockId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Condition, GraphBuilder, ValueKind},
        Result,
    };

    #[test]
    fn test_diamond() -> Result<()> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let cond = b.compare(Condition::Eq, p, zero)?;
        let (t, f) = b.branch(cond)?;
        b.switch_to(t);
        let left = b.end()?;
        b.switch_to(f);
        let right = b.end()?;
        let merge = b.merge(&[left, right])?;
        b.ret(None)?;
        let graph = b.finish();

        let cfg = ControlFlowGraph::build(&graph)?;
        let dom = DominatorTree::compute(&cfg);
        let block = |n| cfg.block_of(n).ok_or_else(|| internal_fault!(node = n, "no block"));
        let (bt, bf, bm) = (block(t)?, block(f)?, block(merge)?);

        assert_eq!(dom.immediate_dominator(bm), Some(cfg.entry()));
        assert_eq!(dom.immediate_dominator(cfg.entry()), None);
        assert!(dom.dominates(cfg.entry(), bm));
        assert!(!dom.dominates(bt, bm));
        assert!(dom.strictly_dominates(cfg.entry(), bf));
        assert_eq!(dom.lca(bt, bf), cfg.entry());
        assert_eq!(dom.depth(bm), 1);
        assert_eq!(dom.children(cfg.entry()).len(), 3);
        assert_eq!(dom.dominators(bt).collect::<Vec<_>>(), vec![bt, cfg.entry()]);
        Ok(())
    }
}
