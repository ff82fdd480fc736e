//! Basic blocks over the fixed nodes of a graph.
//!
//! A block starts at a begin node (start, begin, merge, loop begin, loop exit,
//! exception object) or at any successor of a node with more than one
//! successor, and extends along single successors until the next begin node or
//! a terminator. Block edges follow the successor edges plus the implicit edges
//! from each `End`/`LoopEnd` to its merge.
//!
//! Blocks are numbered in reverse postorder, so [`BlockId`] order is a
//! topological order of the forward edges and the entry block is `B0`.

use std::{collections::HashMap, fmt};

use crate::{
    ir::{Graph, NodeId},
    Result,
};

/// Index of a block in reverse postorder.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl BlockId {
    /// Creates a block id from its reverse postorder index.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit in 32 bits.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or_else(|_| panic!("block index {index} overflows")))
    }

    /// Returns the reverse postorder index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A maximal straight-line run of fixed nodes.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    nodes: Vec<NodeId>,
    predecessors: Vec<BlockId>,
    successors: Vec<BlockId>,
}

impl Block {
    /// This block's id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The first fixed node.
    #[must_use]
    pub fn begin(&self) -> NodeId {
        self.nodes[0]
    }

    /// The last fixed node.
    #[must_use]
    pub fn end(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Fixed nodes in control order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Predecessor blocks. For merges, in the order of the merge's ends.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Successor blocks in successor slot order.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }
}

/// The block graph of a program graph.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<Block>,
    block_of: HashMap<NodeId, BlockId>,
}

struct RawBlock {
    nodes: Vec<NodeId>,
    successors: Vec<NodeId>,
}

impl ControlFlowGraph {
    /// Builds the blocks of every fixed node reachable from the start.
    ///
    /// # Errors
    ///
    /// Returns an internal fault if an end is not attached to a merge.
    pub fn build(graph: &Graph) -> Result<Self> {
        let mut raw: Vec<RawBlock> = Vec::new();
        let mut leader_index: HashMap<NodeId, usize> = HashMap::new();
        let mut worklist = vec![graph.start()];
        leader_index.insert(graph.start(), 0);

        while let Some(leader) = worklist.pop() {
            let mut nodes = vec![leader];
            let mut current = leader;
            let successors = loop {
                let node = graph.node(current)?;
                if node.kind().is_end() {
                    let merge = node
                        .usages()
                        .iter()
                        .copied()
                        .find(|&u| graph.kind(u).is_merge())
                        .ok_or_else(|| internal_fault!(node = current, "end without merge"))?;
                    break vec![merge];
                }
                let successors: Vec<NodeId> = node.successor_ids().collect();
                match successors.as_slice() {
                    &[next] if !graph.kind(next).is_begin() => {
                        nodes.push(next);
                        current = next;
                    }
                    _ => break successors,
                }
            };
            for &successor in &successors {
                if !leader_index.contains_key(&successor) {
                    leader_index.insert(successor, leader_index.len());
                    worklist.push(successor);
                }
            }
            let index = leader_index[&leader];
            if raw.len() <= index {
                raw.resize_with(index + 1, || RawBlock {
                    nodes: Vec::new(),
                    successors: Vec::new(),
                });
            }
            raw[index] = RawBlock { nodes, successors };
        }

        let edges: Vec<Vec<usize>> = raw
            .iter()
            .map(|block| block.successors.iter().map(|s| leader_index[s]).collect())
            .collect();
        let rpo = reverse_postorder(&edges);
        let mut renumber = vec![0usize; raw.len()];
        for (position, &block) in rpo.iter().enumerate() {
            renumber[block] = position;
        }

        let mut blocks: Vec<Block> = rpo
            .iter()
            .enumerate()
            .map(|(position, &old)| Block {
                id: BlockId::new(position),
                nodes: std::mem::take(&mut raw[old].nodes),
                predecessors: Vec::new(),
                successors: edges[old].iter().map(|&s| BlockId::new(renumber[s])).collect(),
            })
            .collect();

        let mut block_of = HashMap::new();
        for block in &blocks {
            for &node in &block.nodes {
                block_of.insert(node, block.id);
            }
        }

        for block in &mut blocks {
            let begin = block.begin();
            if graph.kind(begin).is_merge() {
                block.predecessors = graph[begin]
                    .inputs()
                    .iter()
                    .filter_map(|end| block_of.get(end).copied())
                    .collect();
            }
        }
        for index in 0..blocks.len() {
            let id = blocks[index].id;
            for successor in blocks[index].successors.clone() {
                let target = &mut blocks[successor.index()];
                if !graph.kind(target.begin()).is_merge() {
                    target.predecessors.push(id);
                }
            }
        }

        Ok(Self { blocks, block_of })
    }

    /// The entry block, holding the start node.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if there are no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks in reverse postorder.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The block with id `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// The block holding the fixed node `node`.
    #[must_use]
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.block_of.get(&node).copied()
    }
}

/// Reverse postorder of the blocks reachable from block 0.
fn reverse_postorder(edges: &[Vec<usize>]) -> Vec<usize> {
    let mut visited = vec![false; edges.len()];
    let mut postorder = Vec::with_capacity(edges.len());
    let mut stack = vec![(0usize, 0usize)];
    if !edges.is_empty() {
        visited[0] = true;
    }
    while let Some(top) = stack.last_mut() {
        let block = top.0;
        if let Some(&successor) = edges[block].get(top.1) {
            top.1 += 1;
            if !visited[successor] {
                visited[successor] = true;
                stack.push((successor, 0));
            }
        } else {
            postorder.push(block);
            stack.pop();
        }
    }
    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Condition, GraphBuilder, ValueKind};

    #[test]
    fn test_diamond_blocks() -> Result<()> {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let cond = b.compare(Condition::Lt, p, zero)?;
        let (t, f) = b.branch(cond)?;
        b.switch_to(t);
        let left = b.end()?;
        b.switch_to(f);
        let right = b.end()?;
        let merge = b.merge(&[left, right])?;
        let ret = b.ret(None)?;
        let graph = b.finish();

        let cfg = ControlFlowGraph::build(&graph)?;
        assert_eq!(cfg.len(), 4);
        let entry = cfg.block(cfg.entry());
        assert_eq!(entry.begin(), graph.start());
        assert_eq!(entry.successors().len(), 2);

        let join = cfg.block_of(merge).ok_or_else(|| internal_fault!("merge not in cfg"))?;
        assert_eq!(cfg.block_of(ret), Some(join));
        assert_eq!(join.index(), 3);
        assert_eq!(
            cfg.block(join).predecessors(),
            &[
                cfg.block_of(left).ok_or_else(|| internal_fault!("left"))?,
                cfg.block_of(right).ok_or_else(|| internal_fault!("right"))?
            ]
        );
        Ok(())
    }

    #[test]
    fn test_loop_back_edge() -> Result<()> {
        let mut b = GraphBuilder::new();
        let n = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let header = b.loop_begin()?;
        let i = b.phi(ValueKind::Int, header, &[zero])?;
        let cond = b.compare(Condition::Lt, i, n)?;
        let (body, exit) = b.branch(cond)?;
        b.switch_to(body);
        let back = b.loop_end(header, |_| i)?;
        b.switch_to(exit);
        b.loop_exit(header)?;
        b.ret(None)?;
        let graph = b.finish();

        let cfg = ControlFlowGraph::build(&graph)?;
        let head = cfg.block_of(header).ok_or_else(|| internal_fault!("header"))?;
        let tail = cfg.block_of(back).ok_or_else(|| internal_fault!("loop end"))?;
        assert_eq!(cfg.block(tail).successors(), &[head]);
        assert_eq!(cfg.block(head).predecessors().len(), 2);
        assert!(head < tail);
        Ok(())
    }
}
