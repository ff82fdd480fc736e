//! Scheduler integration tests.
//!
//! Besides [`Schedule::validate`] these tests re-check scheduling validity on
//! their own: every data input of a node must be placed in a block dominating
//! the node's block, or earlier in the same block.

use tiergraph::{
    compiler::SchedulePolicy,
    ir::{BinaryOp, Condition, Graph, GraphBuilder, NodeId, ValueKind},
    schedule::{schedule, BlockId, ControlFlowGraph, DominatorTree, Schedule},
    Result,
};

const POLICIES: [SchedulePolicy; 2] = [SchedulePolicy::Earliest, SchedulePolicy::Latest];

fn block(schedule: &Schedule, node: NodeId) -> BlockId {
    schedule.block_of(node).expect("node is scheduled")
}

fn assert_inputs_available(graph: &Graph, schedule: &Schedule) {
    for node in graph.nodes() {
        let kind = graph.kind(node);
        if kind.is_merge() {
            continue;
        }
        let here = block(schedule, node);
        let position = |n: NodeId, b: BlockId| schedule.nodes(b).iter().position(|&x| x == n);
        for (index, &input) in graph[node].inputs().iter().enumerate() {
            let (user_block, before) = if kind.is_phi() && index > 0 {
                let merge = graph[node].inputs()[0];
                let end = graph[merge].inputs()[index - 1];
                (block(schedule, end), None)
            } else {
                (here, position(node, here))
            };
            let input_block = block(schedule, input);
            if input_block == user_block {
                if let Some(before) = before {
                    assert!(
                        position(input, input_block) < Some(before),
                        "{input} must precede {node}"
                    );
                }
            } else {
                assert!(
                    schedule.dominators().dominates(input_block, user_block),
                    "{input} in {input_block} does not dominate {node} in {user_block}"
                );
            }
        }
    }
}

/// Both arms compute `p + q`; value numbering leaves one add used by both
/// phi inputs.
fn diamond_with_shared_add() -> Result<(Graph, NodeId, NodeId)> {
    let mut b = GraphBuilder::new();
    let p = b.parameter(0, ValueKind::Int)?;
    let q = b.parameter(1, ValueKind::Int)?;
    let cond = b.compare(Condition::Eq, p, q)?;
    let (t, f) = b.branch(cond)?;

    b.switch_to(t);
    let left = b.binary(BinaryOp::Add, ValueKind::Int, p, q)?;
    let end_t = b.end()?;

    b.switch_to(f);
    let right = b.binary(BinaryOp::Add, ValueKind::Int, p, q)?;
    let end_f = b.end()?;
    assert_eq!(left, right, "unique() deduplicates the add");

    let merge = b.merge(&[end_t, end_f])?;
    let phi = b.phi(ValueKind::Int, merge, &[left, right])?;
    b.ret(Some(phi))?;
    Ok((b.finish(), left, phi))
}

#[test]
fn test_diamond_add_in_common_dominator() -> Result<()> {
    let (graph, add, phi) = diamond_with_shared_add()?;
    for policy in POLICIES {
        let schedule = schedule(&graph, policy)?;
        schedule.validate(&graph)?;
        assert_inputs_available(&graph, &schedule);

        let entry = schedule.cfg().entry();
        assert_eq!(block(&schedule, add), entry, "{policy}");
        assert_ne!(block(&schedule, phi), entry);
        assert_eq!(schedule.block_count(), 4);
    }
    Ok(())
}

fn nested_loops() -> Result<(Graph, NodeId, NodeId)> {
    let mut b = GraphBuilder::new();
    let n = b.parameter(0, ValueKind::Int)?;
    let zero = b.int(0)?;
    let one = b.int(1)?;

    let outer = b.loop_begin()?;
    let i = b.phi(ValueKind::Int, outer, &[zero])?;
    let outer_cond = b.compare(Condition::Lt, i, n)?;
    let (outer_body, outer_exit) = b.branch(outer_cond)?;

    b.switch_to(outer_body);
    let inner = b.loop_begin()?;
    let j = b.phi(ValueKind::Int, inner, &[zero])?;
    let inner_cond = b.compare(Condition::Lt, j, n)?;
    let (inner_body, inner_exit) = b.branch(inner_cond)?;

    b.switch_to(inner_body);
    let square = b.binary(BinaryOp::Mul, ValueKind::Int, n, n)?;
    let next_j = b.binary(BinaryOp::Add, ValueKind::Int, j, square)?;
    b.loop_end(inner, |_| next_j)?;

    b.switch_to(inner_exit);
    b.loop_exit(inner)?;
    let next_i = b.binary(BinaryOp::Add, ValueKind::Int, i, one)?;
    b.loop_end(outer, |_| next_i)?;

    b.switch_to(outer_exit);
    b.loop_exit(outer)?;
    b.ret(Some(i))?;
    Ok((b.finish(), square, next_j))
}

#[test]
fn test_invariant_leaves_nested_loops() -> Result<()> {
    let (graph, square, next_j) = nested_loops()?;
    for policy in POLICIES {
        let schedule = schedule(&graph, policy)?;
        schedule.validate(&graph)?;
        assert_inputs_available(&graph, &schedule);

        let loops = schedule.loops();
        assert_eq!(loops.loops().len(), 2);
        assert_eq!(loops.loop_depth(block(&schedule, square)), 0, "{policy}");
        assert_eq!(loops.loop_depth(block(&schedule, next_j)), 2, "{policy}");
    }
    Ok(())
}

#[test]
fn test_dominators_of_diamond() -> Result<()> {
    let (graph, _, phi) = diamond_with_shared_add()?;
    let cfg = ControlFlowGraph::build(&graph)?;
    let dom = DominatorTree::compute(&cfg);
    let entry = cfg.entry();
    let join = cfg
        .block_of(graph[phi].input(0).expect("phi has a merge"))
        .expect("merge is in a block");

    assert_eq!(dom.immediate_dominator(join), Some(entry));
    assert_eq!(dom.children(entry).len(), 3);
    for block in cfg.blocks() {
        assert!(dom.dominates(entry, block.id()));
    }
    Ok(())
}

#[test]
fn test_schedule_is_deterministic() -> Result<()> {
    let (graph, _, _) = nested_loops()?;
    for policy in POLICIES {
        let a = schedule(&graph, policy)?;
        let b = schedule(&graph, policy)?;
        for id in a.blocks() {
            assert_eq!(a.nodes(id), b.nodes(id));
        }
    }
    Ok(())
}
