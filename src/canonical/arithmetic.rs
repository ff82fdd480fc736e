//! Canonicalization rules for floating arithmetic.
//!
//! ## Operand order
//! - a constant operand of a commutative operation moves to the right
//! - a constant operand on the left of a comparison moves to the right, mirroring
//!   the condition
//!
//! ## Folding
//! - `c1 op c2` → constant, with the kind's wrap-around and shift masking
//! - `neg c`, `not c` → constant
//! - comparisons of two constants, `isNull` of constants and fresh allocations
//!
//! ## Identities
//! - `x | x` → `x`, `x & x` → `x`
//! - `x ^ x` → `0`, `x - x` → `0`
//! - `x | 0`, `x ^ 0`, `x + 0`, `x - 0`, `x << 0`, `x >> 0`, `x >>> 0` → `x`
//! - `x | -1` → `-1`, `x & 0` → `0`, `x * 0` → `0`
//! - `x & -1` → `x`, `x * 1` → `x`
//! - `neg neg x` → `x`, `not not x` → `x`
//! - `x cmp x` → the condition's reflexive result
//!
//! ## Reassociation
//! - `(x op c1) op c2` → `x op (c1 op c2)` for `+ * & | ^`

use crate::{
    canonical::Canonical,
    ir::{BinaryOp, Condition, Constant, Graph, Node, NodeId, NodeKind, ValueKind},
    Result,
};

fn constant(graph: &mut Graph, kind: ValueKind, value: i64) -> Result<Option<NodeId>> {
    match Constant::from_i64(kind, value) {
        Some(c) => graph.constant(c).map(Some),
        None => Ok(None),
    }
}

fn replaced(node: Option<NodeId>) -> Canonical {
    node.map_or(Canonical::Unchanged, Canonical::Replaced)
}

fn is_associative(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
    )
}

/// Rule for `Binary` nodes.
pub(crate) fn binary(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let NodeKind::Binary { op, kind } = *graph.kind(id) else {
        return Ok(Canonical::Unchanged);
    };
    let &[mut x, mut y] = graph[id].inputs() else {
        return Ok(Canonical::Unchanged);
    };

    let mut swapped = false;
    if op.is_commutative() && graph.int_value(x).is_some() && graph.int_value(y).is_none() {
        graph.swap_inputs(id, 0, 1)?;
        std::mem::swap(&mut x, &mut y);
        swapped = true;
    }

    let cx = graph.int_value(x);
    let cy = graph.int_value(y);

    if let (Some(a), Some(b)) = (cx, cy) {
        if let Some(value) = op.fold(kind, a, b) {
            return Ok(replaced(constant(graph, kind, value)?));
        }
    }

    if let Some(c) = cy {
        let bits = i64::from(kind.bits().unwrap_or(64));
        let identity = match op {
            BinaryOp::Or | BinaryOp::Xor | BinaryOp::Add | BinaryOp::Sub => c == 0,
            BinaryOp::And => c == -1,
            BinaryOp::Mul => c == 1,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => c & (bits - 1) == 0,
        };
        if identity {
            return Ok(Canonical::Replaced(x));
        }

        let absorbing = match op {
            BinaryOp::Or if c == -1 => Some(-1),
            BinaryOp::And | BinaryOp::Mul if c == 0 => Some(0),
            _ => None,
        };
        if let Some(value) = absorbing {
            return Ok(replaced(constant(graph, kind, value)?));
        }

        if is_associative(op) {
            if let NodeKind::Binary {
                op: inner_op,
                kind: inner_kind,
            } = *graph.kind(x)
            {
                let inner = graph[x].inputs().to_vec();
                if inner_op == op && inner_kind == kind && inner.len() == 2 {
                    if let Some(c1) = graph.int_value(inner[1]) {
                        if let Some(value) = op.fold(kind, c1, c) {
                            let Some(folded) = constant(graph, kind, value)? else {
                                return Ok(Canonical::Unchanged);
                            };
                            let node = graph.unique(Node::new(
                                NodeKind::Binary { op, kind },
                                vec![inner[0], folded],
                            ))?;
                            return Ok(Canonical::Replaced(node));
                        }
                    }
                }
            }
        }
    }

    if x == y {
        match op {
            BinaryOp::Or | BinaryOp::And => return Ok(Canonical::Replaced(x)),
            BinaryOp::Xor | BinaryOp::Sub => return Ok(replaced(constant(graph, kind, 0)?)),
            _ => {}
        }
    }

    Ok(if swapped {
        Canonical::Simplified
    } else {
        Canonical::Unchanged
    })
}

/// Rule for `Unary` nodes.
pub(crate) fn unary(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let NodeKind::Unary { op, kind } = *graph.kind(id) else {
        return Ok(Canonical::Unchanged);
    };
    let Some(x) = graph[id].input(0) else {
        return Ok(Canonical::Unchanged);
    };

    if let Some(value) = graph.int_value(x).and_then(|c| op.fold(kind, c)) {
        return Ok(replaced(constant(graph, kind, value)?));
    }

    if let NodeKind::Unary {
        op: inner_op,
        kind: inner_kind,
    } = *graph.kind(x)
    {
        if inner_op == op && inner_kind == kind {
            if let Some(inner) = graph[x].input(0) {
                return Ok(Canonical::Replaced(inner));
            }
        }
    }
    Ok(Canonical::Unchanged)
}

/// Rule for `Compare` nodes.
pub(crate) fn compare(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let NodeKind::Compare { condition } = *graph.kind(id) else {
        return Ok(Canonical::Unchanged);
    };
    let &[x, y] = graph[id].inputs() else {
        return Ok(Canonical::Unchanged);
    };

    if x == y {
        let result = Constant::from_bool(condition.reflexive());
        return graph.constant(result).map(Canonical::Replaced);
    }

    match (graph.constant_of(x), graph.constant_of(y)) {
        (Some(a), Some(b)) => {
            let result = match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => Some(condition.fold(a, b)),
                (None, None) => match condition {
                    Condition::Eq => Some(a == b),
                    Condition::Ne => Some(a != b),
                    _ => None,
                },
                _ => None,
            };
            match result {
                Some(value) => graph
                    .constant(Constant::from_bool(value))
                    .map(Canonical::Replaced),
                None => Ok(Canonical::Unchanged),
            }
        }
        (Some(_), None) => {
            graph.swap_inputs(id, 0, 1)?;
            graph.set_kind(
                id,
                NodeKind::Compare {
                    condition: condition.mirror(),
                },
            )?;
            Ok(Canonical::Simplified)
        }
        _ => Ok(Canonical::Unchanged),
    }
}

/// Rule for `IsNull` nodes.
pub(crate) fn is_null(graph: &mut Graph, id: NodeId) -> Result<Canonical> {
    let Some(x) = graph[id].input(0) else {
        return Ok(Canonical::Unchanged);
    };
    let result = match graph.kind(x) {
        NodeKind::Constant(c) => Some(c.is_null()),
        NodeKind::NewInstance { .. } | NodeKind::ExceptionObject => Some(false),
        _ => None,
    };
    match result {
        Some(value) => graph
            .constant(Constant::from_bool(value))
            .map(Canonical::Replaced),
        None => Ok(Canonical::Unchanged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, UnaryOp};

    fn setup() -> (GraphBuilder, NodeId) {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, ValueKind::Int).unwrap();
        (b, p)
    }

    fn apply(b: &mut GraphBuilder, id: NodeId) -> Canonical {
        let rule = match b.graph().kind(id) {
            NodeKind::Binary { .. } => binary,
            NodeKind::Unary { .. } => unary,
            NodeKind::Compare { .. } => compare,
            _ => is_null,
        };
        rule(b.graph_mut(), id).unwrap()
    }

    fn folded(b: &GraphBuilder, outcome: Canonical) -> Option<i64> {
        match outcome {
            Canonical::Replaced(n) => b.graph().int_value(n),
            _ => None,
        }
    }

    #[test]
    fn test_or_constants() {
        let (mut b, _) = setup();
        let three = b.int(3).unwrap();
        let five = b.int(5).unwrap();
        let or = b.binary(BinaryOp::Or, ValueKind::Int, three, five).unwrap();
        let outcome = apply(&mut b, or);
        assert_eq!(folded(&b, outcome), Some(7));
    }

    #[test]
    fn test_or_identities() {
        let (mut b, x) = setup();
        let same = b.binary(BinaryOp::Or, ValueKind::Int, x, x).unwrap();
        assert_eq!(apply(&mut b, same), Canonical::Replaced(x));

        let zero = b.int(0).unwrap();
        let with_zero = b.binary(BinaryOp::Or, ValueKind::Int, x, zero).unwrap();
        assert_eq!(apply(&mut b, with_zero), Canonical::Replaced(x));

        let ones = b.int(-1).unwrap();
        let with_ones = b.binary(BinaryOp::Or, ValueKind::Int, x, ones).unwrap();
        assert_eq!(apply(&mut b, with_ones), Canonical::Replaced(ones));
    }

    #[test]
    fn test_constant_moves_right() {
        let (mut b, x) = setup();
        let ones = b.int(-1).unwrap();
        let or = b.binary(BinaryOp::Or, ValueKind::Int, ones, x).unwrap();
        assert_eq!(apply(&mut b, or), Canonical::Replaced(ones));
        assert_eq!(b.graph()[or].inputs(), &[x, ones]);

        let two = b.int(2).unwrap();
        let add = b.binary(BinaryOp::Add, ValueKind::Int, two, x).unwrap();
        assert_eq!(apply(&mut b, add), Canonical::Simplified);
        assert_eq!(b.graph()[add].inputs(), &[x, two]);
        assert_eq!(apply(&mut b, add), Canonical::Unchanged);
    }

    #[test]
    fn test_self_cancelling() {
        let (mut b, x) = setup();
        let xor = b.binary(BinaryOp::Xor, ValueKind::Int, x, x).unwrap();
        let outcome = apply(&mut b, xor);
        assert_eq!(folded(&b, outcome), Some(0));
    }

    #[test]
    fn test_long_wraps() {
        let (mut b, _) = setup();
        let max = b.long(i64::MAX).unwrap();
        let one = b.long(1).unwrap();
        let add = b.binary(BinaryOp::Add, ValueKind::Long, max, one).unwrap();
        let outcome = apply(&mut b, add);
        assert_eq!(folded(&b, outcome), Some(i64::MIN));
    }

    #[test]
    fn test_shift_by_width_is_identity() {
        let (mut b, x) = setup();
        let thirty_two = b.int(32).unwrap();
        let shl = b.binary(BinaryOp::Shl, ValueKind::Int, x, thirty_two).unwrap();
        assert_eq!(apply(&mut b, shl), Canonical::Replaced(x));
    }

    #[test]
    fn test_reassociation() {
        let (mut b, x) = setup();
        let two = b.int(2).unwrap();
        let three = b.int(3).unwrap();
        let inner = b.binary(BinaryOp::Add, ValueKind::Int, x, two).unwrap();
        let outer = b.binary(BinaryOp::Add, ValueKind::Int, inner, three).unwrap();
        let Canonical::Replaced(n) = apply(&mut b, outer) else {
            panic!("expected reassociation");
        };
        let graph = b.graph();
        assert_eq!(graph[n].inputs()[0], x);
        assert_eq!(graph.int_value(graph[n].inputs()[1]), Some(5));
    }

    #[test]
    fn test_double_negation() {
        let (mut b, x) = setup();
        let neg = b.unary(UnaryOp::Neg, ValueKind::Int, x).unwrap();
        let neg2 = b.unary(UnaryOp::Neg, ValueKind::Int, neg).unwrap();
        assert_eq!(apply(&mut b, neg2), Canonical::Replaced(x));

        let c = b.int(5).unwrap();
        let not = b.unary(UnaryOp::Not, ValueKind::Int, c).unwrap();
        let outcome = apply(&mut b, not);
        assert_eq!(folded(&b, outcome), Some(-6));
    }

    #[test]
    fn test_compare() {
        let (mut b, x) = setup();
        let same = b.compare(Condition::Lt, x, x).unwrap();
        let outcome = apply(&mut b, same);
        assert_eq!(folded(&b, outcome), Some(0));

        let one = b.int(1).unwrap();
        let two = b.int(2).unwrap();
        let consts = b.compare(Condition::Lt, one, two).unwrap();
        let outcome = apply(&mut b, consts);
        assert_eq!(folded(&b, outcome), Some(1));

        let flipped = b.compare(Condition::Lt, one, x).unwrap();
        assert_eq!(apply(&mut b, flipped), Canonical::Simplified);
        assert_eq!(
            b.graph().kind(flipped),
            &NodeKind::Compare {
                condition: Condition::Gt
            }
        );
        assert_eq!(b.graph()[flipped].inputs(), &[x, one]);
    }

    #[test]
    fn test_reference_compare_and_null_check() {
        let (mut b, _) = setup();
        let null = b.constant(Constant::Null).unwrap();
        let obj = b.constant(Constant::Object(crate::ir::ObjectId(1))).unwrap();
        let eq = b.compare(Condition::Eq, obj, null).unwrap();
        let outcome = apply(&mut b, eq);
        assert_eq!(folded(&b, outcome), Some(0));

        let check = b.is_null(null).unwrap();
        let outcome = apply(&mut b, check);
        assert_eq!(folded(&b, outcome), Some(1));

        let fresh = b.new_instance("Box", 1).unwrap();
        let check = b.is_null(fresh).unwrap();
        let outcome = apply(&mut b, check);
        assert_eq!(folded(&b, outcome), Some(0));
    }
}
