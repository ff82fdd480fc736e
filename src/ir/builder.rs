//! Fluent programmatic construction of graphs.
//!
//! [`GraphBuilder`] keeps a cursor on the last appended fixed node; appending a
//! fixed node links it as the cursor's successor. Terminators clear the cursor,
//! [`GraphBuilder::switch_to`] moves it to another block.
//!
//! # Example
//!
//! ```rust
//! use tiergraph::ir::{GraphBuilder, ValueKind};
//!
//! let mut b = GraphBuilder::new();
//! let x = b.parameter(0, ValueKind::Int)?;
//! let (then_begin, else_begin) = b.branch(x)?;
//! b.switch_to(then_begin);
//! let e1 = b.end()?;
//! b.switch_to(else_begin);
//! let e2 = b.end()?;
//! let merge = b.merge(&[e1, e2])?;
//! let one = b.int(1)?;
//! let phi = b.phi(ValueKind::Int, merge, &[one, x])?;
//! b.ret(Some(phi))?;
//!
//! let graph = b.finish();
//! graph.verify()?;
//! # Ok::<(), tiergraph::Error>(())
//! ```

use std::sync::Arc;

use crate::{
    ir::{
        graph::Graph,
        kind::NodeKind,
        node::{Node, NodeId},
        value::{
            BinaryOp, Callee, Condition, Constant, DeoptimizationAction, DeoptimizationReason,
            FieldRef, InvokeKind, MethodId, UnaryOp, ValueKind,
        },
    },
    Error, Result,
};

/// Builds a [`Graph`] with a control-flow cursor.
pub struct GraphBuilder {
    graph: Graph,
    current: Option<NodeId>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Starts a new graph; the cursor is on the start node.
    #[must_use]
    pub fn new() -> Self {
        Self::from_graph(Graph::new())
    }

    /// Starts a new graph for `method`.
    #[must_use]
    pub fn for_method(method: MethodId) -> Self {
        Self::from_graph(Graph::for_method(method))
    }

    fn from_graph(graph: Graph) -> Self {
        let current = Some(graph.start());
        Self { graph, current }
    }

    /// Access to the graph under construction.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access to the graph under construction.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// The node new fixed nodes are appended to, if any.
    #[must_use]
    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    /// Moves the cursor to `node`.
    pub fn switch_to(&mut self, node: NodeId) {
        self.current = Some(node);
    }

    /// Finishes construction.
    #[must_use]
    pub fn finish(self) -> Graph {
        self.graph
    }

    /// Adds (or reuses) a floating node.
    ///
    /// # Errors
    ///
    /// Returns an error if an input does not exist.
    pub fn floating(&mut self, kind: NodeKind, inputs: Vec<NodeId>) -> Result<NodeId> {
        self.graph.unique(Node::new(kind, inputs))
    }

    /// Appends a fixed node at the cursor.
    ///
    /// The cursor moves to the new node, or is cleared for terminators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn append(&mut self, kind: NodeKind, inputs: Vec<NodeId>) -> Result<NodeId> {
        let Some(current) = self.current else {
            return Err(Error::InvalidEdge {
                node: self.graph.start(),
                message: format!("no open block to append {kind} to"),
            });
        };
        let terminator = kind.is_terminator();
        let id = self.graph.add(Node::new(kind, inputs))?;
        self.graph.set_next(current, id)?;
        self.current = if terminator { None } else { Some(id) };
        Ok(id)
    }

    /// Adds a constant.
    ///
    /// # Errors
    ///
    /// Never fails in practice; mirrors [`Graph::unique`].
    pub fn constant(&mut self, value: Constant) -> Result<NodeId> {
        self.graph.constant(value)
    }

    /// Adds an `Int` constant.
    ///
    /// # Errors
    ///
    /// Never fails in practice; mirrors [`Graph::unique`].
    pub fn int(&mut self, value: i32) -> Result<NodeId> {
        self.constant(Constant::Int(value))
    }

    /// Adds a `Long` constant.
    ///
    /// # Errors
    ///
    /// Never fails in practice; mirrors [`Graph::unique`].
    pub fn long(&mut self, value: i64) -> Result<NodeId> {
        self.constant(Constant::Long(value))
    }

    /// Adds (or reuses) parameter `index`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; mirrors [`Graph::unique`].
    pub fn parameter(&mut self, index: u16, kind: ValueKind) -> Result<NodeId> {
        self.floating(NodeKind::Parameter { index, kind }, Vec::new())
    }

    /// Adds a binary operation.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn binary(&mut self, op: BinaryOp, kind: ValueKind, x: NodeId, y: NodeId) -> Result<NodeId> {
        self.floating(NodeKind::Binary { op, kind }, vec![x, y])
    }

    /// Adds a unary operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the operand does not exist.
    pub fn unary(&mut self, op: UnaryOp, kind: ValueKind, x: NodeId) -> Result<NodeId> {
        self.floating(NodeKind::Unary { op, kind }, vec![x])
    }

    /// Adds a comparison.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn compare(&mut self, condition: Condition, x: NodeId, y: NodeId) -> Result<NodeId> {
        self.floating(NodeKind::Compare { condition }, vec![x, y])
    }

    /// Adds a null test.
    ///
    /// # Errors
    ///
    /// Returns an error if the operand does not exist.
    pub fn is_null(&mut self, x: NodeId) -> Result<NodeId> {
        self.floating(NodeKind::IsNull, vec![x])
    }

    /// Appends an `If` with fresh `Begin`s on both branches.
    ///
    /// Returns `(true_begin, false_begin)` and clears the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn branch(&mut self, condition: NodeId) -> Result<(NodeId, NodeId)> {
        let split = self.append(NodeKind::If, vec![condition])?;
        let on_true = self.graph.add(Node::new(NodeKind::Begin, Vec::new()))?;
        let on_false = self.graph.add(Node::new(NodeKind::Begin, Vec::new()))?;
        self.graph.set_successor(split, 0, Some(on_true))?;
        self.graph.set_successor(split, 1, Some(on_false))?;
        Ok((on_true, on_false))
    }

    /// Appends a forward `End` and clears the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn end(&mut self) -> Result<NodeId> {
        self.append(NodeKind::End, Vec::new())
    }

    /// Creates a merge of `ends` and moves the cursor to it.
    ///
    /// # Errors
    ///
    /// Returns an error if an end does not exist.
    pub fn merge(&mut self, ends: &[NodeId]) -> Result<NodeId> {
        let merge = self.graph.add(Node::new(NodeKind::Merge, ends.to_vec()))?;
        self.current = Some(merge);
        Ok(merge)
    }

    /// Adds a phi at `merge` with one value per merge end.
    ///
    /// # Errors
    ///
    /// Returns an error if an input does not exist.
    pub fn phi(&mut self, kind: ValueKind, merge: NodeId, values: &[NodeId]) -> Result<NodeId> {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        inputs.extend_from_slice(values);
        self.graph.add(Node::new(NodeKind::Phi { kind }, inputs))
    }

    /// Closes the current block with a forward end and opens a loop header on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn loop_begin(&mut self) -> Result<NodeId> {
        let forward = self.end()?;
        let header = self
            .graph
            .add(Node::new(NodeKind::LoopBegin, vec![forward]))?;
        self.current = Some(header);
        Ok(header)
    }

    /// Appends a back edge to `header` and clears the cursor.
    ///
    /// Phis of the header are grown with `value_for(phi)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn loop_end(
        &mut self,
        header: NodeId,
        value_for: impl FnMut(NodeId) -> NodeId,
    ) -> Result<NodeId> {
        let end = self.append(NodeKind::LoopEnd, Vec::new())?;
        self.graph.add_merge_end(header, end, value_for)?;
        Ok(end)
    }

    /// Appends a loop exit of `header` at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn loop_exit(&mut self, header: NodeId) -> Result<NodeId> {
        self.append(NodeKind::LoopExit, vec![header])
    }

    /// Appends a return.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn ret(&mut self, value: Option<NodeId>) -> Result<NodeId> {
        self.append(NodeKind::Return, value.into_iter().collect())
    }

    /// Appends a deoptimization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn deoptimize(
        &mut self,
        action: DeoptimizationAction,
        reason: DeoptimizationReason,
    ) -> Result<NodeId> {
        self.append(NodeKind::Deoptimize { action, reason }, Vec::new())
    }

    /// Appends a fixed guard that deoptimizes unless `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn fixed_guard(
        &mut self,
        condition: NodeId,
        reason: DeoptimizationReason,
        negated: bool,
    ) -> Result<NodeId> {
        self.append(
            NodeKind::FixedGuard {
                action: DeoptimizationAction::InvalidateReprofile,
                reason,
                negated,
            },
            vec![condition],
        )
    }

    /// Appends an allocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn new_instance(&mut self, class: &str, fields: u16) -> Result<NodeId> {
        self.append(
            NodeKind::NewInstance {
                class: Arc::from(class),
                fields,
            },
            Vec::new(),
        )
    }

    /// Appends a field load.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn load_field(&mut self, field: FieldRef, object: NodeId) -> Result<NodeId> {
        self.append(NodeKind::LoadField { field }, vec![object])
    }

    /// Appends a field store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn store_field(&mut self, field: FieldRef, object: NodeId, value: NodeId) -> Result<NodeId> {
        self.append(NodeKind::StoreField { field }, vec![object, value])
    }

    /// Appends a call: a call target over `arguments` plus the invoke using it.
    ///
    /// For [`Callee::Indirect`] the first argument is the target method value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn invoke(
        &mut self,
        bci: u32,
        invoke_kind: InvokeKind,
        callee: Callee,
        return_kind: ValueKind,
        arguments: &[NodeId],
        state: Option<NodeId>,
    ) -> Result<NodeId> {
        let target = self.graph.add(Node::new(
            NodeKind::CallTarget {
                invoke_kind,
                callee,
                return_kind,
            },
            arguments.to_vec(),
        ))?;
        let mut inputs = vec![target];
        inputs.extend(state);
        self.append(NodeKind::Invoke { bci }, inputs)
    }

    /// Adds a frame state over `locals` followed by `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not exist or there are more than
    /// `u16::MAX` slots.
    pub fn frame_state(&mut self, bci: u32, locals: &[NodeId], stack: &[NodeId]) -> Result<NodeId> {
        let too_many = |_| Error::InvalidEdge {
            node: self.graph.start(),
            message: "frame state too large".to_string(),
        };
        let kind = NodeKind::FrameState {
            bci,
            locals: u16::try_from(locals.len()).map_err(too_many)?,
            stack: u16::try_from(stack.len()).map_err(too_many)?,
        };
        let inputs = locals.iter().chain(stack).copied().collect();
        self.graph.add(Node::new(kind, inputs))
    }

    /// Appends a marker that partial evaluation must remove.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdge`] if there is no cursor.
    pub fn never_part_of_compilation(&mut self, message: &str) -> Result<NodeId> {
        self.append(
            NodeKind::NeverPartOfCompilation {
                message: Arc::from(message),
            },
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line() -> Result<()> {
        let mut b = GraphBuilder::new();
        let obj = b.new_instance("Point", 2)?;
        let field = FieldRef::new("Point", "x", 0, ValueKind::Int);
        let seven = b.int(7)?;
        let store = b.store_field(field.clone(), obj, seven)?;
        let load = b.load_field(field, obj)?;
        let ret = b.ret(Some(load))?;
        assert_eq!(b.current(), None);
        let graph = b.finish();

        assert_eq!(graph.straight_line_from(obj), vec![obj, store, load, ret]);
        graph.verify()
    }

    #[test]
    fn test_append_without_cursor_fails() -> Result<()> {
        let mut b = GraphBuilder::new();
        b.ret(None)?;
        assert!(b.ret(None).is_err());
        Ok(())
    }

    #[test]
    fn test_counting_loop() -> Result<()> {
        let mut b = GraphBuilder::new();
        let n = b.parameter(0, ValueKind::Int)?;
        let zero = b.int(0)?;
        let one = b.int(1)?;
        let header = b.loop_begin()?;
        let i = b.phi(ValueKind::Int, header, &[zero])?;
        let cond = b.compare(Condition::Lt, i, n)?;
        let (body, exit) = b.branch(cond)?;
        b.switch_to(body);
        let next = b.binary(BinaryOp::Add, ValueKind::Int, i, one)?;
        b.loop_end(header, |_| next)?;
        b.switch_to(exit);
        b.loop_exit(header)?;
        b.ret(Some(i))?;
        let graph = b.finish();

        assert_eq!(graph[i].inputs().len(), 3);
        graph.verify()
    }
}
