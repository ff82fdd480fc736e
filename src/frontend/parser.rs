//! Abstract interpretation of decoded bytecode into an initial graph.
//!
//! The parser walks the basic blocks in bci order, keeping the abstract state
//! (local slots and operand stack, each a graph node) at every point:
//!
//! - a block with one incoming edge continues the predecessor's control flow
//! - a block with several incoming edges gets a `Merge` and a `Phi` for every
//!   slot whose incoming values differ
//! - a loop header (target of a backward jump) gets a `LoopBegin` with a `Phi`
//!   per live slot; each backward jump adds a `LoopEnd` and the phi values
//! - every invoke carries a `FrameState` of the state before the call
//!
//! Loops must be entered through their header: a forward jump from outside
//! a loop into its body is rejected.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::{
    frontend::bytecode::{Instruction, MethodDescriptor},
    ir::{
        Constant, DeoptimizationAction, DeoptimizationReason, Graph, GraphBuilder, NodeId,
        NodeKind, ValueKind,
    },
    Error, Result,
};

/// Builds the initial graph of `method`.
///
/// The result is verified and free of dead floating nodes. It has not been
/// canonicalized.
///
/// # Errors
///
/// Returns [`Error::InvalidBytecode`] for branch targets out of range, code
/// that falls off its end, stack underflow or height mismatches at joins,
/// uninitialized or out of range locals, return kind mismatches and jumps into
/// the middle of a loop.
///
/// # Examples
///
/// ```rust
/// use tiergraph::frontend::{build_initial_graph, Instruction, MethodDescriptor};
/// use tiergraph::ir::{BinaryOp, MethodId, NodeClass, ValueKind};
///
/// let method = MethodDescriptor::new(MethodId(1), "twice")
///     .with_parameters(&[ValueKind::Int])
///     .returning(ValueKind::Int)
///     .with_code(vec![
///         Instruction::Load(0),
///         Instruction::Dup,
///         Instruction::Binary(BinaryOp::Add, ValueKind::Int),
///         Instruction::ReturnValue,
///     ]);
/// let graph = build_initial_graph(&method)?;
/// assert_eq!(graph.nodes_of(NodeClass::Binary).count(), 1);
/// # Ok::<(), tiergraph::Error>(())
/// ```
pub fn build_initial_graph(method: &MethodDescriptor) -> Result<Graph> {
    let blocks = BlockMap::build(method)?;
    let mut parser = Parser {
        method,
        builder: GraphBuilder::for_method(method.id),
        blocks: &blocks,
        incoming: HashMap::new(),
        headers: HashMap::new(),
    };
    parser.parse()?;

    let mut graph = parser.builder.finish();
    let floating: Vec<NodeId> = graph.nodes().collect();
    for id in floating {
        if graph.is_alive(id) {
            graph.kill_unused_floating(id)?;
        }
    }
    graph.verify()?;
    debug!(
        "built {} ({} instructions): {} blocks, {} nodes",
        method.name,
        method.code.len(),
        blocks.starts.len(),
        graph.node_count()
    );
    Ok(graph)
}

fn invalid(bci: usize, message: impl Into<String>) -> Error {
    Error::InvalidBytecode {
        bci,
        message: message.into(),
    }
}

/// Basic block boundaries and loop structure of a method's code.
#[derive(Debug)]
struct BlockMap {
    /// First bci of every block, ascending.
    starts: Vec<usize>,
    /// Targets of backward jumps.
    headers: BTreeSet<usize>,
}

impl BlockMap {
    fn build(method: &MethodDescriptor) -> Result<Self> {
        let code = &method.code;
        if code.is_empty() {
            return Err(invalid(0, "method has no code"));
        }

        let mut leaders = BTreeSet::from([0]);
        for (bci, instruction) in code.iter().enumerate() {
            for target in instruction.targets() {
                if target >= code.len() {
                    return Err(invalid(bci, format!("branch target {target} out of range")));
                }
                leaders.insert(target);
            }
            if instruction.is_branch() && bci + 1 < code.len() {
                leaders.insert(bci + 1);
            }
        }
        let starts: Vec<usize> = leaders.into_iter().collect();

        let mut edges = Vec::new();
        for index in 0..starts.len() {
            let end = starts.get(index + 1).copied().unwrap_or(code.len());
            let last = end - 1;
            let instruction = &code[last];
            for target in instruction.targets() {
                edges.push((last, target));
            }
            if !instruction.ends_block() {
                if end >= code.len() {
                    return Err(invalid(last, "execution falls off the end of the code"));
                }
                edges.push((last, end));
            }
        }

        let mut headers = BTreeSet::new();
        for &(source, target) in &edges {
            if target > source {
                continue;
            }
            headers.insert(target);
            // No edge may enter (target, source] from outside [target, source].
            if let Some(&(from, to)) = edges.iter().find(|&&(from, to)| {
                to > target && to <= source && (from < target || from > source)
            }) {
                return Err(invalid(
                    from,
                    format!("jump to {to} enters the loop at {target} from outside"),
                ));
            }
        }

        Ok(Self { starts, headers })
    }

    fn end_of(&self, index: usize, code_len: usize) -> usize {
        self.starts.get(index + 1).copied().unwrap_or(code_len)
    }
}

/// Abstract interpreter state.
#[derive(Debug, Clone)]
struct State {
    locals: Vec<Option<NodeId>>,
    stack: Vec<NodeId>,
}

/// Control flow arriving at a block: the open fixed node to continue from and
/// the state along that edge.
#[derive(Debug)]
struct Incoming {
    cursor: NodeId,
    state: State,
}

/// A loop header and the phi of every slot, `None` for dead locals.
#[derive(Debug)]
struct LoopHeader {
    begin: NodeId,
    locals: Vec<Option<NodeId>>,
    stack: Vec<NodeId>,
}

struct Parser<'a> {
    method: &'a MethodDescriptor,
    builder: GraphBuilder,
    blocks: &'a BlockMap,
    incoming: HashMap<usize, Vec<Incoming>>,
    headers: HashMap<usize, LoopHeader>,
}

impl Parser<'_> {
    fn parse(&mut self) -> Result<()> {
        let mut locals = vec![None; self.method.local_count()];
        for (index, &kind) in self.method.parameters.iter().enumerate() {
            let index16 = u16::try_from(index).map_err(|_| invalid(0, "too many parameters"))?;
            locals[index] = Some(self.builder.parameter(index16, kind)?);
        }
        let start = self.builder.graph().start();
        self.incoming.entry(0).or_default().push(Incoming {
            cursor: start,
            state: State {
                locals,
                stack: Vec::new(),
            },
        });

        for index in 0..self.blocks.starts.len() {
            let start = self.blocks.starts[index];
            let end = self.blocks.end_of(index, self.method.code.len());
            let Some(incoming) = self.incoming.remove(&start) else {
                debug!("{}: block at {start} is unreachable", self.method.name);
                continue;
            };
            let mut state = self.join(start, incoming)?;
            if self.blocks.headers.contains(&start) {
                state = self.open_loop(start, state)?;
            }
            self.interpret(start, end, state)?;
        }

        Ok(())
    }

    /// Combines the control flow arriving at `bci` and positions the builder.
    fn join(&mut self, bci: usize, mut incoming: Vec<Incoming>) -> Result<State> {
        if incoming.len() == 1 {
            let Incoming { cursor, state } = incoming.remove(0);
            self.builder.switch_to(cursor);
            return Ok(state);
        }

        let height = incoming[0].state.stack.len();
        if incoming.iter().any(|i| i.state.stack.len() != height) {
            return Err(invalid(bci, "stack height differs between predecessors"));
        }
        let mut ends = Vec::with_capacity(incoming.len());
        for edge in &incoming {
            self.builder.switch_to(edge.cursor);
            ends.push(self.builder.end()?);
        }
        let merge = self.builder.merge(&ends)?;

        let mut locals = Vec::with_capacity(incoming[0].state.locals.len());
        for slot in 0..incoming[0].state.locals.len() {
            let values: Option<Vec<NodeId>> =
                incoming.iter().map(|i| i.state.locals[slot]).collect();
            locals.push(match values {
                Some(values) => self.merge_values(merge, &values)?,
                None => None,
            });
        }
        let mut stack = Vec::with_capacity(height);
        for slot in 0..height {
            let values: Vec<NodeId> = incoming.iter().map(|i| i.state.stack[slot]).collect();
            let value = self
                .merge_values(merge, &values)?
                .ok_or_else(|| invalid(bci, format!("stack slot {slot} has mixed kinds")))?;
            stack.push(value);
        }
        Ok(State { locals, stack })
    }

    /// The single value of `values`, or a phi over them; `None` if their kinds differ.
    fn merge_values(&mut self, merge: NodeId, values: &[NodeId]) -> Result<Option<NodeId>> {
        let first = values[0];
        if values.iter().all(|&v| v == first) {
            return Ok(Some(first));
        }
        let graph = self.builder.graph();
        let kind = graph.value_kind(first);
        if values.iter().any(|&v| graph.value_kind(v) != kind) {
            return Ok(None);
        }
        Ok(Some(self.builder.phi(kind, merge, values)?))
    }

    fn open_loop(&mut self, bci: usize, state: State) -> Result<State> {
        let begin = self.builder.loop_begin()?;
        let phi = |builder: &mut GraphBuilder, value: NodeId| -> Result<NodeId> {
            let kind = builder.graph().value_kind(value);
            builder.phi(kind, begin, &[value])
        };
        let mut locals = Vec::with_capacity(state.locals.len());
        for value in state.locals {
            locals.push(match value {
                Some(value) => Some(phi(&mut self.builder, value)?),
                None => None,
            });
        }
        let mut stack = Vec::with_capacity(state.stack.len());
        for value in state.stack {
            stack.push(phi(&mut self.builder, value)?);
        }
        self.headers.insert(
            bci,
            LoopHeader {
                begin,
                locals: locals.clone(),
                stack: stack.clone(),
            },
        );
        Ok(State { locals, stack })
    }

    /// Sends the current control flow to `target`.
    fn jump(&mut self, from: usize, target: usize, cursor: NodeId, state: State) -> Result<()> {
        if target > from {
            self.incoming
                .entry(target)
                .or_default()
                .push(Incoming { cursor, state });
            return Ok(());
        }

        let Some(header) = self.headers.get(&target) else {
            return Err(invalid(from, format!("backward jump to {target} is not a loop header")));
        };
        if header.stack.len() != state.stack.len() {
            return Err(invalid(from, "stack height differs on the back edge"));
        }
        let mut values: HashMap<NodeId, NodeId> = HashMap::new();
        for (slot, phi) in header.locals.iter().enumerate() {
            let Some(phi) = *phi else {
                continue;
            };
            let value = state.locals[slot]
                .ok_or_else(|| invalid(from, format!("local {slot} undefined on the back edge")))?;
            values.insert(phi, value);
        }
        for (&phi, &value) in header.stack.iter().zip(&state.stack) {
            values.insert(phi, value);
        }
        let begin = header.begin;
        self.builder.switch_to(cursor);
        self.builder
            .loop_end(begin, |phi| values.get(&phi).copied().unwrap_or(phi))?;
        Ok(())
    }

    fn interpret(&mut self, start: usize, end: usize, mut state: State) -> Result<()> {
        let method = self.method;
        for bci in start..end {
            let instruction = &method.code[bci];
            match instruction {
                Instruction::IConst(v) => {
                    let node = self.builder.int(*v)?;
                    state.stack.push(node);
                }
                Instruction::LConst(v) => {
                    let node = self.builder.long(*v)?;
                    state.stack.push(node);
                }
                Instruction::Null => {
                    let node = self.builder.constant(Constant::Null)?;
                    state.stack.push(node);
                }
                Instruction::Load(slot) => {
                    let value = state
                        .locals
                        .get(usize::from(*slot))
                        .copied()
                        .ok_or_else(|| invalid(bci, format!("local {slot} out of range")))?
                        .ok_or_else(|| invalid(bci, format!("local {slot} is uninitialized")))?;
                    state.stack.push(value);
                }
                Instruction::Store(slot) => {
                    let value = pop(&mut state, bci)?;
                    let local = state
                        .locals
                        .get_mut(usize::from(*slot))
                        .ok_or_else(|| invalid(bci, format!("local {slot} out of range")))?;
                    *local = Some(value);
                }
                Instruction::Binary(op, kind) => {
                    let y = pop(&mut state, bci)?;
                    let x = pop(&mut state, bci)?;
                    let node = self.builder.binary(*op, *kind, x, y)?;
                    state.stack.push(node);
                }
                Instruction::Unary(op, kind) => {
                    let x = pop(&mut state, bci)?;
                    let node = self.builder.unary(*op, *kind, x)?;
                    state.stack.push(node);
                }
                Instruction::Compare(condition) => {
                    let y = pop(&mut state, bci)?;
                    let x = pop(&mut state, bci)?;
                    let node = self.builder.compare(*condition, x, y)?;
                    state.stack.push(node);
                }
                Instruction::IsNull => {
                    let x = pop(&mut state, bci)?;
                    let node = self.builder.is_null(x)?;
                    state.stack.push(node);
                }
                Instruction::NullCheck => {
                    let object = *state
                        .stack
                        .last()
                        .ok_or_else(|| invalid(bci, "stack underflow"))?;
                    let null = self.builder.is_null(object)?;
                    self.builder
                        .fixed_guard(null, DeoptimizationReason::NullCheckException, true)?;
                }
                Instruction::New { class, fields } => {
                    let node = self.builder.new_instance(class, *fields)?;
                    state.stack.push(node);
                }
                Instruction::GetField(field) => {
                    let object = pop(&mut state, bci)?;
                    let node = self.builder.load_field(field.clone(), object)?;
                    state.stack.push(node);
                }
                Instruction::PutField(field) => {
                    let value = pop(&mut state, bci)?;
                    let object = pop(&mut state, bci)?;
                    self.builder.store_field(field.clone(), object, value)?;
                }
                Instruction::Invoke {
                    kind,
                    callee,
                    arguments,
                    return_kind,
                } => {
                    let count = usize::from(*arguments);
                    if state.stack.len() < count {
                        return Err(invalid(bci, "stack underflow"));
                    }
                    let bci32 = u32::try_from(bci).map_err(|_| invalid(bci, "bci too large"))?;
                    let frame = self.frame_state(bci32, &state)?;
                    let args = state.stack.split_off(state.stack.len() - count);
                    let invoke = self.builder.invoke(
                        bci32,
                        *kind,
                        callee.clone(),
                        *return_kind,
                        &args,
                        Some(frame),
                    )?;
                    if *return_kind != ValueKind::Void {
                        state.stack.push(invoke);
                    }
                }
                Instruction::Pop => {
                    pop(&mut state, bci)?;
                }
                Instruction::Dup => {
                    let top = *state
                        .stack
                        .last()
                        .ok_or_else(|| invalid(bci, "stack underflow"))?;
                    state.stack.push(top);
                }
                Instruction::NeverPartOfCompilation(message) => {
                    self.builder.never_part_of_compilation(message)?;
                }
                Instruction::If { condition, target } => {
                    let y = pop(&mut state, bci)?;
                    let x = pop(&mut state, bci)?;
                    let test = self.builder.compare(*condition, x, y)?;
                    let (on_true, on_false) = self.builder.branch(test)?;
                    self.jump(bci, *target, on_true, state.clone())?;
                    self.jump(bci, bci + 1, on_false, state)?;
                    return Ok(());
                }
                Instruction::Goto(target) => {
                    let cursor = self.cursor(bci)?;
                    return self.jump(bci, *target, cursor, state);
                }
                Instruction::Return => {
                    if method.return_kind != ValueKind::Void {
                        return Err(invalid(bci, "missing return value"));
                    }
                    self.builder.ret(None)?;
                    return Ok(());
                }
                Instruction::ReturnValue => {
                    if method.return_kind == ValueKind::Void {
                        return Err(invalid(bci, "void method returns a value"));
                    }
                    let value = pop(&mut state, bci)?;
                    self.builder.ret(Some(value))?;
                    return Ok(());
                }
                Instruction::Throw => {
                    let exception = pop(&mut state, bci)?;
                    self.builder.append(NodeKind::Unwind, vec![exception])?;
                    return Ok(());
                }
                Instruction::Deoptimize(reason) => {
                    self.builder
                        .deoptimize(DeoptimizationAction::InvalidateReprofile, *reason)?;
                    return Ok(());
                }
            }
        }

        // Fall through into the next block.
        let cursor = self.cursor(end - 1)?;
        self.jump(end - 1, end, cursor, state)
    }

    fn cursor(&self, bci: usize) -> Result<NodeId> {
        self.builder
            .current()
            .ok_or_else(|| invalid(bci, "no open control flow"))
    }

    /// State before the instruction at `bci`; uninitialized locals read as `0`.
    fn frame_state(&mut self, bci: u32, state: &State) -> Result<NodeId> {
        let mut locals = Vec::with_capacity(state.locals.len());
        for local in &state.locals {
            locals.push(match local {
                Some(value) => *value,
                None => self.builder.int(0)?,
            });
        }
        self.builder.frame_state(bci, &locals, &state.stack)
    }
}

fn pop(state: &mut State, bci: usize) -> Result<NodeId> {
    state
        .stack
        .pop()
        .ok_or_else(|| invalid(bci, "stack underflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Callee, Condition, InvokeKind, MethodId, NodeClass};

    fn method(parameters: &[ValueKind], code: Vec<Instruction>) -> MethodDescriptor {
        MethodDescriptor::new(MethodId(1), "test")
            .with_parameters(parameters)
            .returning(ValueKind::Int)
            .with_max_locals(4)
            .with_code(code)
    }

    #[test]
    fn test_diamond_gets_phi() -> Result<()> {
        // return p0 < p1 ? p1 : p0
        let m = method(
            &[ValueKind::Int, ValueKind::Int],
            vec![
                Instruction::Load(0),
                Instruction::Load(1),
                Instruction::If {
                    condition: Condition::Lt,
                    target: 6,
                },
                Instruction::Load(0),
                Instruction::Store(2),
                Instruction::Goto(8),
                Instruction::Load(1),
                Instruction::Store(2),
                Instruction::Load(2),
                Instruction::ReturnValue,
            ],
        );
        let graph = build_initial_graph(&m)?;
        assert_eq!(graph.nodes_of(NodeClass::Merge).count(), 1);
        assert_eq!(graph.nodes_of(NodeClass::Phi).count(), 1);
        assert_eq!(graph.nodes_of(NodeClass::If).count(), 1);
        Ok(())
    }

    #[test]
    fn test_counting_loop() -> Result<()> {
        // i = 0; while (i < p0) i = i + 1; return i
        let m = method(
            &[ValueKind::Int],
            vec![
                Instruction::IConst(0),
                Instruction::Store(1),
                Instruction::Load(1),
                Instruction::Load(0),
                Instruction::If {
                    condition: Condition::Ge,
                    target: 10,
                },
                Instruction::Load(1),
                Instruction::IConst(1),
                Instruction::Binary(BinaryOp::Add, ValueKind::Int),
                Instruction::Store(1),
                Instruction::Goto(2),
                Instruction::Load(1),
                Instruction::ReturnValue,
            ],
        );
        let graph = build_initial_graph(&m)?;
        let header = graph
            .nodes_of(NodeClass::LoopBegin)
            .next()
            .ok_or_else(|| internal_fault!("no loop"))?;
        assert_eq!(graph[header].inputs().len(), 2);
        assert!(graph
            .phis_of(header)
            .iter()
            .all(|&phi| graph[phi].inputs().len() == 3));
        assert_eq!(graph.nodes_of(NodeClass::LoopEnd).count(), 1);
        Ok(())
    }

    #[test]
    fn test_invoke_gets_frame_state() -> Result<()> {
        let m = method(
            &[ValueKind::Int],
            vec![
                Instruction::Load(0),
                Instruction::Invoke {
                    kind: InvokeKind::Static,
                    callee: Callee::Direct(MethodId(2)),
                    arguments: 1,
                    return_kind: ValueKind::Int,
                },
                Instruction::ReturnValue,
            ],
        );
        let graph = build_initial_graph(&m)?;
        let invoke = graph
            .nodes_of(NodeClass::Invoke)
            .next()
            .ok_or_else(|| internal_fault!("no invoke"))?;
        let state = graph[invoke].inputs()[1];
        assert_eq!(
            graph.kind(state),
            &NodeKind::FrameState {
                bci: 1,
                locals: 4,
                stack: 1
            }
        );
        Ok(())
    }

    #[test]
    fn test_invalid_code() {
        let falls_off = method(&[], vec![Instruction::IConst(1)]);
        assert!(matches!(
            build_initial_graph(&falls_off),
            Err(Error::InvalidBytecode { bci: 0, .. })
        ));

        let underflow = method(&[], vec![Instruction::ReturnValue]);
        assert!(matches!(
            build_initial_graph(&underflow),
            Err(Error::InvalidBytecode { bci: 0, .. })
        ));

        let out_of_range = method(&[], vec![Instruction::Goto(9)]);
        assert!(matches!(
            build_initial_graph(&out_of_range),
            Err(Error::InvalidBytecode { bci: 0, .. })
        ));

        let uninitialized = method(&[], vec![Instruction::Load(3), Instruction::ReturnValue]);
        assert!(build_initial_graph(&uninitialized).is_err());
    }

    #[test]
    fn test_jump_into_loop_rejected() {
        // 0: goto 2 enters the loop 1..=3 below its header.
        let m = method(
            &[ValueKind::Int],
            vec![
                Instruction::Goto(2),
                Instruction::Load(0),
                Instruction::Pop,
                Instruction::Goto(1),
            ],
        );
        assert!(matches!(
            build_initial_graph(&m),
            Err(Error::InvalidBytecode { bci: 0, .. })
        ));
    }
}
