//! Decoded stack bytecode and method descriptors.

use std::{fmt, sync::Arc};

use crate::ir::{
    BinaryOp, Callee, Condition, DeoptimizationReason, FieldRef, InvokeKind, MethodId, UnaryOp,
    ValueKind,
};

/// One decoded instruction. Branch targets are instruction indices (bcis).
///
/// Operands are popped right to left: for `Binary`, `Compare` and `If` the
/// top of the stack is the right operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Push an `Int` constant.
    IConst(i32),
    /// Push a `Long` constant.
    LConst(i64),
    /// Push `null`.
    Null,
    /// Push a local.
    Load(u16),
    /// Pop into a local.
    Store(u16),
    /// Pop two operands, push the result.
    Binary(BinaryOp, ValueKind),
    /// Pop one operand, push the result.
    Unary(UnaryOp, ValueKind),
    /// Pop two operands, push `1` if the condition holds and `0` otherwise.
    Compare(Condition),
    /// Pop an object, push `1` if it is `null`.
    IsNull,
    /// Pop two operands, branch to `target` if the condition holds.
    If {
        /// Condition on `(x, y)`, `y` being the top of the stack.
        condition: Condition,
        /// Branch target.
        target: usize,
    },
    /// Unconditional jump.
    Goto(usize),
    /// Return without value.
    Return,
    /// Pop and return the top of the stack.
    ReturnValue,
    /// Push a new instance.
    New {
        /// Class name.
        class: Arc<str>,
        /// Number of instance fields.
        fields: u16,
    },
    /// Pop an object, push one of its fields.
    GetField(FieldRef),
    /// Pop a value and an object, store the value into the field.
    PutField(FieldRef),
    /// Pop `arguments` values and call.
    ///
    /// For [`Callee::Indirect`] the first argument is the method value.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Target method.
        callee: Callee,
        /// Number of popped values.
        arguments: u16,
        /// Kind of the pushed result; nothing is pushed for `Void`.
        return_kind: ValueKind,
    },
    /// Pop an exception and throw it.
    Throw,
    /// Deoptimize if the top of the stack (kept) is `null`.
    NullCheck,
    /// Leave compiled code unconditionally.
    Deoptimize(DeoptimizationReason),
    /// Marks code that partial evaluation must eliminate.
    NeverPartOfCompilation(Arc<str>),
    /// Drop the top of the stack.
    Pop,
    /// Duplicate the top of the stack.
    Dup,
}

impl Instruction {
    /// Branch targets of this instruction.
    #[must_use]
    pub fn targets(&self) -> Vec<usize> {
        match self {
            Self::If { target, .. } | Self::Goto(target) => vec![*target],
            _ => Vec::new(),
        }
    }

    /// Returns `true` if execution never continues with the next instruction.
    #[must_use]
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Self::Goto(_) | Self::Return | Self::ReturnValue | Self::Throw | Self::Deoptimize(_)
        )
    }

    /// Returns `true` if this instruction transfers control anywhere but to
    /// the next instruction.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.ends_block() || matches!(self, Self::If { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IConst(v) => write!(f, "iconst {v}"),
            Self::LConst(v) => write!(f, "lconst {v}"),
            Self::Null => write!(f, "aconst_null"),
            Self::Load(slot) => write!(f, "load {slot}"),
            Self::Store(slot) => write!(f, "store {slot}"),
            Self::Binary(op, kind) => write!(f, "{op} {kind}"),
            Self::Unary(op, kind) => write!(f, "{op} {kind}"),
            Self::Compare(condition) => write!(f, "cmp {condition}"),
            Self::IsNull => write!(f, "isnull"),
            Self::If { condition, target } => write!(f, "if{condition} {target}"),
            Self::Goto(target) => write!(f, "goto {target}"),
            Self::Return => write!(f, "return"),
            Self::ReturnValue => write!(f, "return_value"),
            Self::New { class, .. } => write!(f, "new {class}"),
            Self::GetField(field) => write!(f, "getfield {field}"),
            Self::PutField(field) => write!(f, "putfield {field}"),
            Self::Invoke {
                kind,
                callee,
                arguments,
                ..
            } => write!(f, "invoke{kind} {callee}/{arguments}"),
            Self::Throw => write!(f, "throw"),
            Self::NullCheck => write!(f, "nullcheck"),
            Self::Deoptimize(reason) => write!(f, "deopt {reason}"),
            Self::NeverPartOfCompilation(message) => write!(f, "never_compiled \"{message}\""),
            Self::Pop => write!(f, "pop"),
            Self::Dup => write!(f, "dup"),
        }
    }
}

/// A method ready to be turned into a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method identity, stored on the built graph.
    pub id: MethodId,
    /// Name for diagnostics.
    pub name: String,
    /// Parameter kinds; parameter `i` starts out in local `i`.
    pub parameters: Vec<ValueKind>,
    /// Kind of the returned value.
    pub return_kind: ValueKind,
    /// Number of local slots, parameters included.
    pub max_locals: u16,
    /// Decoded instructions.
    pub code: Vec<Instruction>,
}

impl MethodDescriptor {
    /// Creates a parameterless `void` method without code.
    #[must_use]
    pub fn new(id: MethodId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parameters: Vec::new(),
            return_kind: ValueKind::Void,
            max_locals: 0,
            code: Vec::new(),
        }
    }

    /// Sets the parameter kinds, growing `max_locals` to fit them.
    #[must_use]
    pub fn with_parameters(mut self, parameters: &[ValueKind]) -> Self {
        self.parameters = parameters.to_vec();
        let count = u16::try_from(parameters.len()).unwrap_or(u16::MAX);
        self.max_locals = self.max_locals.max(count);
        self
    }

    /// Sets the return kind.
    #[must_use]
    pub fn returning(mut self, kind: ValueKind) -> Self {
        self.return_kind = kind;
        self
    }

    /// Sets the number of local slots.
    #[must_use]
    pub fn with_max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = max_locals;
        self
    }

    /// Sets the code.
    #[must_use]
    pub fn with_code(mut self, code: Vec<Instruction>) -> Self {
        self.code = code;
        self
    }

    /// Number of local slots including parameters.
    #[must_use]
    pub fn local_count(&self) -> usize {
        usize::from(self.max_locals).max(self.parameters.len())
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}:", self.id, self.name)?;
        for (bci, instruction) in self.code.iter().enumerate() {
            writeln!(f, "  {bci:4}: {instruction}")?;
        }
        Ok(())
    }
}
