//! Value kinds, constants and operator enumerations of the program graph.
//!
//! Everything in this module is plain data: the node kinds in
//! [`kind`](crate::ir::kind) embed these types and the canonicalizer folds them.
//!
//! # Integer Semantics
//!
//! Arithmetic follows the managed bytecode semantics: two's complement wrap-around
//! for `Int` (32-bit) and `Long` (64-bit), shift distances masked to the operand
//! width (`& 31` / `& 63`). Constants are always stored normalized: an `Int`
//! constant never holds a value outside the `i32` range.

use std::{fmt, sync::Arc};

use strum::{Display, EnumIter};

/// The kind of value a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ValueKind {
    /// 32-bit two's complement integer (also used for booleans).
    Int,
    /// 64-bit two's complement integer.
    Long,
    /// Object reference.
    Object,
    /// No value.
    Void,
}

impl ValueKind {
    /// Width in bits of an integer kind, `None` for non-integers.
    #[must_use]
    pub const fn bits(self) -> Option<u32> {
        match self {
            Self::Int => Some(32),
            Self::Long => Some(64),
            _ => None,
        }
    }

    /// Returns `true` for `Int` and `Long`.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::Long)
    }

    /// Number of machine words a value of this kind occupies on a target with
    /// `word_size` byte words.
    #[must_use]
    pub const fn slots(self, word_size: u32) -> u32 {
        match self {
            Self::Long if word_size < 8 => 2,
            Self::Void => 0,
            _ => 1,
        }
    }
}

/// Identity of a method known to the compiler.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub u32);

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId({})", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Identity of a heap object embedded as a constant (e.g. a guest AST node).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// A compile-time constant.
///
/// Floating point constants are deliberately absent: constants take part in value
/// numbering and therefore need total `Eq`/`Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// The null reference.
    Null,
    /// A resolved method, used as the target of indirect calls.
    Method(MethodId),
    /// A non-null heap object.
    Object(ObjectId),
}

impl Constant {
    /// Returns the kind of this constant.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Long(_) => ValueKind::Long,
            Self::Null | Self::Method(_) | Self::Object(_) => ValueKind::Object,
        }
    }

    /// Returns the integer value widened to `i64`, `None` for references.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v as i64),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Builds an integer constant of `kind`, truncating `value` to the kind's width.
    ///
    /// Returns `None` for non-integer kinds.
    #[must_use]
    pub const fn from_i64(kind: ValueKind, value: i64) -> Option<Self> {
        match kind {
            ValueKind::Int => Some(Self::Int(value as i32)),
            ValueKind::Long => Some(Self::Long(value)),
            _ => None,
        }
    }

    /// Boolean constants are `Int` 0/1.
    #[must_use]
    pub const fn from_bool(value: bool) -> Self {
        Self::Int(value as i32)
    }

    /// Returns `true` if this is an integer zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        matches!(self, Self::Int(0) | Self::Long(0))
    }

    /// Returns `true` if this is an integer with every bit set (`-1`).
    #[must_use]
    pub const fn is_all_ones(&self) -> bool {
        matches!(self, Self::Int(-1) | Self::Long(-1))
    }

    /// Returns `true` if this is the null reference.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Null => write!(f, "null"),
            Self::Method(m) => write!(f, "{m}"),
            Self::Object(o) => write!(f, "{o}"),
        }
    }
}

/// Reference to an instance field.
///
/// `index` is the field's declaration position in its holder, used by lowering to
/// compute a memory offset. Names are shared (`Arc<str>`) so node kinds stay cheap
/// to clone and can cross thread boundaries with the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring class name.
    pub holder: Arc<str>,
    /// Field name.
    pub name: Arc<str>,
    /// Declaration index within the holder.
    pub index: u16,
    /// Kind of the stored value.
    pub kind: ValueKind,
}

impl FieldRef {
    /// Creates a new field reference.
    pub fn new(holder: &str, name: &str, index: u16, kind: ValueKind) -> Self {
        Self {
            holder: Arc::from(holder),
            name: Arc::from(name),
            index,
            kind,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.holder, self.name)
    }
}

/// Binary integer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum BinaryOp {
    /// Addition.
    #[strum(serialize = "+")]
    Add,
    /// Subtraction.
    #[strum(serialize = "-")]
    Sub,
    /// Multiplication.
    #[strum(serialize = "*")]
    Mul,
    /// Bitwise and.
    #[strum(serialize = "&")]
    And,
    /// Bitwise or.
    #[strum(serialize = "|")]
    Or,
    /// Bitwise exclusive or.
    #[strum(serialize = "^")]
    Xor,
    /// Left shift.
    #[strum(serialize = "<<")]
    Shl,
    /// Arithmetic right shift.
    #[strum(serialize = ">>")]
    Shr,
    /// Logical right shift.
    #[strum(serialize = ">>>")]
    UShr,
}

impl BinaryOp {
    /// Returns `true` if `x op y == y op x`.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor)
    }

    /// Returns `true` for the shift family (shift distance is always an `Int`).
    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr | Self::UShr)
    }

    /// Folds the operation on constants of `kind`.
    ///
    /// Operands are taken as `i64` and truncated to the kind width first; the
    /// result is normalized to the kind. Returns `None` for non-integer kinds.
    #[must_use]
    pub fn fold(self, kind: ValueKind, x: i64, y: i64) -> Option<i64> {
        match kind {
            ValueKind::Int => {
                let (a, b) = (x as i32, y as i32);
                let r = match self {
                    Self::Add => a.wrapping_add(b),
                    Self::Sub => a.wrapping_sub(b),
                    Self::Mul => a.wrapping_mul(b),
                    Self::And => a & b,
                    Self::Or => a | b,
                    Self::Xor => a ^ b,
                    Self::Shl => a.wrapping_shl((b & 31) as u32),
                    Self::Shr => a.wrapping_shr((b & 31) as u32),
                    Self::UShr => ((a as u32) >> ((b & 31) as u32)) as i32,
                };
                Some(i64::from(r))
            }
            ValueKind::Long => {
                let r = match self {
                    Self::Add => x.wrapping_add(y),
                    Self::Sub => x.wrapping_sub(y),
                    Self::Mul => x.wrapping_mul(y),
                    Self::And => x & y,
                    Self::Or => x | y,
                    Self::Xor => x ^ y,
                    Self::Shl => x.wrapping_shl((y & 63) as u32),
                    Self::Shr => x.wrapping_shr((y & 63) as u32),
                    Self::UShr => ((x as u64) >> ((y & 63) as u32)) as i64,
                };
                Some(r)
            }
            _ => None,
        }
    }
}

/// Unary integer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum UnaryOp {
    /// Two's complement negation.
    #[strum(serialize = "neg")]
    Neg,
    /// Bitwise complement.
    #[strum(serialize = "not")]
    Not,
}

impl UnaryOp {
    /// Folds the operation on a constant of `kind`.
    #[must_use]
    pub fn fold(self, kind: ValueKind, x: i64) -> Option<i64> {
        match (self, kind) {
            (Self::Neg, ValueKind::Int) => Some(i64::from((x as i32).wrapping_neg())),
            (Self::Not, ValueKind::Int) => Some(i64::from(!(x as i32))),
            (Self::Neg, ValueKind::Long) => Some(x.wrapping_neg()),
            (Self::Not, ValueKind::Long) => Some(!x),
            _ => None,
        }
    }
}

/// Comparison conditions. Comparisons produce an `Int` 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Condition {
    /// Equal (integers or references).
    #[strum(serialize = "==")]
    Eq,
    /// Not equal (integers or references).
    #[strum(serialize = "!=")]
    Ne,
    /// Signed less than.
    #[strum(serialize = "<")]
    Lt,
    /// Signed less than or equal.
    #[strum(serialize = "<=")]
    Le,
    /// Signed greater than.
    #[strum(serialize = ">")]
    Gt,
    /// Signed greater than or equal.
    #[strum(serialize = ">=")]
    Ge,
}

impl Condition {
    /// The condition that holds for `y cond' x` whenever `x cond y` holds.
    #[must_use]
    pub const fn mirror(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    /// The logical negation of the condition.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }

    /// Evaluates the condition on two integers.
    #[must_use]
    pub const fn fold(self, x: i64, y: i64) -> bool {
        match self {
            Self::Eq => x == y,
            Self::Ne => x != y,
            Self::Lt => x < y,
            Self::Le => x <= y,
            Self::Gt => x > y,
            Self::Ge => x >= y,
        }
    }

    /// Result of comparing a value with itself.
    #[must_use]
    pub const fn reflexive(self) -> bool {
        matches!(self, Self::Eq | Self::Le | Self::Ge)
    }
}

/// What the runtime does with the compiled code when a deoptimization happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DeoptimizationAction {
    /// Continue in the interpreter, keep the compiled code.
    None,
    /// Recompile after too many deoptimizations at this point.
    RecompileIfTooManyDeopts,
    /// Invalidate the code and collect more profile information first.
    InvalidateReprofile,
    /// Invalidate the code and recompile immediately.
    InvalidateRecompile,
    /// Invalidate the code and never compile the method again.
    InvalidateStopCompiling,
}

/// Why a deoptimization happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DeoptimizationReason {
    /// No specific reason.
    None,
    /// An implicit null check failed.
    NullCheckException,
    /// An array bounds check failed.
    BoundsCheckException,
    /// A checked cast failed.
    ClassCastException,
    /// Arithmetic exception (division by zero).
    ArithmeticException,
    /// A speculative type check failed.
    TypeCheckedInliningViolated,
    /// An optimistic type check failed.
    OptimizedTypeCheckViolated,
    /// Code that was assumed unreachable was reached.
    UnreachedCode,
    /// A symbol was not resolved at compile time.
    Unresolved,
    /// A runtime invariant of the guest language failed.
    RuntimeConstraint,
    /// An explicit transfer to the interpreter.
    TransferToInterpreter,
}

/// Dispatch kind of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum InvokeKind {
    /// Static call, no receiver.
    Static,
    /// Non-virtual call on a receiver.
    Special,
    /// Virtual dispatch.
    Virtual,
    /// Interface dispatch.
    Interface,
}

impl InvokeKind {
    /// Returns `true` if the target is fixed at the call site.
    #[must_use]
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::Static | Self::Special)
    }
}

/// The callee reference of a call target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A resolved method.
    Direct(MethodId),
    /// The target is computed at run time and is the call target's first input.
    Indirect,
    /// A symbolic reference that was not resolved.
    Unresolved(Arc<str>),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(m) => write!(f, "{m}"),
            Self::Indirect => write!(f, "indirect"),
            Self::Unresolved(name) => write!(f, "?{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_folding() {
        assert_eq!(BinaryOp::Or.fold(ValueKind::Int, 3, 5), Some(7));
        assert_eq!(BinaryOp::Or.fold(ValueKind::Long, 8, 1), Some(9));
    }

    #[test]
    fn test_int_wraps() {
        let max = i64::from(i32::MAX);
        assert_eq!(
            BinaryOp::Add.fold(ValueKind::Int, max, 1),
            Some(i64::from(i32::MIN))
        );
        assert_eq!(UnaryOp::Neg.fold(ValueKind::Int, i64::from(i32::MIN)), Some(i64::from(i32::MIN)));
    }

    #[test]
    fn test_shift_masking() {
        assert_eq!(BinaryOp::Shl.fold(ValueKind::Int, 1, 33), Some(2));
        assert_eq!(BinaryOp::Shl.fold(ValueKind::Long, 1, 65), Some(2));
        assert_eq!(BinaryOp::UShr.fold(ValueKind::Int, -1, 28), Some(15));
        assert_eq!(BinaryOp::Shr.fold(ValueKind::Int, -16, 2), Some(-4));
    }

    #[test]
    fn test_non_integer_kinds_do_not_fold() {
        assert_eq!(BinaryOp::Add.fold(ValueKind::Object, 1, 2), None);
        assert_eq!(Constant::from_i64(ValueKind::Void, 1), None);
    }

    #[test]
    fn test_condition_algebra() {
        for cond in [Condition::Lt, Condition::Le, Condition::Eq, Condition::Ge] {
            assert_eq!(cond.fold(1, 2), cond.mirror().fold(2, 1));
            assert_eq!(cond.fold(1, 2), !cond.negate().fold(1, 2));
        }
        assert!(Condition::Le.reflexive());
        assert!(!Condition::Ne.reflexive());
    }

    #[test]
    fn test_constant_predicates() {
        assert!(Constant::Int(-1).is_all_ones());
        assert!(Constant::Long(0).is_zero());
        assert_eq!(Constant::from_i64(ValueKind::Int, 1 << 32), Some(Constant::Int(0)));
        assert_eq!(Constant::Null.kind(), ValueKind::Object);
        assert_eq!(Constant::from_bool(true), Constant::Int(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(BinaryOp::Or.to_string(), "|");
        assert_eq!(Constant::Long(4).to_string(), "4L");
        assert_eq!(Callee::Direct(MethodId(2)).to_string(), "m2");
    }
}
