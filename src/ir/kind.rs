//! Node kinds and their structural classification.
//!
//! Every node carries a [`NodeKind`]: the operation together with its non-edge
//! attributes (constant value, field reference, deoptimization codes, ...). The
//! kind decides which [`NodeCategory`] a node belongs to and which structural
//! [`NodeTraits`] it has; passes and the verifier dispatch on these instead of
//! inspecting individual kinds.
//!
//! The field-less [`NodeClass`] discriminant is derived from the kind enum and is
//! the key of the canonicalizer's capability table.
//!
//! # Edge Conventions
//!
//! ```text
//!  kind             inputs                          successors
//!  Merge            [end0, end1, ...]               [next]
//!  LoopBegin        [forward end, loopEnd0, ...]    [next]
//!  Phi              [merge, v0, v1, ...]            -
//!  If               [condition]                     [true, false]
//!  Invoke           [call target, frame state?]     [next, exception?]
//!  Guard            [condition, anchor]             -
//!  CallTarget       [target?, arg0, arg1, ...]      -
//! ```
//!
//! `Phi` value `i` flows in through the merge's input `i`.

use std::{fmt, sync::Arc};

use bitflags::bitflags;
use strum::{Display, EnumDiscriminants, EnumIter};

use crate::ir::value::{
    BinaryOp, Callee, Condition, Constant, DeoptimizationAction, DeoptimizationReason,
    FieldRef, InvokeKind, UnaryOp, ValueKind,
};

bitflags! {
    /// Structural properties of a node kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeTraits: u32 {
        /// Part of the control-flow skeleton; has a control predecessor.
        const FIXED = 1 << 0;
        /// Placed by the scheduler based on its data dependencies only.
        const FLOATING = 1 << 1;
        /// Starts a basic block.
        const BEGIN = 1 << 2;
        /// Joins several control-flow paths (carries phis).
        const MERGE = 1 << 3;
        /// Ends a basic block without a fallthrough successor.
        const TERMINATOR = 1 << 4;
        /// Produces a value that other nodes can consume.
        const VALUE = 1 << 5;
        /// A guard or deoptimization.
        const GUARD = 1 << 6;
        /// Part of a call (invoke or call target).
        const CALL = 1 << 7;
        /// A frame state snapshot.
        const STATE = 1 << 8;
        /// Writes memory.
        const MEMORY_WRITE = 1 << 9;
        /// Reads memory.
        const MEMORY_READ = 1 << 10;
        /// Side-effect free and structurally interned by the graph.
        const VALUE_NUMBERABLE = 1 << 11;
        /// Allocates a new object.
        const ALLOCATION = 1 << 12;
        /// Has exactly one control successor that is always taken.
        const STRAIGHT_LINE = 1 << 13;
    }
}

/// Primary structural category of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum NodeCategory {
    /// Fixed control-flow node that is not one of the more specific categories.
    Fixed,
    /// Floating data node.
    Floating,
    /// Control-flow join (merge or loop begin).
    Merge,
    /// Value selection at a merge.
    Phi,
    /// Guard, fixed guard or deoptimization.
    Guard,
    /// Call target description.
    CallTarget,
    /// Frame state.
    State,
}

/// The operation and attributes of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumDiscriminants)]
#[strum_discriminants(name(NodeClass), derive(Hash, PartialOrd, Ord, EnumIter, Display))]
#[strum_discriminants(doc = "The operation of a [`NodeKind`] without its attributes; keys the canonicalizer's capability table.")]
pub enum NodeKind {
    /// Entry of the graph. Exactly one per graph.
    Start,
    /// Start of a block with a single predecessor (branch targets).
    Begin,
    /// Forward control-flow join.
    Merge,
    /// Loop header.
    LoopBegin,
    /// Control leaving a loop; input 0 is the loop begin.
    LoopExit,
    /// Exceptional control entry; produces the exception object.
    ExceptionObject,
    /// Forward end of a branch feeding a merge.
    End,
    /// Back edge of a loop feeding its loop begin.
    LoopEnd,
    /// Two-way branch on an `Int` condition (non-zero is true).
    If,
    /// Method return with an optional value.
    Return,
    /// Method exit throwing the input exception.
    Unwind,
    /// Unconditional transfer to deoptimized execution.
    Deoptimize {
        /// What happens to the compiled code.
        action: DeoptimizationAction,
        /// Why it happens.
        reason: DeoptimizationReason,
    },
    /// Fixed guard: deoptimizes unless the condition holds (or fails, if negated).
    FixedGuard {
        /// What happens to the compiled code.
        action: DeoptimizationAction,
        /// Why it happens.
        reason: DeoptimizationReason,
        /// Deoptimize when the condition is true instead of false.
        negated: bool,
    },
    /// Call of the method described by input 0.
    Invoke {
        /// Bytecode index of the call.
        bci: u32,
    },
    /// Object allocation.
    NewInstance {
        /// Allocated class.
        class: Arc<str>,
        /// Number of instance fields.
        fields: u16,
    },
    /// High-level field load; input 0 is the object.
    LoadField {
        /// Loaded field.
        field: FieldRef,
    },
    /// High-level field store; inputs are object and value.
    StoreField {
        /// Stored field.
        field: FieldRef,
    },
    /// Lowered memory read at `base + offset`.
    Read {
        /// Field the read originated from.
        field: FieldRef,
        /// Byte offset from the base.
        offset: i64,
    },
    /// Lowered memory write at `base + offset`.
    Write {
        /// Field the write originated from.
        field: FieldRef,
        /// Byte offset from the base.
        offset: i64,
    },
    /// Marks code that must be removed by partial evaluation.
    NeverPartOfCompilation {
        /// Diagnostic attached to the marker.
        message: Arc<str>,
    },
    /// Compile-time constant.
    Constant(Constant),
    /// Incoming argument.
    Parameter {
        /// Argument position (receiver is 0 for instance methods).
        index: u16,
        /// Kind of the argument.
        kind: ValueKind,
    },
    /// Binary arithmetic.
    Binary {
        /// Operation.
        op: BinaryOp,
        /// Result kind.
        kind: ValueKind,
    },
    /// Unary arithmetic.
    Unary {
        /// Operation.
        op: UnaryOp,
        /// Result kind.
        kind: ValueKind,
    },
    /// Comparison producing `Int` 0/1.
    Compare {
        /// Condition.
        condition: Condition,
    },
    /// Null test producing `Int` 0/1.
    IsNull,
    /// Value selection at a merge.
    Phi {
        /// Kind of the merged value.
        kind: ValueKind,
    },
    /// Floating guard anchored at a begin node.
    Guard {
        /// What happens to the compiled code.
        action: DeoptimizationAction,
        /// Why it happens.
        reason: DeoptimizationReason,
        /// Deoptimize when the condition is true instead of false.
        negated: bool,
    },
    /// Memory read that may float between its last memory location and its uses.
    FloatingRead {
        /// Field the read originated from.
        field: FieldRef,
        /// Byte offset from the base.
        offset: i64,
    },
    /// Explicit address computation.
    Address {
        /// Displacement added to the base.
        displacement: i64,
    },
    /// Interpreter state snapshot; inputs are locals followed by stack values.
    FrameState {
        /// Bytecode index the state describes.
        bci: u32,
        /// Number of local slots among the inputs.
        locals: u16,
        /// Number of stack slots among the inputs.
        stack: u16,
    },
    /// Description of a call: dispatch kind, callee and arguments.
    CallTarget {
        /// Dispatch kind.
        invoke_kind: InvokeKind,
        /// Callee reference.
        callee: Callee,
        /// Kind of the returned value.
        return_kind: ValueKind,
    },
}

impl NodeKind {
    /// Returns the field-less discriminant of this kind.
    #[must_use]
    pub fn class(&self) -> NodeClass {
        NodeClass::from(self)
    }

    /// Returns the structural traits of this kind.
    #[must_use]
    pub fn traits(&self) -> NodeTraits {
        type T = NodeTraits;
        match self {
            Self::Start | Self::Begin => T::FIXED | T::BEGIN | T::STRAIGHT_LINE,
            Self::Merge | Self::LoopBegin => T::FIXED | T::BEGIN | T::MERGE | T::STRAIGHT_LINE,
            Self::LoopExit => T::FIXED | T::BEGIN | T::STRAIGHT_LINE,
            Self::ExceptionObject => T::FIXED | T::BEGIN | T::VALUE | T::STRAIGHT_LINE,
            Self::End | Self::LoopEnd | Self::If | Self::Return | Self::Unwind => {
                T::FIXED | T::TERMINATOR
            }
            Self::Deoptimize { .. } => T::FIXED | T::TERMINATOR | T::GUARD,
            Self::FixedGuard { .. } => T::FIXED | T::GUARD | T::STRAIGHT_LINE,
            Self::Invoke { .. } => T::FIXED | T::CALL | T::VALUE,
            Self::NewInstance { .. } => T::FIXED | T::VALUE | T::ALLOCATION | T::STRAIGHT_LINE,
            Self::LoadField { .. } | Self::Read { .. } => {
                T::FIXED | T::VALUE | T::MEMORY_READ | T::STRAIGHT_LINE
            }
            Self::StoreField { .. } | Self::Write { .. } => {
                T::FIXED | T::MEMORY_WRITE | T::STRAIGHT_LINE
            }
            Self::NeverPartOfCompilation { .. } => T::FIXED | T::STRAIGHT_LINE,
            Self::Constant(_)
            | Self::Parameter { .. }
            | Self::Binary { .. }
            | Self::Unary { .. }
            | Self::Compare { .. }
            | Self::IsNull
            | Self::Address { .. } => T::FLOATING | T::VALUE | T::VALUE_NUMBERABLE,
            Self::Phi { .. } => T::FLOATING | T::VALUE,
            Self::Guard { .. } => T::FLOATING | T::GUARD | T::VALUE_NUMBERABLE,
            Self::FloatingRead { .. } => T::FLOATING | T::VALUE | T::MEMORY_READ,
            Self::FrameState { .. } => T::FLOATING | T::STATE,
            Self::CallTarget { .. } => T::FLOATING | T::CALL,
        }
    }

    /// Returns the primary category of this kind.
    #[must_use]
    pub fn category(&self) -> NodeCategory {
        match self {
            Self::Merge | Self::LoopBegin => NodeCategory::Merge,
            Self::Phi { .. } => NodeCategory::Phi,
            Self::Deoptimize { .. } | Self::FixedGuard { .. } | Self::Guard { .. } => {
                NodeCategory::Guard
            }
            Self::CallTarget { .. } => NodeCategory::CallTarget,
            Self::FrameState { .. } => NodeCategory::State,
            kind if kind.is_fixed() => NodeCategory::Fixed,
            _ => NodeCategory::Floating,
        }
    }

    /// Returns `true` for control-flow nodes.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.traits().contains(NodeTraits::FIXED)
    }

    /// Returns `true` for data nodes placed by the scheduler.
    #[must_use]
    pub fn is_floating(&self) -> bool {
        self.traits().contains(NodeTraits::FLOATING)
    }

    /// Returns `true` for nodes that start a block.
    #[must_use]
    pub fn is_begin(&self) -> bool {
        self.traits().contains(NodeTraits::BEGIN)
    }

    /// Returns `true` for merges and loop begins.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.traits().contains(NodeTraits::MERGE)
    }

    /// Returns `true` for nodes that end a block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.traits().contains(NodeTraits::TERMINATOR)
    }

    /// Returns `true` for fixed nodes with exactly one always-taken successor.
    #[must_use]
    pub fn is_straight_line(&self) -> bool {
        self.traits().contains(NodeTraits::STRAIGHT_LINE)
    }

    /// Returns `true` for `End` and `LoopEnd`.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End | Self::LoopEnd)
    }

    /// Returns `true` for phis.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    /// Returns `true` if the graph interns nodes of this kind.
    #[must_use]
    pub fn is_value_numberable(&self) -> bool {
        self.traits().contains(NodeTraits::VALUE_NUMBERABLE)
    }

    /// Returns the constant if this is a constant node.
    #[must_use]
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Self::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Number of successor slots a node of this kind has.
    #[must_use]
    pub fn successor_slots(&self) -> usize {
        match self {
            Self::If => 2,
            Self::Invoke { .. } => 1,
            kind if kind.is_straight_line() => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deoptimize { action, reason } => write!(f, "Deoptimize({action}, {reason})"),
            Self::FixedGuard {
                reason, negated, ..
            } => write!(f, "FixedGuard({reason}{})", if *negated { ", negated" } else { "" }),
            Self::Guard {
                reason, negated, ..
            } => write!(f, "Guard({reason}{})", if *negated { ", negated" } else { "" }),
            Self::Invoke { bci } => write!(f, "Invoke@{bci}"),
            Self::NewInstance { class, .. } => write!(f, "NewInstance({class})"),
            Self::LoadField { field } => write!(f, "LoadField({field})"),
            Self::StoreField { field } => write!(f, "StoreField({field})"),
            Self::Read { field, offset } => write!(f, "Read({field}+{offset})"),
            Self::Write { field, offset } => write!(f, "Write({field}+{offset})"),
            Self::FloatingRead { field, offset } => write!(f, "FloatingRead({field}+{offset})"),
            Self::NeverPartOfCompilation { message } => {
                write!(f, "NeverPartOfCompilation({message:?})")
            }
            Self::Constant(c) => write!(f, "Const({c})"),
            Self::Parameter { index, kind } => write!(f, "Param({index}: {kind})"),
            Self::Binary { op, kind } => write!(f, "Binary({op}, {kind})"),
            Self::Unary { op, kind } => write!(f, "Unary({op}, {kind})"),
            Self::Compare { condition } => write!(f, "Compare({condition})"),
            Self::Phi { kind } => write!(f, "Phi({kind})"),
            Self::Address { displacement } => write!(f, "Address(+{displacement})"),
            Self::FrameState { bci, locals, stack } => {
                write!(f, "FrameState@{bci}[{locals}/{stack}]")
            }
            Self::CallTarget {
                invoke_kind,
                callee,
                return_kind,
            } => write!(f, "CallTarget({invoke_kind} {callee}: {return_kind})"),
            other => write!(f, "{}", other.class()),
        }
    }
}
