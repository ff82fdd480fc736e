//! # tiergraph Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the tiergraph library. Import this module to get quick access to the essential
//! types for building, optimizing and scheduling program graphs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all tiergraph operations
pub use crate::Error;

/// The result type used throughout tiergraph
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Bytecode front end
pub use crate::frontend::{build_initial_graph, Instruction, MethodDescriptor};

/// Tiered compilation driver
pub use crate::compiler::{compile, ScheduledGraph};

/// Partial evaluation
pub use crate::specialize::{Assumption, Assumptions, CallTargetDescriptor, Specializer};

/// Parallel compilation
pub use crate::session::{CompilerSession, ConcurrentCodeCache, InstalledCodeCache};

// ================================================================================================
// Graph IR
// ================================================================================================

/// Graph, nodes and construction
pub use crate::ir::{Graph, GraphBuilder, Node, NodeCategory, NodeClass, NodeId, NodeKind};

/// Values and operators
pub use crate::ir::{
    BinaryOp, Callee, Condition, Constant, DeoptimizationAction, DeoptimizationReason, FieldRef,
    InvokeKind, MethodId, UnaryOp, ValueKind,
};

// ================================================================================================
// Compiler Configuration and Phases
// ================================================================================================

/// Options, target and per-compilation state
pub use crate::compiler::{
    CompilationContext, CompilerConfig, GuardElimination, SchedulePolicy, TargetDescription,
};

/// Phases and tier suites
pub use crate::compiler::{Phase, PhaseSuite, Suites, Tier};

/// Callee graphs
pub use crate::compiler::{MethodProvider, MethodRegistry};

/// Diagnostics
pub use crate::compiler::{CompilationStats, EventKind, EventLog};

// ================================================================================================
// Canonicalization and Scheduling
// ================================================================================================

/// Canonicalizer
pub use crate::canonical::{Canonicalizer, CanonicalizerTable};

/// Scheduler
pub use crate::schedule::{schedule, ControlFlowGraph, DominatorTree, Schedule};
