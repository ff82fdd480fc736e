//! The program graph intermediate representation.
//!
//! A method is represented as one [`Graph`]: an arena of [`Node`]s connected by
//! two kinds of edges.
//!
//! ```text
//!            Start
//!              |            control edges (successors): fixed nodes only,
//!              v            each with a single predecessor
//!             If ---------.
//!             |           |
//!           Begin       Begin        data edges (inputs): any node, the
//!             |           |          inverse "usages" are kept by the graph
//!            End         End
//!              \         /
//!               Merge <-------- Phi(merge, v0, v1)
//!                 |
//!               Return(phi)
//! ```
//!
//! Fixed nodes form the control-flow skeleton; floating nodes (arithmetic,
//! constants, phis, call targets, frame states, ...) are placed by the
//! [scheduler](crate::schedule) purely from their data dependencies.
//!
//! # Modules
//!
//! - [`value`] - value kinds, constants and operator enums
//! - [`kind`] - node kinds, categories and traits
//! - [`node`] - node ids and node records
//! - [`graph`] - the arena with edge maintenance and value numbering
//! - [`edit`] - structural editing (fixed node removal, branch killing, merges)
//! - [`verify`] - structural invariant checker
//! - [`display`] - canonical printing
//! - [`builder`] - fluent graph construction

pub mod builder;
pub mod display;
pub mod edit;
pub mod graph;
pub mod kind;
pub mod node;
pub mod value;
pub mod verify;

pub use builder::GraphBuilder;
pub use display::CanonicalForm;
pub use graph::Graph;
pub use kind::{NodeCategory, NodeClass, NodeKind, NodeTraits};
pub use node::{Node, NodeId};
pub use value::{
    BinaryOp, Callee, Condition, Constant, DeoptimizationAction, DeoptimizationReason, FieldRef,
    InvokeKind, MethodId, ObjectId, UnaryOp, ValueKind,
};
pub use verify::verify;
