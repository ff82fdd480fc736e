//! Linearization of a graph into ordered basic blocks.
//!
//! Fixed nodes already impose a control order; the scheduler adds the rest:
//!
//! 1. [`cfg`] - blocks of fixed nodes, numbered in reverse postorder
//! 2. [`dominators`] - dominator tree (Cooper-Harvey-Kennedy)
//! 3. [`loops`] - natural loops from `LoopEnd -> LoopBegin` back edges
//! 4. [`scheduler`] - a block for every floating node under a
//!    [`SchedulePolicy`](crate::compiler::SchedulePolicy) and a total order
//!    inside each block
//!
//! ```rust
//! use tiergraph::compiler::SchedulePolicy;
//! use tiergraph::ir::{BinaryOp, GraphBuilder, ValueKind};
//! use tiergraph::schedule::schedule;
//!
//! let mut b = GraphBuilder::new();
//! let x = b.parameter(0, ValueKind::Int)?;
//! let y = b.binary(BinaryOp::Add, ValueKind::Int, x, x)?;
//! b.ret(Some(y))?;
//! let graph = b.finish();
//!
//! let schedule = schedule(&graph, SchedulePolicy::Earliest)?;
//! schedule.validate(&graph)?;
//! assert_eq!(schedule.block_count(), 1);
//! # Ok::<(), tiergraph::Error>(())
//! ```

pub mod cfg;
pub mod dominators;
pub mod loops;
pub mod scheduler;

pub use cfg::{Block, BlockId, ControlFlowGraph};
pub use dominators::{DominatorIterator, DominatorTree};
pub use loops::{Loop, LoopTree};
pub use scheduler::{schedule, Schedule};
