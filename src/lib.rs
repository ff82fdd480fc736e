// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # tiergraph
//!
//! The optimizing core of a tiered just-in-time compiler, built around a
//! sea-of-nodes program graph.
//!
//! A method enters as decoded stack bytecode, becomes a [`ir::Graph`] of
//! fixed (control) and floating (data) nodes, runs through three tiers of
//! optimization phases and leaves as a [`compiler::ScheduledGraph`]: ordered
//! basic blocks ready for code emission. A partial evaluator specializes
//! interpreter graphs for a known guest program before they enter the same
//! pipeline.
//!
//! ## Quick Start
//!
//! ```rust
//! use tiergraph::prelude::*;
//!
//! let method = MethodDescriptor::new(MethodId(1), "scale")
//!     .with_parameters(&[ValueKind::Int])
//!     .returning(ValueKind::Int)
//!     .with_code(vec![
//!         Instruction::Load(0),
//!         Instruction::IConst(8),
//!         Instruction::Binary(BinaryOp::Mul, ValueKind::Int),
//!         Instruction::ReturnValue,
//!     ]);
//!
//! let graph = build_initial_graph(&method)?;
//! let compiled = compile(graph, &Suites::standard(), &CompilationContext::default())?;
//! assert_eq!(compiled.schedule.block_count(), 1);
//! # Ok::<(), tiergraph::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - nodes, edges, the graph arena, verification and the builder
//! - [`canonical`] - table-driven local simplification to a fixpoint
//! - [`compiler`] - phases, tier suites, options and the [`compile`] driver
//! - [`schedule`] - control flow graph, dominators, loops and node placement
//! - [`specialize`] - partial evaluation of interpreter graphs
//! - [`frontend`] - bytecode to initial graph
//! - [`session`] - parallel compilation of many methods
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result`]. Budget overruns and
//! unsupported constructs are bailouts the caller recovers from by
//! compiling at a lower tier:
//!
//! ```rust
//! use tiergraph::prelude::*;
//!
//! let mut b = GraphBuilder::new();
//! let x = b.parameter(0, ValueKind::Int)?;
//! b.ret(Some(x))?;
//! let graph = b.finish();
//!
//! let mut ctx = CompilationContext::default();
//! ctx.config.node_budget = 1;
//! match compile(graph, &Suites::standard(), &ctx) {
//!     Err(e) if e.is_bailout() => println!("falling back: {e}"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! # Ok::<(), tiergraph::Error>(())
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use tiergraph::prelude::*;
///
/// let mut b = GraphBuilder::new();
/// let x = b.int(2)?;
/// b.ret(Some(x))?;
/// assert!(b.finish().verify().is_ok());
/// # Ok::<(), tiergraph::Error>(())
/// ```
pub mod prelude;

pub mod canonical;
pub mod compiler;
pub mod frontend;
pub mod ir;
pub mod schedule;
pub mod session;
pub mod specialize;

/// `tiergraph` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `tiergraph` Error type
///
/// See [`Error::is_bailout`] and [`Error::is_internal`] for how callers are
/// expected to react to the different kinds.
pub use error::Error;

/// Compiles a graph through all tiers. See [`compiler::compile`].
pub use compiler::compile;

/// Builds the initial graph of a method. See [`frontend::build_initial_graph`].
pub use frontend::build_initial_graph;

/// Partial evaluator entry point. See [`specialize::Specializer`].
pub use specialize::Specializer;
