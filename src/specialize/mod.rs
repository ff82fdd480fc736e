//! Partial evaluation: specializing an interpreter for one guest program.
//!
//! A guest-language interpreter is a tree of nodes whose `execute` methods
//! call each other. When the tree is known (it is the receiver of the root
//! call target), every call in it is statically bound and can be inlined; the
//! canonicalizer then folds the interpreter dispatch away. What remains is a
//! single graph for the guest program, compiled with the regular pipeline.
//!
//! ```text
//!  CallTargetDescriptor ──► copy root graph ──► inject receiver ──► canonicalize
//!                                                                      │
//!          ┌───────────────────────────────────────────────────────────┘
//!          ▼
//!    expand direct calls ◄──► escape analysis      (until no progress)
//!          │
//!          ▼
//!    no NeverPartOfCompilation left? ──► verified Graph + Assumptions
//! ```
//!
//! Callee graphs come from a [`MethodProvider`](crate::compiler::MethodProvider)
//! through a [`GraphCache`] keyed by method, and by `(method, call-site shape)`
//! for callees specialized to constant arguments.

mod cache;
mod descriptor;
mod specializer;

pub use cache::{CacheStats, CallSiteShape, GraphCache};
pub use descriptor::{Assumption, Assumptions, CallTargetDescriptor};
pub use specializer::Specializer;
