//! Tiered phase pipeline: from an initial graph to a scheduled, lowered graph.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Compiler Pipeline                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilationContext          Per-compilation state               │
//! │    ├─ CompilerConfig          (budgets, inlining, guard options) │
//! │    ├─ TargetDescription       (word size, displacement limit)    │
//! │    ├─ MethodProvider          (callee graphs for inlining)       │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  Suites                      One PhaseSuite per Tier             │
//! │    ├─ High                    canonicalize, inlining, escape     │
//! │    ├─ Mid                     lowering, guards, floating reads   │
//! │    └─ Low                     guard/address lowering, cleanup    │
//! │    Each tier boundary: verify the graph                          │
//! │                                                                  │
//! │  Phase trait                 Interface for all phases            │
//! │    ├─ should_run()            Option and precondition check      │
//! │    └─ run()                   In-place transformation            │
//! │                                                                  │
//! │  compile()                   Tiers, then scheduling              │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use tiergraph::compiler::{compile, CompilationContext, CompilerConfig, Suites};
//! use tiergraph::compiler::{SchedulePolicy, TargetDescription};
//! use tiergraph::ir::{GraphBuilder, ValueKind};
//!
//! let mut config = CompilerConfig::default();
//! config.apply("schedule=latest")?;
//! assert_eq!(config.schedule_policy, SchedulePolicy::Latest);
//!
//! let mut b = GraphBuilder::new();
//! let x = b.parameter(0, ValueKind::Int)?;
//! b.ret(Some(x))?;
//!
//! let ctx = CompilationContext::new(config, TargetDescription::x86());
//! let compiled = compile(b.finish(), &Suites::standard(), &ctx)?;
//! assert_eq!(compiled.schedule.block_count(), 1);
//! # Ok::<(), tiergraph::Error>(())
//! ```

mod config;
mod context;
mod events;
mod inline;
mod phase;
pub mod phases;
mod pipeline;
mod provider;
mod suite;

pub use config::{CompilerConfig, GuardElimination, SchedulePolicy, TargetDescription};
pub use context::CompilationContext;
pub use events::{CompilationStats, Event, EventBuilder, EventCategory, EventKind, EventLog};
pub use inline::{direct_callee, splice, Splice};
pub use phase::Phase;
pub use pipeline::{compile, ScheduledGraph};
pub use provider::{MethodProvider, MethodRegistry};
pub use suite::{PhaseSuite, Suites, Tier};
