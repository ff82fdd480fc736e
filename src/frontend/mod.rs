//! From decoded bytecode to the initial graph.
//!
//! Decoding raw bytes is left to the embedder; this module starts from a
//! [`MethodDescriptor`] holding already decoded [`Instruction`]s of a small
//! stack machine and builds the graph with [`build_initial_graph`].

mod bytecode;
mod parser;

pub use bytecode::{Instruction, MethodDescriptor};
pub use parser::build_initial_graph;
