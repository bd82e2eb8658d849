//! Graph construction and compilation.
//!
//! [`Graph`] is the mutable builder: register nodes, wire simple and
//! conditional edges, pick an entry point, and optionally configure
//! fork/join behavior. [`Graph::compile`] validates the structure in a
//! single pass and produces an immutable [`CompiledGraph`] ready for
//! concurrent runs.

pub mod builder;
pub mod compile;
pub mod edge;

pub use builder::Graph;
pub use compile::{CompiledGraph, ForkJoinPair};
pub use edge::{is_end, NodeFn, NodeFuture, NodeId, RouterFn, RouterFuture, END};
