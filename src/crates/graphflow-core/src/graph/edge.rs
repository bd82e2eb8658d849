//! Node and router function types and the edge model.

use crate::context::Context;
use crate::error::BoxError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Node identifier. Unique within a graph, non-empty, whitespace-free.
pub type NodeId = String;

/// Reserved terminator id: routing to `END` completes the run.
pub const END: &str = "__end__";

/// Whether `id` names the reserved terminator (`END` / `__end__`,
/// ASCII-case-insensitive).
pub fn is_end(id: &str) -> bool {
    id.eq_ignore_ascii_case(END) || id.eq_ignore_ascii_case("end")
}

/// Future returned by a node function.
pub type NodeFuture<S> = Pin<Box<dyn Future<Output = Result<S, BoxError>> + Send>>;

/// A node's transformation: `(Context, S) -> S` or an error.
pub type NodeFn<S> = Arc<dyn Fn(Context, S) -> NodeFuture<S> + Send + Sync>;

/// Future returned by a router.
pub type RouterFuture = Pin<Box<dyn Future<Output = String> + Send>>;

/// A conditional edge's router: decides the next node id (or [`END`]) from
/// the owning node's output state.
pub type RouterFn<S> = Arc<dyn Fn(Context, S) -> RouterFuture + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_recognition_is_case_insensitive() {
        assert!(is_end("__end__"));
        assert!(is_end("END"));
        assert!(is_end("End"));
        assert!(is_end("end"));
        assert!(!is_end("ending"));
        assert!(!is_end("__start__"));
    }
}
