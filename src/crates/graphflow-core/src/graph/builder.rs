//! The mutable [`Graph`] builder.
//!
//! Build a graph by registering nodes and wiring edges, then call
//! [`Graph::compile`] for an executable [`CompiledGraph`](super::CompiledGraph):
//!
//! ```rust
//! use graphflow_core::{Graph, GraphState, BoxError, END};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Counter { count: i64 }
//! impl GraphState for Counter {}
//!
//! let mut graph = Graph::new();
//! graph
//!     .add_node("inc", |_ctx, mut state: Counter| async move {
//!         state.count += 1;
//!         Ok::<_, BoxError>(state)
//!     })
//!     .add_edge("inc", END)
//!     .set_entry("inc");
//! let compiled = graph.compile().unwrap();
//! ```
//!
//! Structural mistakes that can only come from a programming error - an
//! empty or whitespace id, the reserved terminator as a node id, duplicate
//! registration, mixing simple and conditional edges on one node - abort
//! with a panic at build time. Mistakes that depend on the graph as a whole
//! (unknown targets, no path to END, dead cycles) are reported by
//! [`Graph::compile`] as [`GraphError::Compilation`](crate::GraphError)
//! errors.

use super::compile;
use super::edge::{is_end, NodeFn, NodeId, RouterFn, END};
use crate::context::Context;
use crate::error::{BoxError, GraphError};
use crate::runner::{BranchHook, ForkJoinConfig};
use crate::state::GraphState;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Mutable graph builder, generic over the state type `S`.
///
/// Not safe for concurrent building; compile it into a
/// [`CompiledGraph`](super::CompiledGraph) before sharing.
pub struct Graph<S: GraphState> {
    pub(crate) nodes: HashMap<NodeId, NodeFn<S>>,
    pub(crate) simple_edges: HashMap<NodeId, Vec<NodeId>>,
    pub(crate) routers: HashMap<NodeId, RouterFn<S>>,
    pub(crate) entry: Option<NodeId>,
    pub(crate) branch_hook: Option<Arc<dyn BranchHook<S>>>,
    pub(crate) fork_config: ForkJoinConfig,
}

impl<S: GraphState> Default for Graph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> Graph<S> {
    /// An empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            simple_edges: HashMap::new(),
            routers: HashMap::new(),
            entry: None,
            branch_hook: None,
            fork_config: ForkJoinConfig::default(),
        }
    }

    /// Register a node under `id`.
    ///
    /// # Panics
    ///
    /// If the id is empty, contains whitespace, names the reserved
    /// terminator, or is already registered.
    pub fn add_node<F, Fut>(&mut self, id: impl Into<NodeId>, node: F) -> &mut Self
    where
        F: Fn(Context, S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, BoxError>> + Send + 'static,
    {
        let node: NodeFn<S> = Arc::new(move |ctx, state| Box::pin(node(ctx, state)));
        self.add_node_fn(id, node)
    }

    /// Register a pre-boxed node function. See [`Graph::add_node`].
    ///
    /// # Panics
    ///
    /// Same conditions as [`Graph::add_node`].
    pub fn add_node_fn(&mut self, id: impl Into<NodeId>, node: NodeFn<S>) -> &mut Self {
        let id = id.into();
        validate_node_id(&id);
        if self.nodes.contains_key(&id) {
            panic!("node '{id}' is already registered");
        }
        self.nodes.insert(id, node);
        self
    }

    /// Add a simple edge `from -> to`. `to` may be [`END`]. Calling this
    /// repeatedly for the same `from` fans out into a fork.
    ///
    /// # Panics
    ///
    /// If `from` is the terminator, already has a conditional edge, or the
    /// exact edge was already added.
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        if is_end(&from) {
            panic!("edges cannot originate at END");
        }
        if self.routers.contains_key(&from) {
            panic!("node '{from}' already has a conditional edge; a node has either simple or conditional edges, never both");
        }
        let targets = self.simple_edges.entry(from.clone()).or_default();
        if targets.contains(&to) {
            panic!("duplicate edge '{from}' -> '{to}'");
        }
        targets.push(to);
        self
    }

    /// Add a conditional edge: `router` picks the next node id (or [`END`])
    /// from `from`'s output state.
    ///
    /// # Panics
    ///
    /// If `from` is the terminator, already has simple edges, or already has
    /// a conditional edge.
    pub fn add_conditional_edge<F, Fut>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
    ) -> &mut Self
    where
        F: Fn(Context, S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        let router: RouterFn<S> = Arc::new(move |ctx, state| Box::pin(router(ctx, state)));
        self.add_conditional_edge_fn(from, router)
    }

    /// Add a pre-boxed conditional edge. See [`Graph::add_conditional_edge`].
    ///
    /// # Panics
    ///
    /// Same conditions as [`Graph::add_conditional_edge`].
    pub fn add_conditional_edge_fn(
        &mut self,
        from: impl Into<NodeId>,
        router: RouterFn<S>,
    ) -> &mut Self {
        let from = from.into();
        if is_end(&from) {
            panic!("edges cannot originate at END");
        }
        if self.simple_edges.contains_key(&from) {
            panic!("node '{from}' already has simple edges; a node has either simple or conditional edges, never both");
        }
        if self.routers.insert(from.clone(), router).is_some() {
            panic!("node '{from}' already has a conditional edge");
        }
        self
    }

    /// Set the entry point. Must name a registered node by compile time.
    pub fn set_entry(&mut self, id: impl Into<NodeId>) -> &mut Self {
        self.entry = Some(id.into());
        self
    }

    /// Install a [`BranchHook`] invoked around fork/join execution.
    pub fn set_branch_hook(&mut self, hook: Arc<dyn BranchHook<S>>) -> &mut Self {
        self.branch_hook = Some(hook);
        self
    }

    /// Configure fork/join concurrency, failure, and timeout behavior.
    pub fn set_fork_join_config(&mut self, config: ForkJoinConfig) -> &mut Self {
        self.fork_config = config;
        self
    }

    /// Validate the graph and produce an immutable, runnable
    /// [`CompiledGraph`](super::CompiledGraph).
    pub fn compile(self) -> Result<super::CompiledGraph<S>, GraphError> {
        compile::compile(self)
    }
}

impl<S: GraphState> fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("simple_edges", &self.simple_edges)
            .field("conditional_edges", &self.routers.keys().collect::<Vec<_>>())
            .field("entry", &self.entry)
            .finish()
    }
}

fn validate_node_id(id: &str) {
    if id.is_empty() {
        panic!("node id must not be empty");
    }
    if id.chars().any(char::is_whitespace) {
        panic!("node id '{id}' must not contain whitespace");
    }
    if is_end(id) {
        panic!("node id '{id}' is reserved for the terminator ({END})");
    }
}
