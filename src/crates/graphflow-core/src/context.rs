//! Execution context passed to every node function and router.
//!
//! A [`Context`] is a small immutable record with a fixed set of slots: the
//! ambient cancellation token, the run id (when the run has one), the id of
//! the node currently executing, and two optional injected services - a
//! checkpoint store and a model client. The runner derives a fresh context
//! per node with [`Context::for_node`], updating only the node-id slot, and
//! a child context per fork branch whose token is cancelled with (or
//! independently of) the parent's.
//!
//! Nodes observe cancellation cooperatively: the runner checks the token
//! between nodes, and long-running nodes should poll
//! [`Context::is_cancelled`] or await [`Context::cancelled`] at their own
//! suspension points.

use crate::error::{GraphError, Result};
use graphflow_checkpoint::CheckpointStore;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-run execution context. Cheap to clone; all slots are shared.
#[derive(Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    run_id: Option<String>,
    node_id: String,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    model_client: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    /// A root context with a fresh cancellation token and empty slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation token (replacing the default fresh one).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Attach the run identifier.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Inject a checkpoint store for nodes that persist ad-hoc snapshots.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Inject a model client (or any other single service) for nodes to
    /// retrieve with [`Context::model_client`].
    pub fn with_model_client(mut self, client: Arc<dyn Any + Send + Sync>) -> Self {
        self.model_client = Some(client);
        self
    }

    /// Derived context for a node: same slots, updated node id.
    pub fn for_node(&self, node_id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.node_id = node_id.into();
        ctx
    }

    /// Derived context for a fork branch: child cancellation token, so the
    /// branch can be cancelled without touching the parent.
    pub(crate) fn child(&self) -> Self {
        let mut ctx = self.clone();
        ctx.cancellation = self.cancellation.child_token();
        ctx
    }

    /// The ambient cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// True once the ambient context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when the ambient context is cancelled. Long-running nodes
    /// select on this at their own suspension points.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Fail fast with a cancellation error if the context has ended.
    ///
    /// Intended for use inside node functions, so the variant reports the
    /// node as executing.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(GraphError::Cancelled {
                node: Some(self.node_id.clone()),
                was_executing: true,
            });
        }
        Ok(())
    }

    /// The run identifier, when the run was given one.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Id of the node currently executing (empty outside a node).
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The injected checkpoint store, if any.
    pub fn checkpoint_store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.checkpoint_store.as_ref()
    }

    /// The injected model client, down-cast to the concrete type it was
    /// registered as. Returns `None` when absent or of another type.
    pub fn model_client<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.model_client
            .as_ref()
            .and_then(|client| Arc::clone(client).downcast::<T>().ok())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("cancelled", &self.is_cancelled())
            .field("checkpoint_store", &self.checkpoint_store.is_some())
            .field("model_client", &self.model_client.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_node_updates_only_node_slot() {
        let ctx = Context::new().with_run_id("run-1");
        let derived = ctx.for_node("step1");
        assert_eq!(derived.node_id(), "step1");
        assert_eq!(derived.run_id(), Some("run-1"));
        assert_eq!(ctx.node_id(), "");
    }

    #[test]
    fn child_token_cancels_independently() {
        let ctx = Context::new();
        let child = ctx.child();
        child.cancellation_token().cancel();
        assert!(child.is_cancelled());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn parent_cancellation_reaches_children() {
        let ctx = Context::new();
        let child = ctx.child();
        ctx.cancellation_token().cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn model_client_downcasts_by_type() {
        struct FakeClient {
            endpoint: &'static str,
        }

        let ctx = Context::new().with_model_client(Arc::new(FakeClient {
            endpoint: "local",
        }));
        let client = ctx.model_client::<FakeClient>().expect("client present");
        assert_eq!(client.endpoint, "local");
        assert!(ctx.model_client::<String>().is_none());
    }

    #[test]
    fn check_cancelled_reports_executing_node() {
        let ctx = Context::new().for_node("slow");
        ctx.cancellation_token().cancel();
        let err = ctx.check_cancelled().unwrap_err();
        match err {
            GraphError::Cancelled {
                node,
                was_executing,
            } => {
                assert_eq!(node.as_deref(), Some("slow"));
                assert!(was_executing);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
