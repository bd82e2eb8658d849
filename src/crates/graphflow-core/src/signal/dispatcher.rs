//! Signal registration and dispatch.
//!
//! [`SignalRegistry`] maps signal names to handlers (duplicate registration
//! is refused). [`SignalDispatcher`] ties a registry to a
//! [`SignalStore`]: [`send`](SignalDispatcher::send) validates and enqueues
//! without waiting for processing; [`process`](SignalDispatcher::process)
//! drains a target's pending signals in FIFO order, marking each processed
//! or failed. A handler error fails that signal and processing continues -
//! per-signal errors never propagate to the caller.

use super::store::SignalStore;
use super::{Signal, SignalError, SignalStatus};
use crate::context::Context;
use crate::error::BoxError;
use crate::registry::{Registry, RegistryError};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// A signal handler: receives the dispatch context, the target run id, and
/// the signal itself.
pub type SignalHandler =
    Arc<dyn Fn(Context, String, Signal) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Thread-safe map from signal name to handler.
#[derive(Default)]
pub struct SignalRegistry {
    handlers: Registry<SignalHandler>,
}

impl SignalRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler closure for `name`. Refused if the name is taken.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F) -> Result<(), SignalError>
    where
        F: Fn(Context, String, Signal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: SignalHandler =
            Arc::new(move |ctx, target, signal| Box::pin(handler(ctx, target, signal)));
        self.register_handler(name, handler)
    }

    /// Register a pre-boxed handler. See [`SignalRegistry::register`].
    pub fn register_handler(
        &self,
        name: impl Into<String>,
        handler: SignalHandler,
    ) -> Result<(), SignalError> {
        self.handlers
            .register(name, handler)
            .map_err(|err| match err {
                RegistryError::AlreadyRegistered(name) => SignalError::AlreadyRegistered(name),
                RegistryError::NotRegistered(name) => SignalError::NotRegistered(name),
            })
    }

    /// Remove the handler for `name`.
    pub fn unregister(&self, name: &str) -> Result<(), SignalError> {
        self.handlers
            .unregister(name)
            .map(|_| ())
            .map_err(|_| SignalError::NotRegistered(name.to_string()))
    }

    /// The handler for `name`, if registered.
    pub fn get(&self, name: &str) -> Option<SignalHandler> {
        self.handlers.get(name)
    }

    /// Whether `name` has a handler.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains(name)
    }
}

/// Outcome of draining a target's pending signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Signals whose handler succeeded.
    pub processed: usize,
    /// Signals marked failed (handler error or no handler).
    pub failed: usize,
}

/// Sends signals into a store and drives their processing.
pub struct SignalDispatcher {
    registry: Arc<SignalRegistry>,
    store: Arc<dyn SignalStore>,
}

impl SignalDispatcher {
    /// A dispatcher over `registry` and `store`.
    pub fn new(registry: Arc<SignalRegistry>, store: Arc<dyn SignalStore>) -> Self {
        Self { registry, store }
    }

    /// The registry this dispatcher consults.
    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    /// Validate and enqueue a signal, returning its id. Never waits for
    /// processing; a handler does not need to exist yet.
    pub async fn send(&self, signal: Signal) -> Result<String, SignalError> {
        if signal.name.trim().is_empty() {
            return Err(SignalError::InvalidSignal("name must not be empty".into()));
        }
        if signal.target_id.trim().is_empty() {
            return Err(SignalError::InvalidSignal(
                "target_id must not be empty".into(),
            ));
        }
        let id = signal.id.clone();
        tracing::debug!(signal = %signal.name, target = %signal.target_id, "signal enqueued");
        self.store.enqueue(signal).await?;
        Ok(id)
    }

    /// Drain the target's pending signals in enqueue order.
    ///
    /// Each signal is marked processed or failed; a missing handler fails
    /// the signal with the distinguished no-handler cause. Per-signal
    /// errors are recorded on the signals, not returned.
    pub async fn process(
        &self,
        ctx: &Context,
        target_id: &str,
    ) -> Result<ProcessOutcome, SignalError> {
        let pending = self.store.pending(target_id).await?;
        let mut outcome = ProcessOutcome::default();

        for signal in pending {
            match self.handle(ctx, signal).await {
                SignalStatus::Processed => outcome.processed += 1,
                _ => outcome.failed += 1,
            }
        }
        Ok(outcome)
    }

    /// Process a single signal by id. Returns its terminal status.
    pub async fn process_one(
        &self,
        ctx: &Context,
        signal_id: &str,
    ) -> Result<SignalStatus, SignalError> {
        let signal = self.store.get(signal_id).await?;
        if signal.is_terminal() {
            return Err(SignalError::Terminal {
                id: signal.id,
                status: signal.status,
            });
        }
        Ok(self.handle(ctx, signal).await)
    }

    /// Invoke the handler for one pending signal and record the outcome.
    async fn handle(&self, ctx: &Context, signal: Signal) -> SignalStatus {
        let id = signal.id.clone();
        let name = signal.name.clone();
        let target = signal.target_id.clone();

        let verdict = match self.registry.get(&name) {
            None => Err(SignalError::NoHandler(name.clone()).to_string()),
            Some(handler) => handler(ctx.clone(), target.clone(), signal)
                .await
                .map_err(|e| e.to_string()),
        };

        match verdict {
            Ok(()) => {
                if let Err(err) = self.store.mark_processed(&id).await {
                    tracing::warn!(signal = %id, error = %err, "failed to mark signal processed");
                }
                SignalStatus::Processed
            }
            Err(reason) => {
                tracing::warn!(signal = %id, name = %name, target = %target, error = %reason, "signal handling failed");
                if let Err(err) = self.store.mark_failed(&id, &reason).await {
                    tracing::warn!(signal = %id, error = %err, "failed to mark signal failed");
                }
                SignalStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::MemorySignalStore;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    fn dispatcher() -> (SignalDispatcher, Arc<MemorySignalStore>) {
        let registry = Arc::new(SignalRegistry::new());
        let store = Arc::new(MemorySignalStore::new());
        (SignalDispatcher::new(registry, store.clone()), store)
    }

    #[tokio::test]
    async fn duplicate_handler_registration_is_refused() {
        let registry = SignalRegistry::new();
        registry
            .register("pause", |_ctx, _target, _signal| async { Ok(()) })
            .unwrap();
        let err = registry
            .register("pause", |_ctx, _target, _signal| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, SignalError::AlreadyRegistered(_)));

        registry.unregister("pause").unwrap();
        assert!(!registry.contains("pause"));
    }

    #[tokio::test]
    async fn send_validates_shape() {
        let (dispatcher, _) = dispatcher();
        let err = dispatcher.send(Signal::new("", "run-1")).await.unwrap_err();
        assert!(matches!(err, SignalError::InvalidSignal(_)));
        let err = dispatcher.send(Signal::new("a", "")).await.unwrap_err();
        assert!(matches!(err, SignalError::InvalidSignal(_)));
    }

    #[tokio::test]
    async fn process_drains_in_enqueue_order() {
        let (dispatcher, _) = dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        dispatcher
            .registry()
            .register("tick", move |_ctx, _target, signal: Signal| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().await.push(signal.payload["n"].clone());
                    Ok(())
                }
            })
            .unwrap();

        for n in 0..5 {
            dispatcher
                .send(Signal::new("tick", "run-1").with_payload("n", serde_json::json!(n)))
                .await
                .unwrap();
        }

        let ctx = Context::new();
        let outcome = dispatcher.process(&ctx, "run-1").await.unwrap();
        assert_eq!(outcome.processed, 5);
        assert_eq!(outcome.failed, 0);

        let order = seen.lock().await.clone();
        let expected: Vec<_> = (0..5).map(|n| serde_json::json!(n)).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn missing_handler_marks_failed_and_continues() {
        let (dispatcher, store) = dispatcher();
        let handled = Arc::new(AtomicUsize::new(0));
        let handled_clone = handled.clone();
        dispatcher
            .registry()
            .register("known", move |_ctx, _target, _signal| {
                let handled = handled_clone.clone();
                async move {
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let orphan = Signal::new("unknown", "run-1");
        let orphan_id = orphan.id.clone();
        dispatcher.send(orphan).await.unwrap();
        dispatcher.send(Signal::new("known", "run-1")).await.unwrap();

        let ctx = Context::new();
        let outcome = dispatcher.process(&ctx, "run-1").await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(handled.load(Ordering::SeqCst), 1);

        let stored = store.get(&orphan_id).await.unwrap();
        assert_eq!(stored.status, SignalStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn handler_error_fails_signal_without_propagating() {
        let (dispatcher, store) = dispatcher();
        dispatcher
            .registry()
            .register("flaky", |_ctx, _target, _signal| async {
                Err("handler exploded".into())
            })
            .unwrap();

        let signal = Signal::new("flaky", "run-1");
        let id = signal.id.clone();
        dispatcher.send(signal).await.unwrap();

        let ctx = Context::new();
        let outcome = dispatcher.process(&ctx, "run-1").await.unwrap();
        assert_eq!(outcome.failed, 1);

        let stored = store.get(&id).await.unwrap();
        assert!(stored.error.as_deref().unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn process_one_targets_a_specific_signal() {
        let (dispatcher, _) = dispatcher();
        dispatcher
            .registry()
            .register("only", |_ctx, _target, _signal| async { Ok(()) })
            .unwrap();

        let signal = Signal::new("only", "run-1");
        let id = signal.id.clone();
        dispatcher.send(signal).await.unwrap();

        let ctx = Context::new();
        let status = dispatcher.process_one(&ctx, &id).await.unwrap();
        assert_eq!(status, SignalStatus::Processed);

        // A second attempt finds the signal terminal.
        let err = dispatcher.process_one(&ctx, &id).await.unwrap_err();
        assert!(matches!(err, SignalError::Terminal { .. }));
    }
}
