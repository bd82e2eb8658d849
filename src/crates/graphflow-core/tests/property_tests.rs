//! Property-based tests for runner invariants: determinism, checkpoint
//! round-trips, fork/join merge behavior, and the iteration bound.

use graphflow_core::{
    BoxError, CheckpointStore, Graph, GraphError, GraphState, MemoryCheckpointStore, RunOptions,
    END,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tally {
    count: i64,
    trail: Vec<String>,
}

impl GraphState for Tally {}

/// A linear chain of `n` nodes, each incrementing the count and recording
/// its own id.
fn chain(n: usize) -> Graph<Tally> {
    let mut graph = Graph::new();
    for i in 0..n {
        let id = format!("node_{i}");
        let trail_id = id.clone();
        graph.add_node(id, move |_ctx, mut state: Tally| {
            let trail_id = trail_id.clone();
            async move {
                state.count += 1;
                state.trail.push(trail_id);
                Ok::<_, BoxError>(state)
            }
        });
    }
    for i in 0..n.saturating_sub(1) {
        graph.add_edge(format!("node_{i}"), format!("node_{}", i + 1));
    }
    graph.add_edge(format!("node_{}", n - 1), END);
    graph.set_entry("node_0");
    graph
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Running a pure chain twice on equal initial state yields equal
    /// final states, and the chain's effect is exactly its length.
    #[test]
    fn chains_are_deterministic(len in 1usize..6, start in -1000i64..1000) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let compiled = chain(len).compile().unwrap();
            let initial = Tally { count: start, trail: Vec::new() };

            let first = compiled.run(initial.clone()).await.unwrap();
            let second = compiled.run(initial).await.unwrap();

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.count, start + len as i64);
            prop_assert_eq!(first.trail.len(), len);
            Ok(())
        })?;
    }

    /// Completing a run, deleting its terminal checkpoint, and resuming
    /// replays only the tail and converges on the same final state.
    #[test]
    fn checkpoint_resume_converges(len in 2usize..6, start in -100i64..100) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let compiled = chain(len).compile().unwrap();
            let store = Arc::new(MemoryCheckpointStore::new());
            let initial = Tally { count: start, trail: Vec::new() };

            let options = RunOptions::new()
                .with_checkpointing(store.clone())
                .with_run_id("prop-run");
            let complete = compiled
                .run_with_options(initial, options)
                .await
                .unwrap();

            // Resume from the second-to-last checkpoint.
            let last = format!("node_{}", len - 1);
            store.delete("prop-run", &last).await.unwrap();
            let resumed = compiled.resume(store.clone(), "prop-run").await.unwrap();

            prop_assert_eq!(resumed, complete);
            store.delete_run("prop-run").await.unwrap();
            Ok(())
        })?;
    }

    /// Branches writing disjoint fields merge to the same result whatever
    /// order they finish in (exercised by running the same fork many
    /// times with jittered branch values).
    #[test]
    fn fork_merge_is_order_independent(a in -1000i64..1000, b in -1000i64..1000) {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Pair {
            left: i64,
            right: i64,
            sum: i64,
        }
        impl GraphState for Pair {}

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut graph = Graph::new();
            graph.add_node("start", |_ctx, state: Pair| async move {
                Ok::<_, BoxError>(state)
            });
            graph.add_node("set_left", move |_ctx, mut state: Pair| async move {
                state.left = a;
                Ok::<_, BoxError>(state)
            });
            graph.add_node("set_right", move |_ctx, mut state: Pair| async move {
                state.right = b;
                Ok::<_, BoxError>(state)
            });
            graph.add_node("join", |_ctx, mut state: Pair| async move {
                state.sum = state.left + state.right;
                Ok::<_, BoxError>(state)
            });
            graph
                .add_edge("start", "set_left")
                .add_edge("start", "set_right")
                .add_edge("set_left", "join")
                .add_edge("set_right", "join")
                .add_edge("join", END)
                .set_entry("start");
            let compiled = graph.compile().unwrap();

            let result = compiled
                .run(Pair { left: 0, right: 0, sum: 0 })
                .await
                .unwrap();
            prop_assert_eq!(result, Pair { left: a, right: b, sum: a + b });
            Ok(())
        })?;
    }

    /// A self-looping router never exceeds the configured bound, and the
    /// failure names the looping node.
    #[test]
    fn iteration_bound_always_trips(bound in 1u32..20) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut graph = Graph::new();
            graph.add_node("spin", |_ctx, mut state: Tally| async move {
                state.count += 1;
                Ok::<_, BoxError>(state)
            });
            graph.add_conditional_edge("spin", |_ctx, _state: Tally| async move {
                "spin".to_string()
            });
            graph.set_entry("spin");
            let compiled = graph.compile().unwrap();

            let options = RunOptions::new().with_max_iterations(bound);
            let err = compiled
                .run_with_options(Tally { count: 0, trail: Vec::new() }, options)
                .await
                .unwrap_err();

            match err {
                GraphError::MaxIterations { node, iterations, .. } => {
                    prop_assert_eq!(node, "spin");
                    prop_assert_eq!(iterations, bound);
                }
                other => prop_assert!(false, "unexpected error: {other}"),
            }
            Ok(())
        })?;
    }
}
