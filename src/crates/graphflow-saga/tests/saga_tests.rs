//! End-to-end saga tests: forward chaining, retries, compensation order,
//! optional steps, manual compensation, and timeouts.

use graphflow_core::Context;
use graphflow_saga::{
    ExecutionFilter, RetryPolicy, SagaDefinition, SagaError, SagaOrchestrator, SagaStatus,
    SagaStep, StepStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::exponential(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    )
}

#[tokio::test]
async fn failing_middle_step_compensates_only_completed_steps() {
    // Saga [a, b, c]; b fails after retries. a's compensation runs once
    // with a's output; c never runs, so its compensation never fires;
    // terminal status is compensated.
    let compensated: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let b_attempts = Arc::new(AtomicUsize::new(0));
    let c_ran = Arc::new(AtomicUsize::new(0));

    let comp_a = compensated.clone();
    let comp_c = compensated.clone();
    let b_attempts_clone = b_attempts.clone();
    let c_ran_clone = c_ran.clone();

    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("abc")
                .add_step(
                    SagaStep::new("a", |_ctx, _input| async move { Ok(json!("a_output")) })
                        .with_compensation(move |_ctx, output| {
                            let compensated = comp_a.clone();
                            async move {
                                compensated.lock().unwrap().push(("a".into(), output));
                                Ok(json!(null))
                            }
                        }),
                )
                .add_step(
                    SagaStep::new("b", move |_ctx, _input| {
                        let attempts = b_attempts_clone.clone();
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            Err("b always fails".into())
                        }
                    })
                    .with_retry(fast_retry(3)),
                )
                .add_step(
                    SagaStep::new("c", move |_ctx, input| {
                        let ran = c_ran_clone.clone();
                        async move {
                            ran.fetch_add(1, Ordering::SeqCst);
                            Ok(input)
                        }
                    })
                    .with_compensation(move |_ctx, output| {
                        let compensated = comp_c.clone();
                        async move {
                            compensated.lock().unwrap().push(("c".into(), output));
                            Ok(json!(null))
                        }
                    }),
                ),
        )
        .unwrap();

    let id = orchestrator
        .start(&Context::new(), "abc", json!("input"))
        .await
        .unwrap();
    let done = orchestrator.wait(&id).await.unwrap();

    assert_eq!(done.status, SagaStatus::Compensated);
    assert_eq!(b_attempts.load(Ordering::SeqCst), 3, "b retries to its bound");
    assert_eq!(c_ran.load(Ordering::SeqCst), 0, "c never runs");

    let record = compensated.lock().unwrap();
    assert_eq!(record.len(), 1, "only a compensates");
    assert_eq!(record[0].0, "a");
    assert_eq!(record[0].1, json!("a_output"));

    assert_eq!(done.steps[0].status, StepStatus::Compensated);
    assert_eq!(done.steps[1].status, StepStatus::Failed);
    assert_eq!(done.steps[1].attempts, 3);
    assert_eq!(done.steps[2].status, StepStatus::Pending);
    assert!(done.error.as_deref().unwrap().contains("b always fails"));
}

#[tokio::test]
async fn compensation_runs_in_reverse_order_with_matching_outputs() {
    let order: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut saga = SagaDefinition::new("reverse");
    for name in ["s0", "s1", "s2"] {
        let step_name = name.to_string();
        let comp_name = name.to_string();
        let order_clone = order.clone();
        saga = saga.add_step(
            SagaStep::new(name, move |_ctx, _input| {
                let output = json!(format!("{step_name}_output"));
                async move { Ok(output) }
            })
            .with_compensation(move |_ctx, output| {
                let order = order_clone.clone();
                let name = comp_name.clone();
                async move {
                    order.lock().unwrap().push((name, output));
                    Ok(json!(null))
                }
            }),
        );
    }
    saga = saga.add_step(SagaStep::new("s3", |_ctx, _input| async move {
        Err("s3 fails".into())
    }));

    let orchestrator = SagaOrchestrator::default();
    orchestrator.register(saga).unwrap();

    let id = orchestrator
        .start(&Context::new(), "reverse", json!(null))
        .await
        .unwrap();
    let done = orchestrator.wait(&id).await.unwrap();
    assert_eq!(done.status, SagaStatus::Compensated);

    let seen = order.lock().unwrap();
    let names: Vec<&str> = seen.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["s2", "s1", "s0"]);
    for (name, output) in seen.iter() {
        assert_eq!(output, &json!(format!("{name}_output")));
    }
}

#[tokio::test]
async fn optional_step_failure_does_not_compensate() {
    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("lenient")
                .add_step(SagaStep::new("first", |_ctx, _input| async move {
                    Ok(json!("carried"))
                }))
                .add_step(
                    SagaStep::new("shaky", |_ctx, _input| async move {
                        Err("optional failure".into())
                    })
                    .optional(true)
                    .with_retry(fast_retry(2)),
                )
                .add_step(SagaStep::new("last", |_ctx, input| async move { Ok(input) })),
        )
        .unwrap();

    let id = orchestrator
        .start(&Context::new(), "lenient", json!(null))
        .await
        .unwrap();
    let done = orchestrator.wait(&id).await.unwrap();

    assert_eq!(done.status, SagaStatus::Completed);
    // The optional step passes its input through as output.
    assert_eq!(done.output, Some(json!("carried")));
    assert_eq!(done.steps[1].status, StepStatus::Completed);
    assert!(done.steps[1].error.as_deref().unwrap().contains("optional failure"));
}

#[tokio::test]
async fn retried_step_eventually_succeeds() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("flaky").add_step(
                SagaStep::new("wobbly", move |_ctx, _input| {
                    let attempts = attempts_clone.clone();
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("transient".into())
                        } else {
                            Ok(json!("finally"))
                        }
                    }
                })
                .with_retry(fast_retry(5)),
            ),
        )
        .unwrap();

    let id = orchestrator
        .start(&Context::new(), "flaky", json!(null))
        .await
        .unwrap();
    let done = orchestrator.wait(&id).await.unwrap();

    assert_eq!(done.status, SagaStatus::Completed);
    assert_eq!(done.output, Some(json!("finally")));
    assert_eq!(done.steps[0].attempts, 3);
}

#[tokio::test]
async fn compensation_errors_mark_saga_failed_but_do_not_halt() {
    let later_compensated = Arc::new(AtomicUsize::new(0));
    let later_clone = later_compensated.clone();

    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("bad_comp")
                .add_step(
                    SagaStep::new("first", |_ctx, _input| async move { Ok(json!(1)) })
                        .with_compensation(move |_ctx, _output| {
                            let counter = later_clone.clone();
                            async move {
                                counter.fetch_add(1, Ordering::SeqCst);
                                Ok(json!(null))
                            }
                        }),
                )
                .add_step(
                    SagaStep::new("second", |_ctx, _input| async move { Ok(json!(2)) })
                        .with_compensation(|_ctx, _output| async move {
                            Err("undo failed".into())
                        }),
                )
                .add_step(SagaStep::new("third", |_ctx, _input| async move {
                    Err("forward failure".into())
                })),
        )
        .unwrap();

    let id = orchestrator
        .start(&Context::new(), "bad_comp", json!(null))
        .await
        .unwrap();
    let done = orchestrator.wait(&id).await.unwrap();

    // second's compensation failed, so the saga is failed, but first's
    // compensation still ran.
    assert_eq!(done.status, SagaStatus::Failed);
    assert_eq!(done.steps[1].status, StepStatus::CompensationFailed);
    assert_eq!(done.steps[0].status, StepStatus::Compensated);
    assert_eq!(later_compensated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_compensation_of_completed_saga() {
    let compensated = Arc::new(AtomicUsize::new(0));
    let compensated_clone = compensated.clone();

    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("undoable").add_step(
                SagaStep::new("work", |_ctx, _input| async move { Ok(json!("done")) })
                    .with_compensation(move |_ctx, _output| {
                        let counter = compensated_clone.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(json!(null))
                        }
                    }),
            ),
        )
        .unwrap();

    let ctx = Context::new();
    let id = orchestrator.start(&ctx, "undoable", json!(null)).await.unwrap();
    let done = orchestrator.wait(&id).await.unwrap();
    assert_eq!(done.status, SagaStatus::Completed);

    let undone = orchestrator.compensate(&ctx, &id).await.unwrap();
    assert_eq!(undone.status, SagaStatus::Compensated);
    assert_eq!(compensated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_compensation_of_running_saga_stops_at_next_step_boundary() {
    let second_ran = Arc::new(AtomicUsize::new(0));
    let second_clone = second_ran.clone();

    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("slow")
                .add_step(
                    SagaStep::new("first", |_ctx, _input| async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(json!("first_done"))
                    })
                    .with_compensation(|_ctx, _output| async move { Ok(json!(null)) }),
                )
                .add_step(SagaStep::new("second", move |_ctx, input| {
                    let ran = second_clone.clone();
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(input)
                    }
                })),
        )
        .unwrap();

    let ctx = Context::new();
    let id = orchestrator.start(&ctx, "slow", json!(null)).await.unwrap();

    // Let the first step get underway, then request compensation.
    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestrator.compensate(&ctx, &id).await.unwrap();

    let done = orchestrator.wait(&id).await.unwrap();
    assert_eq!(done.status, SagaStatus::Compensated);
    assert_eq!(second_ran.load(Ordering::SeqCst), 0, "second step never starts");
    assert_eq!(done.steps[0].status, StepStatus::Compensated);
}

#[tokio::test]
async fn step_timeout_triggers_compensation() {
    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("deadline")
                .add_step(
                    SagaStep::new("quick", |_ctx, _input| async move { Ok(json!(1)) })
                        .with_compensation(|_ctx, _output| async move { Ok(json!(null)) }),
                )
                .add_step(
                    SagaStep::new("stuck", |_ctx, input| async move {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(input)
                    })
                    .with_timeout(Duration::from_millis(30)),
                ),
        )
        .unwrap();

    let id = orchestrator
        .start(&Context::new(), "deadline", json!(null))
        .await
        .unwrap();
    let done = orchestrator.wait(&id).await.unwrap();

    assert_eq!(done.status, SagaStatus::Compensated);
    assert!(done.steps[1].error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn callbacks_fire_on_completion_and_compensation() {
    let completed = Arc::new(AtomicUsize::new(0));
    let compensated = Arc::new(AtomicUsize::new(0));
    let completed_clone = completed.clone();
    let compensated_clone = compensated.clone();

    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("happy")
                .add_step(SagaStep::new("only", |_ctx, input| async move { Ok(input) }))
                .on_complete(move |_execution| {
                    completed_clone.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    orchestrator
        .register(
            SagaDefinition::new("sad")
                .add_step(SagaStep::new("boom", |_ctx, _input| async move {
                    Err("nope".into())
                }))
                .on_compensate(move |_execution| {
                    compensated_clone.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();

    let ctx = Context::new();
    let happy = orchestrator.start(&ctx, "happy", json!(null)).await.unwrap();
    orchestrator.wait(&happy).await.unwrap();
    let sad = orchestrator.start(&ctx, "sad", json!(null)).await.unwrap();
    orchestrator.wait(&sad).await.unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(compensated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn list_filters_by_name_and_status() {
    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("ok")
                .add_step(SagaStep::new("s", |_ctx, input| async move { Ok(input) })),
        )
        .unwrap();
    orchestrator
        .register(
            SagaDefinition::new("bad").add_step(SagaStep::new("s", |_ctx, _input| async move {
                Err("always".into())
            })),
        )
        .unwrap();

    let ctx = Context::new();
    for _ in 0..2 {
        let id = orchestrator.start(&ctx, "ok", json!(null)).await.unwrap();
        orchestrator.wait(&id).await.unwrap();
    }
    let id = orchestrator.start(&ctx, "bad", json!(null)).await.unwrap();
    orchestrator.wait(&id).await.unwrap();

    let completed = orchestrator
        .list(&ExecutionFilter::all().status(SagaStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), 2);

    let bad = orchestrator
        .list(&ExecutionFilter::all().saga("bad"))
        .await
        .unwrap();
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].status, SagaStatus::Compensated);

    let capped = orchestrator
        .list(&ExecutionFilter::all().limit(1))
        .await
        .unwrap();
    assert_eq!(capped.len(), 1);
}

#[tokio::test]
async fn compensating_while_compensation_is_recorded_is_rejected() {
    // A failed saga ends terminal; manual compensation afterwards is
    // rejected as an invalid state transition.
    let orchestrator = SagaOrchestrator::default();
    orchestrator
        .register(
            SagaDefinition::new("one_shot")
                .add_step(
                    SagaStep::new("a", |_ctx, input| async move { Ok(input) })
                        .with_compensation(|_ctx, _output| async move {
                            Err("undo broken".into())
                        }),
                )
                .add_step(SagaStep::new("b", |_ctx, _input| async move {
                    Err("fails".into())
                })),
        )
        .unwrap();

    let ctx = Context::new();
    let id = orchestrator.start(&ctx, "one_shot", json!(null)).await.unwrap();
    let done = orchestrator.wait(&id).await.unwrap();
    assert_eq!(done.status, SagaStatus::Failed);

    let err = orchestrator.compensate(&ctx, &id).await.unwrap_err();
    assert!(matches!(err, SagaError::InvalidState(_)));
}
