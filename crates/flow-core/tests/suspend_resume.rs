mod common;

use std::sync::atomic::Ordering;

use common::{engine_with, gated, AddOne, Double};
use flow_core::{FlowError, Pipe, RunStatus, SuspensionStore};
use futures::StreamExt;
use serde_json::json;

#[tokio::test]
async fn resume_reenters_the_suspended_step_not_the_first() {
    let g = gated();
    let engine = engine_with(g.definition);

    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    let suspended = handle.settled().await;
    assert_eq!(suspended.status, RunStatus::Suspended);
    assert_eq!(suspended.current_step_index, 1);
    assert_eq!(suspended.suspended_payload, Some(json!({"message": "approve?", "n": 1})));
    assert_eq!(g.first.load(Ordering::SeqCst), 1);

    let resumed = engine.resume(handle.run_id(), json!({"approved": true})).await.expect("resume");
    let done = resumed.settled().await;
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.terminal_output, Some(json!({"n": 2})));
    assert_eq!(done.resume_count, 1);
    assert_eq!(g.first.load(Ordering::SeqCst), 1, "earlier steps never re-run");
    assert_eq!(g.gate_calls.load(Ordering::SeqCst), 2);
    assert_eq!(g.gate_index.load(Ordering::SeqCst), 1);
    assert!(engine.store().load(handle.run_id()).await.is_err(), "terminal runs leave the store");
}

#[tokio::test]
async fn bail_short_circuits_remaining_steps() {
    let g = gated();
    let engine = engine_with(g.definition);

    let handle = engine.start("gated", json!({"n": 4})).expect("start");
    handle.settled().await;
    let resumed = engine.resume(handle.run_id(), json!({"approved": false})).await.expect("resume");
    let done = resumed.settled().await;

    assert_eq!(done.status, RunStatus::Bailed);
    assert_eq!(done.terminal_output, Some(json!({"message": "rejected at 5"})));
    assert!(done.error.is_none(), "bail is not an error");
    assert_eq!(g.last.load(Ordering::SeqCst), 0);

    let kinds: Vec<String> = resumed.subscribe().expect("sub").map(|f| f.kind).collect().await;
    assert_eq!(kinds.last().map(String::as_str), Some("bailed"));
    assert!(!kinds.iter().any(|k| k == "failed"));
}

#[tokio::test]
async fn output_is_independent_of_suspension_delay() {
    let mut outputs = Vec::new();
    for delay_ms in [0u64, 30] {
        let g = gated();
        let engine = engine_with(g.definition);
        let handle = engine.start("gated", json!({"n": 10})).expect("start");
        handle.settled().await;
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        let resumed = engine.resume(handle.run_id(), json!({"approved": true})).await.expect("resume");
        outputs.push(resumed.settled().await.terminal_output);
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], Some(json!({"n": 12})));
}

#[tokio::test]
async fn pure_pipeline_matches_sequential_application() {
    let def = Pipe::new(AddOne::new("inc")).then(Double)
                                           .then(AddOne::new("inc-again"))
                                           .build("arith")
                                           .expect("def");
    let engine = engine_with(def);
    for n in [-3i64, 0, 7, 1000] {
        let state = engine.start("arith", json!({"n": n})).expect("start").settled().await;
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.terminal_output, Some(json!({"n": (n + 1) * 2 + 1})));
        assert_eq!(state.step_outputs.keys().collect::<Vec<_>>(), vec!["inc", "double", "inc-again"]);
    }
}

#[tokio::test]
async fn start_validates_input_and_pipeline_id() {
    let g = gated();
    let engine = engine_with(g.definition);
    assert!(matches!(engine.start("nope", json!({})), Err(FlowError::UnknownPipeline(_))));
    assert!(matches!(engine.start("gated", json!({"n": "zero"})), Err(FlowError::SchemaValidation { .. })));
    assert_eq!(g.first.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_resume_has_exactly_one_winner() {
    let g = gated();
    let engine = engine_with(g.definition);
    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    handle.settled().await;
    let run_id = handle.run_id();

    let (a, b) = tokio::join!(engine.resume(run_id, json!({"approved": true})),
                              engine.resume(run_id, json!({"approved": true})));
    let results = [a, b];
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(losers, vec![&FlowError::ConcurrentResume(run_id)]);

    let done = winners[0].settled().await;
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.resume_count, 1);
    assert_eq!(g.gate_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn terminal_and_unknown_runs_refuse_resume() {
    let g = gated();
    let engine = engine_with(g.definition);
    let unknown = uuid::Uuid::new_v4();
    assert_eq!(engine.resume(unknown, json!({"approved": true})).await.unwrap_err(),
               FlowError::UnknownRun(unknown));

    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    handle.settled().await;
    let done = engine.resume(handle.run_id(), json!({"approved": true})).await.expect("resume");
    done.settled().await;
    let err = engine.resume(handle.run_id(), json!({"approved": true})).await.unwrap_err();
    assert_eq!(err,
               FlowError::InvalidState { run_id: handle.run_id(),
                                         status: RunStatus::Completed });
}
