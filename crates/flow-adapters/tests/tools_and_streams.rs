//! Tool con resultado del cliente, progreso y productores anidados.

use std::time::Duration;

use flow_adapters::payloads::{GenerateTaskStepsArgs, TaskStep};
use flow_adapters::{register_all, StepSelection};
use flow_core::{EventFrame, PipelineEngine, RunStatus, SequenceTracker};
use futures::StreamExt;
use serde_json::json;
use uuid::Uuid;

fn engine() -> PipelineEngine {
    let engine = PipelineEngine::in_memory();
    register_all(&engine, Duration::from_millis(5)).expect("register");
    engine
}

fn plan_input() -> serde_json::Value {
    json!({
        "goal": "ship release",
        "steps": [
            {"description": "run tests", "status": "enabled"},
            {"description": "bump version", "status": "enabled"},
            {"description": "publish", "status": "enabled"}
        ]
    })
}

/// Replica del lado cliente: sigue los args hasta que la invocación queda
/// esperando resultado.
async fn follow_plan(engine: &PipelineEngine, run_id: Uuid) -> (Uuid, StepSelection) {
    let mut frames = engine.subscribe(run_id).await.expect("sub");
    let mut selection = StepSelection::new();
    let mut invocation = None;
    while let Some(frame) = frames.next().await {
        match frame.kind.as_str() {
            "tool-call-issued" | "tool-call-args" => {
                invocation = frame.data["invocationId"].as_str().and_then(|s| Uuid::parse_str(s).ok());
                let args: GenerateTaskStepsArgs = serde_json::from_value(frame.data["args"].clone()).expect("args");
                selection.on_stream(args.clone());
                if args.steps.len() == 3 {
                    selection.on_final(args);
                    break;
                }
            }
            _ => {}
        }
    }
    (invocation.expect("invocation id"), selection)
}

#[tokio::test]
async fn plan_review_returns_the_user_selection() {
    let engine = engine();
    let handle = engine.start("plan-review", plan_input()).expect("start");
    let (invocation_id, mut selection) = follow_plan(&engine, handle.run_id()).await;

    selection.toggle(1);
    let result = selection.confirm();
    engine.broker()
          .provide_result(invocation_id, serde_json::to_value(&result).expect("encode"))
          .expect("provide");

    let done = handle.settled().await;
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.terminal_output,
               Some(json!({
                   "goal": "ship release",
                   "steps": [
                       {"description": "run tests", "status": "enabled"},
                       {"description": "publish", "status": "enabled"}
                   ]
               })));
}

#[tokio::test]
async fn rejected_plan_bails() {
    let engine = engine();
    let handle = engine.start("plan-review", plan_input()).expect("start");
    let (invocation_id, selection) = follow_plan(&engine, handle.run_id()).await;
    engine.broker()
          .provide_result(invocation_id, serde_json::to_value(selection.reject()).expect("encode"))
          .expect("provide");

    let done = handle.settled().await;
    assert_eq!(done.status, RunStatus::Bailed);
    assert_eq!(done.terminal_output, Some(json!({"message": "Plan for \"ship release\" was rejected."})));
}

#[tokio::test]
async fn rejected_invocation_bails_too() {
    let engine = engine();
    let handle = engine.start("plan-review", plan_input()).expect("start");
    let (invocation_id, _) = follow_plan(&engine, handle.run_id()).await;
    engine.broker().reject(invocation_id, "user closed the dialog").expect("reject");
    assert_eq!(handle.settled().await.status, RunStatus::Bailed);
}

#[tokio::test]
async fn cancelling_plan_review_while_waiting_for_the_user() {
    let engine = engine();
    let handle = engine.start("plan-review", plan_input()).expect("start");
    let (invocation_id, _) = follow_plan(&engine, handle.run_id()).await;

    assert_eq!(engine.cancel(handle.run_id()).await.expect("cancel"), RunStatus::Running);
    let done = tokio::time::timeout(Duration::from_secs(2), handle.settled()).await.expect("run settles");
    assert_eq!(done.status, RunStatus::Cancelled);
    assert!(engine.broker().pending().is_empty());
    assert!(engine.broker().provide_result(invocation_id, json!({"accepted": true, "steps": []})).is_err());
}

#[tokio::test]
async fn process_task_reports_progress_in_order() {
    let engine = engine();
    let handle = engine.start("task", json!({"task": "index docs"})).expect("start");
    let done = handle.settled().await;
    assert_eq!(done.terminal_output,
               Some(json!({"result": "Task \"index docs\" has been completed successfully!", "status": "completed"})));

    let progress: Vec<String> = handle.subscribe()
                                      .expect("sub")
                                      .filter(|f| futures::future::ready(f.kind == "progress"))
                                      .map(|f| f.data["status"].as_str().unwrap_or_default().to_string())
                                      .collect()
                                      .await;
    assert_eq!(progress, vec!["in-progress", "done"]);
}

#[tokio::test]
async fn fulfilment_stages_stream_in_their_own_scopes() {
    let engine = engine();
    let handle = engine.start("order-fulfilment", json!({"orderId": "A-1", "items": ["book", "pen"]}))
                       .expect("start");
    let done = handle.settled().await;
    assert_eq!(done.status, RunStatus::Completed);
    let output = done.terminal_output.expect("output");
    let stages: Vec<&str> = output["stages"].as_array()
                                            .expect("stages")
                                            .iter()
                                            .filter_map(|s| s["stage"].as_str())
                                            .collect();
    assert_eq!(stages, vec!["inventory", "payment", "shipping"]);
    assert_eq!(output["stages"][0]["detail"], json!("reserved 2 item(s)"));

    let frames: Vec<EventFrame> = handle.subscribe().expect("sub").collect().await;
    let mut tracker = SequenceTracker::new();
    for f in &frames {
        tracker.observe(f).expect("no gaps");
    }
    assert_eq!(tracker.scopes_seen(), 4);
    for stage in ["inventory", "payment", "shipping"] {
        let statuses: Vec<&str> = frames.iter()
                                        .filter(|f| f.data["stage"] == json!(stage))
                                        .filter_map(|f| f.data["status"].as_str())
                                        .collect();
        assert_eq!(statuses, vec!["started", "done"]);
        let scopes: Vec<Uuid> = frames.iter()
                                      .filter(|f| f.data["stage"] == json!(stage))
                                      .map(|f| f.scope_id)
                                      .collect();
        assert_eq!(scopes[0], scopes[1]);
        assert_ne!(scopes[0], handle.run_id());
    }
}

#[test]
fn task_steps_are_enabled_by_default_helper() {
    assert!(TaskStep::enabled("x").is_enabled());
}
