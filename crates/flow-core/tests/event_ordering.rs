use std::sync::Arc;

use async_trait::async_trait;
use flow_core::{EventFrame, PipelineDefinition, PipelineEngine, RunStatus, SequenceTracker, StepContext, StepDefinition,
                StepResult};
use futures::StreamExt;
use serde_json::json;

/// Productor anidado: tres sub-tareas concurrentes, cada una en su scope hijo.
struct FanOut;

#[async_trait]
impl StepDefinition for FanOut {
    fn id(&self) -> &str {
        "fan-out"
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        let mut tasks = Vec::new();
        for worker in 0..3 {
            let child = match ctx.emitter().child() {
                Ok(c) => c,
                Err(e) => return StepResult::fail(e),
            };
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    child.progress(json!({ "worker": worker, "i": i }))?;
                    tokio::task::yield_now().await;
                }
                child.close()
            }));
        }
        for t in tasks {
            match t.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return StepResult::fail(e),
                Err(e) => return StepResult::fail(e),
            }
        }
        if let Err(e) = ctx.emitter().progress(json!({ "status": "done" })) {
            return StepResult::fail(e);
        }
        StepResult::Continue(json!({ "workers": 3 }))
    }
}

async fn collect(engine: &PipelineEngine, run_id: uuid::Uuid) -> Vec<EventFrame> {
    engine.subscribe(run_id).await.expect("sub").collect().await
}

#[tokio::test]
async fn nested_scopes_keep_their_own_contiguous_order() {
    let engine = PipelineEngine::in_memory();
    engine.register(PipelineDefinition::new("fan", vec![Arc::new(FanOut)]).expect("def"));
    let handle = engine.start("fan", json!({})).expect("start");
    assert_eq!(handle.settled().await.status, RunStatus::Completed);

    let frames = collect(&engine, handle.run_id()).await;
    let mut tracker = SequenceTracker::new();
    for f in &frames {
        tracker.observe(f).expect("contiguous per scope");
    }
    assert_eq!(tracker.scopes_seen(), 4);

    let root: Vec<&str> = frames.iter()
                                .filter(|f| f.scope_id == handle.run_id())
                                .map(|f| f.kind.as_str())
                                .collect();
    assert_eq!(root, vec!["run-started", "step-started", "progress", "step-finished", "completed"]);

    let children: Vec<&EventFrame> = frames.iter().filter(|f| f.scope_id != handle.run_id()).collect();
    assert_eq!(children.len(), 30);
    assert!(children.iter().all(|f| f.parent_scope_id == Some(handle.run_id())));
    for worker in 0..3 {
        let seq: Vec<u64> = children.iter()
                                    .filter(|f| f.data["worker"] == json!(worker))
                                    .map(|f| f.data["i"].as_u64().unwrap_or(u64::MAX))
                                    .collect();
        assert_eq!(seq, (0..10).collect::<Vec<u64>>());
    }
}

#[tokio::test]
async fn late_subscription_replays_from_the_first_frame() {
    let engine = PipelineEngine::in_memory();
    engine.register(PipelineDefinition::new("fan", vec![Arc::new(FanOut)]).expect("def"));
    let handle = engine.start("fan", json!({})).expect("start");
    handle.settled().await;

    let first = collect(&engine, handle.run_id()).await;
    let second = collect(&engine, handle.run_id()).await;
    assert_eq!(first, second);
    assert_eq!(first[0].sequence, 0);
    assert_eq!(first[0].kind, "run-started");
}
