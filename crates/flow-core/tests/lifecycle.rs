mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{gated, AddOne, Gate};
use flow_core::{EngineConfig, EventMultiplexer, FlowError, FlowGateway, InMemorySuspensionStore, InvocationStatus, Pipe, PipelineDefinition,
                PipelineEngine, ResumeRequest, RunState, RunStatus, StartRequest, StepContext, StepDefinition, StepResult, SuspensionStore,
                ToolCallBroker, ToolRegistration};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::Notify;
use uuid::Uuid;

fn engine_on(store: Arc<dyn SuspensionStore>, config: EngineConfig) -> PipelineEngine {
    let engine = PipelineEngine::builder(store).config(config).build().expect("engine");
    engine.register(gated().definition);
    engine
}

#[tokio::test]
async fn gateway_rejects_malformed_resume_before_touching_the_run() {
    let engine = engine_on(Arc::new(InMemorySuspensionStore::new()), EngineConfig::default());
    let gateway = FlowGateway::new(engine.clone());

    let started = gateway.start(StartRequest { pipeline_id: "gated".into(),
                                               input: json!({"n": 1}) })
                         .await
                         .expect("start");
    assert_eq!(started.status, RunStatus::Suspended);

    let bad = gateway.resume(ResumeRequest { run_id: started.run_id,
                                             resume_payload: json!({"approved": "yes"}) })
                     .await
                     .unwrap_err();
    assert!(matches!(bad, FlowError::SchemaValidation { .. }));
    assert_eq!(engine.state(started.run_id).await.expect("state").status, RunStatus::Suspended);

    let ok = gateway.resume(ResumeRequest { run_id: started.run_id,
                                            resume_payload: json!({"approved": true}) })
                    .await
                    .expect("resume");
    assert_eq!(ok.status, RunStatus::Completed);
    assert_eq!(ok.output, Some(json!({"n": 3})));

    let again = gateway.resume(ResumeRequest { run_id: started.run_id,
                                               resume_payload: json!({"approved": true}) })
                       .await
                       .unwrap_err();
    assert!(matches!(again, FlowError::InvalidState { status: RunStatus::Completed, .. }));
}

#[test]
fn gateway_dtos_use_camel_case() {
    let req: ResumeRequest = serde_json::from_value(json!({
        "runId": "67e55044-10b1-426f-9247-bb680e5fe0c8",
        "resumePayload": {"approved": true}
    }))
    .expect("decode");
    assert_eq!(req.resume_payload, json!({"approved": true}));
    let start: StartRequest = serde_json::from_value(json!({"pipelineId": "gated"})).expect("decode");
    assert!(start.input.is_null());
}

#[tokio::test]
async fn a_fresh_engine_resumes_from_the_shared_store() {
    let store: Arc<dyn SuspensionStore> = Arc::new(InMemorySuspensionStore::new());
    let first = engine_on(store.clone(), EngineConfig::default());
    let handle = first.start("gated", json!({"n": 0})).expect("start");
    let suspended = handle.settled().await;

    // otro "proceso": registro y multiplexer nuevos, mismo store
    let second = engine_on(store.clone(), EngineConfig::default());
    let resumed = second.resume(handle.run_id(), json!({"approved": true})).await.expect("resume");
    assert_eq!(resumed.settled().await.terminal_output, Some(json!({"n": 2})));

    let frames: Vec<_> = second.subscribe(handle.run_id()).await.expect("sub").collect().await;
    assert_eq!(frames[0].kind, "resumed");
    assert_eq!(frames[0].sequence, suspended.event_sequence, "root sequence keeps increasing");
}

#[tokio::test]
async fn expired_runs_cannot_be_resumed() {
    let config = EngineConfig::default().with_suspended_ttl(Duration::ZERO);
    let engine = engine_on(Arc::new(InMemorySuspensionStore::new()), config);
    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    handle.settled().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let err = engine.resume(handle.run_id(), json!({"approved": true})).await.unwrap_err();
    assert_eq!(err, FlowError::RunExpired(handle.run_id()));
    assert!(matches!(engine.store().load(handle.run_id()).await, Err(FlowError::UnknownRun(_))));
}

#[tokio::test]
async fn purge_removes_only_expired_runs() {
    let store: Arc<dyn SuspensionStore> = Arc::new(InMemorySuspensionStore::new());
    let short = engine_on(store.clone(), EngineConfig::default().with_suspended_ttl(Duration::ZERO));
    let handle = short.start("gated", json!({"n": 0})).expect("start");
    handle.settled().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let long = engine_on(store.clone(), EngineConfig::default());
    assert!(long.purge_expired().await.expect("purge").is_empty());
    assert_eq!(short.purge_expired().await.expect("purge"), vec![handle.run_id()]);
    assert!(store.load(handle.run_id()).await.is_err());
}

#[tokio::test]
async fn purge_leaves_a_run_claimed_by_a_concurrent_resume() {
    let store: Arc<dyn SuspensionStore> = Arc::new(InMemorySuspensionStore::new());
    let engine = engine_on(store.clone(), EngineConfig::default().with_suspended_ttl(Duration::ZERO));
    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    handle.settled().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    // otro resume ganó el claim entre `list_expired` y el borrado
    store.claim(handle.run_id()).await.expect("claim");
    assert!(engine.purge_expired().await.expect("purge").is_empty());
    assert!(store.load(handle.run_id()).await.is_ok(), "claimed record survives the purge");

    store.release(handle.run_id()).await.expect("release");
    assert_eq!(engine.purge_expired().await.expect("purge"), vec![handle.run_id()]);
    assert!(store.load(handle.run_id()).await.is_err());
}

#[tokio::test]
async fn terminal_runs_are_released_after_retention() {
    let engine = PipelineEngine::builder(Arc::new(InMemorySuspensionStore::new()))
        .config(EngineConfig::default().with_terminal_retention(Duration::ZERO))
        .build()
        .expect("engine");
    engine.register(PipelineDefinition::new("inc", vec![Arc::new(AddOne::new("inc"))]).expect("def"));

    let handle = engine.start("inc", json!({"n": 1})).expect("start");
    assert_eq!(handle.settled().await.status, RunStatus::Completed);

    let released = tokio::time::timeout(Duration::from_secs(2), async {
        while engine.handle(handle.run_id()).is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "run slot never released");
    assert!(engine.multiplexer().subscribe(handle.run_id()).is_err());
    assert!(format!("{engine:?}").contains("runs: 0"));

    // el handle conserva el último estado publicado
    assert_eq!(handle.state().status, RunStatus::Completed);
    assert_eq!(handle.settled().await.terminal_output, Some(json!({"n": 2})));
}

#[tokio::test]
async fn changed_definition_refuses_resume_and_keeps_the_run() {
    let engine = engine_on(Arc::new(InMemorySuspensionStore::new()), EngineConfig::default());
    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    handle.settled().await;

    let changed = Pipe::new(AddOne::new("add-one")).then(Gate::new())
                                                   .build("gated")
                                                   .expect("def");
    engine.register(changed);
    let err = engine.resume(handle.run_id(), json!({"approved": true})).await.unwrap_err();
    assert_eq!(err, FlowError::DefinitionChanged("gated".into()));

    let stored = engine.store().claim(handle.run_id()).await.expect("claim was released");
    assert_eq!(stored.status, RunStatus::Suspended);
}

#[tokio::test]
async fn cancelling_a_suspended_run_emits_cancelled_and_forgets_it() {
    let engine = engine_on(Arc::new(InMemorySuspensionStore::new()), EngineConfig::default());
    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    handle.settled().await;

    assert_eq!(engine.cancel(handle.run_id()).await.expect("cancel"), RunStatus::Cancelled);
    assert!(engine.store().load(handle.run_id()).await.is_err());
    assert_eq!(handle.status(), RunStatus::Cancelled);

    let kinds: Vec<String> = handle.subscribe().expect("sub").map(|f| f.kind).collect().await;
    assert_eq!(kinds.last().map(String::as_str), Some("cancelled"));
    assert!(matches!(engine.resume(handle.run_id(), json!({"approved": true})).await,
                     Err(FlowError::InvalidState { status: RunStatus::Cancelled, .. })));
}

struct Blocking {
    release: Arc<Notify>,
}

#[async_trait]
impl StepDefinition for Blocking {
    fn id(&self) -> &str {
        "blocking"
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        self.release.notified().await;
        StepResult::Continue(ctx.input.clone())
    }
}

#[tokio::test]
async fn cancelling_a_running_run_is_cooperative() {
    let release = Arc::new(Notify::new());
    let after = AddOne::new("after");
    let after_calls = after.calls.clone();
    let steps: Vec<Arc<dyn StepDefinition>> = vec![Arc::new(Blocking { release: release.clone() }), Arc::new(after)];
    let def = flow_core::PipelineDefinition::new("slow", steps).expect("def");
    let engine = PipelineEngine::in_memory();
    engine.register(def);

    let handle = engine.start("slow", json!({"n": 1})).expect("start");
    tokio::task::yield_now().await;
    assert_eq!(engine.cancel(handle.run_id()).await.expect("cancel"), RunStatus::Running);
    release.notify_one();

    let done = handle.settled().await;
    assert_eq!(done.status, RunStatus::Cancelled);
    assert_eq!(done.current_step_index, 0, "engine did not advance past the running step");
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
}

/// Bloquea en una tool resuelta por el cliente.
struct WaitsForTool;

#[async_trait]
impl StepDefinition for WaitsForTool {
    fn id(&self) -> &str {
        "waits-for-tool"
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        let id = match ctx.issue_tool("confirm", json!({})) {
            Ok(id) => id,
            Err(e) => return StepResult::fail(e),
        };
        match ctx.broker().await_result(id).await {
            Ok(result) => StepResult::Continue(result),
            Err(e) => StepResult::fail(e),
        }
    }
}

#[tokio::test]
async fn cancelling_a_run_blocked_on_a_tool_call_ends_it() {
    let engine = PipelineEngine::in_memory();
    engine.broker().register_tool(ToolRegistration::new("confirm", "ask the user")).expect("tool");
    engine.register(PipelineDefinition::new("ask", vec![Arc::new(WaitsForTool)]).expect("def"));

    let handle = engine.start("ask", json!({})).expect("start");
    let mut frames = handle.subscribe().expect("sub");
    while let Some(frame) = frames.next().await {
        if frame.kind == "tool-call-issued" {
            break;
        }
    }
    assert_eq!(engine.cancel(handle.run_id()).await.expect("cancel"), RunStatus::Running);

    let done = tokio::time::timeout(Duration::from_secs(2), handle.settled()).await.expect("run settles");
    assert_eq!(done.status, RunStatus::Cancelled);
    assert!(engine.broker().pending().is_empty());

    let kinds: Vec<String> = handle.subscribe().expect("sub").map(|f| f.kind).collect().await;
    assert!(kinds.iter().any(|k| k == "tool-call-rejected"));
    assert_eq!(kinds.last().map(String::as_str), Some("cancelled"));
}

#[tokio::test]
async fn tool_issued_after_cancellation_is_born_rejected() {
    let mux = EventMultiplexer::new();
    let broker = ToolCallBroker::new(mux.clone());
    broker.register_tool(ToolRegistration::new("confirm", "ask the user")).expect("tool");
    let run_id = Uuid::new_v4();
    mux.open_root(run_id, 0).expect("root");
    let ctx = StepContext::new(run_id,
                               "ask",
                               "waits-for-tool",
                               0,
                               json!({}),
                               None,
                               mux.emitter(run_id),
                               broker.clone(),
                               Arc::new(AtomicBool::new(true)));

    let id = ctx.issue_tool("confirm", json!({})).expect("issue");
    assert_eq!(broker.invocation(id).expect("snapshot").status, InvocationStatus::Rejected);
    assert!(matches!(broker.await_result(id).await, Err(FlowError::InvocationRejected { .. })));
}

/// Store que nunca confirma escrituras.
#[derive(Default)]
struct BrokenStore;

#[async_trait]
impl SuspensionStore for BrokenStore {
    async fn save(&self, _state: &RunState) -> Result<(), FlowError> {
        Err(FlowError::Durability("disk full".into()))
    }
    async fn load(&self, run_id: Uuid) -> Result<RunState, FlowError> {
        Err(FlowError::UnknownRun(run_id))
    }
    async fn delete(&self, _run_id: Uuid) -> Result<(), FlowError> {
        Ok(())
    }
    async fn claim(&self, run_id: Uuid) -> Result<RunState, FlowError> {
        Err(FlowError::UnknownRun(run_id))
    }
    async fn release(&self, _run_id: Uuid) -> Result<(), FlowError> {
        Ok(())
    }
    async fn list_expired(&self, _before: DateTime<Utc>) -> Result<Vec<Uuid>, FlowError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn unconfirmed_suspension_fails_the_run() {
    let engine = engine_on(Arc::new(BrokenStore), EngineConfig::default());
    let handle = engine.start("gated", json!({"n": 0})).expect("start");
    let done = handle.settled().await;
    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(done.error, Some(FlowError::Durability("disk full".into())));
    assert!(done.suspended_payload.is_none());

    let kinds: Vec<String> = handle.subscribe().expect("sub").map(|f| f.kind).collect().await;
    assert!(!kinds.iter().any(|k| k == "suspended"));
    assert_eq!(kinds.last().map(String::as_str), Some("failed"));
}

struct Broken;

#[async_trait]
impl StepDefinition for Broken {
    fn id(&self) -> &str {
        "broken"
    }

    fn output_schema(&self) -> Option<serde_json::Value> {
        Some(json!({"type": "object", "required": ["ok"]}))
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.input["explode"] == json!(true) {
            StepResult::fail("boom")
        } else {
            StepResult::Continue(json!({"nope": 1}))
        }
    }
}

#[tokio::test]
async fn step_failures_and_schema_violations_fail_the_run() {
    let engine = PipelineEngine::in_memory();
    engine.register(flow_core::PipelineDefinition::new("broken", vec![Arc::new(Broken)]).expect("def"));

    let failed = engine.start("broken", json!({"explode": true})).expect("start").settled().await;
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.error,
               Some(FlowError::StepExecution { step_id: "broken".into(),
                                               cause: "boom".into() }));

    let invalid = engine.start("broken", json!({})).expect("start").settled().await;
    assert_eq!(invalid.status, RunStatus::Failed);
    assert!(matches!(invalid.error, Some(FlowError::StepExecution { .. })));
}
