//! `fulfil-order`: productor anidado. Las etapas corren concurrentemente,
//! cada una emitiendo en su propio scope hijo del run.

use std::time::Duration;

use async_trait::async_trait;
use flow_core::{FlowError, ScopedEmitter, StepContext, TypedStep, TypedStepResult};
use log::debug;
use serde_json::json;

use crate::payloads::{OrderInput, OrderReport, StageReport};

pub const STAGES: [&str; 3] = ["inventory", "payment", "shipping"];

pub struct FulfilOrder {
    stage_work: Duration,
}

impl FulfilOrder {
    pub fn new(stage_work: Duration) -> Self {
        Self { stage_work }
    }
}

impl Default for FulfilOrder {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

fn stage_detail(stage: &str, order: &OrderInput) -> String {
    match stage {
        "inventory" => format!("reserved {} item(s)", order.items.len()),
        "payment" => format!("charged order {}", order.order_id),
        _ => format!("label created for order {}", order.order_id),
    }
}

async fn run_stage(scope: ScopedEmitter, stage: &'static str, detail: String, work: Duration) -> Result<StageReport, FlowError> {
    scope.progress(json!({ "stage": stage, "status": "started" }))?;
    tokio::time::sleep(work).await;
    scope.progress(json!({ "stage": stage, "status": "done", "detail": detail }))?;
    scope.close()?;
    Ok(StageReport { stage: stage.to_string(),
                     detail })
}

#[async_trait]
impl TypedStep for FulfilOrder {
    type Input = OrderInput;
    type Output = OrderReport;
    type Suspend = ();
    type Resume = ();

    fn id(&self) -> &'static str {
        "fulfil-order"
    }

    fn description(&self) -> &str {
        "Run inventory, payment and shipping concurrently"
    }

    async fn run_typed(&self, input: OrderInput, _resume: Option<()>, ctx: &StepContext) -> TypedStepResult<OrderReport, ()> {
        let mut tasks = Vec::with_capacity(STAGES.len());
        for stage in STAGES {
            let scope = match ctx.emitter().child() {
                Ok(s) => s,
                Err(e) => return TypedStepResult::Fail(e.to_string()),
            };
            debug!("stage started run_id={} stage={stage} scope={}", ctx.run_id, scope.scope_id());
            let detail = stage_detail(stage, &input);
            tasks.push(tokio::spawn(run_stage(scope, stage, detail, self.stage_work)));
        }
        let mut stages = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(Ok(report)) => stages.push(report),
                Ok(Err(e)) => return TypedStepResult::Fail(e.to_string()),
                Err(e) => return TypedStepResult::Fail(format!("stage task aborted: {e}")),
            }
        }
        TypedStepResult::Continue(OrderReport { order_id: input.order_id,
                                                stages })
    }
}
