//! `plan-review`: propone pasos vía `generateTaskSteps` y espera la decisión
//! del cliente.
//!
//! Los argumentos se publican de forma incremental (un `tool-call-args` por
//! paso) antes de bloquear en `await_result`. Un plan rechazado, o una
//! invocación rechazada, termina el run con bail. Cancelar el run rechaza la
//! invocación abierta y el engine lo cierra como `cancelled`.

use async_trait::async_trait;
use flow_core::{FlowError, StepContext, TypedStep, TypedStepResult};
use log::info;
use serde_json::json;
use uuid::Uuid;

use crate::payloads::{ApprovedPlan, GenerateTaskStepsArgs, GenerateTaskStepsResult, PlanInput};
use crate::tools::GENERATE_TASK_STEPS;

pub struct PlanReview;

fn to_value<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, FlowError> {
    serde_json::to_value(v).map_err(|e| FlowError::Internal(e.to_string()))
}

impl PlanReview {
    async fn propose(&self, input: &PlanInput, ctx: &StepContext) -> Result<GenerateTaskStepsResult, FlowError> {
        let broker = ctx.broker();
        let mut args = GenerateTaskStepsArgs::default();
        let invocation_id: Uuid = ctx.issue_tool(GENERATE_TASK_STEPS, to_value(&args)?)?;
        for step in &input.steps {
            args.steps.push(step.clone());
            broker.update_args(invocation_id, to_value(&args)?)?;
        }
        let raw = broker.await_result(invocation_id).await?;
        serde_json::from_value(raw).map_err(|e| FlowError::step("plan-review", format!("result decode: {e}")))
    }
}

#[async_trait]
impl TypedStep for PlanReview {
    type Input = PlanInput;
    type Output = ApprovedPlan;
    type Suspend = ();
    type Resume = ();

    fn id(&self) -> &'static str {
        "plan-review"
    }

    fn description(&self) -> &str {
        "Ask the user to review the proposed steps"
    }

    async fn run_typed(&self, input: PlanInput, _resume: Option<()>, ctx: &StepContext) -> TypedStepResult<ApprovedPlan, ()> {
        match self.propose(&input, ctx).await {
            Ok(result) if result.accepted => TypedStepResult::Continue(ApprovedPlan { goal: input.goal,
                                                                                      steps: result.steps }),
            Ok(_) => {
                info!("plan rejected run_id={} goal={}", ctx.run_id, input.goal);
                TypedStepResult::Bail(json!({ "message": format!("Plan for \"{}\" was rejected.", input.goal) }))
            }
            Err(e @ FlowError::InvocationRejected { .. }) => TypedStepResult::Bail(json!({ "message": e.to_string() })),
            Err(e) => TypedStepResult::Fail(e.to_string()),
        }
    }
}
