//! Definiciones de pipeline listas para registrar en un `PipelineEngine`.

use std::time::Duration;

use flow_core::{FlowError, Pipe, PipelineDefinition, PipelineEngine};
use log::info;

use crate::steps::approval::{FinalizeRequest, ProcessRequest, RequestApproval};
use crate::steps::fulfil::FulfilOrder;
use crate::steps::plan::PlanReview;
use crate::steps::task::ProcessTask;
use crate::tools::generate_task_steps_tool;

pub const APPROVAL_WORKFLOW: &str = "approval-workflow";
pub const TASK_PIPELINE: &str = "task";
pub const FULFILMENT_PIPELINE: &str = "order-fulfilment";
pub const PLAN_REVIEW_PIPELINE: &str = "plan-review";

pub fn approval_workflow() -> Result<PipelineDefinition, FlowError> {
    Pipe::new(ProcessRequest).then(RequestApproval)
                             .then(FinalizeRequest)
                             .build(APPROVAL_WORKFLOW)
}

pub fn task_pipeline(work: Duration) -> Result<PipelineDefinition, FlowError> {
    Pipe::new(ProcessTask::new(work)).build(TASK_PIPELINE)
}

pub fn fulfilment_pipeline(stage_work: Duration) -> Result<PipelineDefinition, FlowError> {
    Pipe::new(FulfilOrder::new(stage_work)).build(FULFILMENT_PIPELINE)
}

pub fn plan_review_pipeline() -> Result<PipelineDefinition, FlowError> {
    Pipe::new(PlanReview).build(PLAN_REVIEW_PIPELINE)
}

/// Registra la tool `generateTaskSteps` y los cuatro pipelines.
pub fn register_all(engine: &PipelineEngine, work: Duration) -> Result<(), FlowError> {
    engine.broker().register_tool(generate_task_steps_tool())?;
    for def in [approval_workflow()?, task_pipeline(work)?, fulfilment_pipeline(work)?, plan_review_pipeline()?] {
        engine.register(def);
    }
    info!("adapters registered pipelines={:?}", engine.pipeline_ids());
    Ok(())
}
