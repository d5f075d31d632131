//! Workflow de aprobación: `process-request` → `request-approval` →
//! `finalize-request`.
//!
//! - `process-request` asigna un id `REQ-<unix millis>` y arma el resumen.
//! - `request-approval` suspende pidiendo aprobación; al reanudar continúa
//!   (aprobado) o hace bail con un mensaje de rechazo.
//! - `finalize-request` produce la salida terminal.

use async_trait::async_trait;
use chrono::Utc;
use flow_core::{StepContext, TypedStep, TypedStepResult};
use log::info;
use serde_json::json;

use crate::payloads::{ApprovalDecision, ApprovalOutcome, ApprovalPrompt, FinalizedRequest, ProcessedRequest, RequestInput};

const DEFAULT_APPROVER: &str = "User";

/// `Request for <type> ($<amount>): <details>`; el monto se omite si falta o
/// es cero.
pub fn summarize(input: &RequestInput) -> String {
    match input.amount {
        Some(amount) if amount != 0.0 => {
            format!("Request for {} (${}): {}", input.request_type, amount, input.details)
        }
        _ => format!("Request for {}: {}", input.request_type, input.details),
    }
}

pub struct ProcessRequest;

#[async_trait]
impl TypedStep for ProcessRequest {
    type Input = RequestInput;
    type Output = ProcessedRequest;
    type Suspend = ();
    type Resume = ();

    fn id(&self) -> &'static str {
        "process-request"
    }

    fn description(&self) -> &str {
        "Process the initial request and prepare for approval"
    }

    async fn run_typed(&self,
                       input: RequestInput,
                       _resume: Option<()>,
                       _ctx: &StepContext)
                       -> TypedStepResult<ProcessedRequest, ()> {
        let request_id = format!("REQ-{}", Utc::now().timestamp_millis());
        TypedStepResult::Continue(ProcessedRequest { summary: summarize(&input),
                                                     request_id,
                                                     request_type: input.request_type,
                                                     amount: input.amount })
    }
}

pub struct RequestApproval;

#[async_trait]
impl TypedStep for RequestApproval {
    type Input = ProcessedRequest;
    type Output = ApprovalOutcome;
    type Suspend = ApprovalPrompt;
    type Resume = ApprovalDecision;

    fn id(&self) -> &'static str {
        "request-approval"
    }

    fn description(&self) -> &str {
        "Request approval from user before proceeding"
    }

    async fn run_typed(&self,
                       input: ProcessedRequest,
                       resume: Option<ApprovalDecision>,
                       ctx: &StepContext)
                       -> TypedStepResult<ApprovalOutcome, ApprovalPrompt> {
        match resume {
            None => TypedStepResult::Suspend(ApprovalPrompt { message: format!("Please review and approve this {} request: {}",
                                                                               input.request_type, input.summary),
                                                              request_id: input.request_id }),
            Some(decision) if decision.approved => {
                TypedStepResult::Continue(ApprovalOutcome { approved: true,
                                                            request_id: input.request_id,
                                                            approved_by: Some(decision.approver_name
                                                                                      .unwrap_or_else(|| DEFAULT_APPROVER.to_string())) })
            }
            Some(_) => {
                info!("request rejected run_id={} request_id={}", ctx.run_id, input.request_id);
                TypedStepResult::Bail(json!({ "message": format!("Request {} has been rejected.", input.request_id) }))
            }
        }
    }
}

pub struct FinalizeRequest;

#[async_trait]
impl TypedStep for FinalizeRequest {
    type Input = ApprovalOutcome;
    type Output = FinalizedRequest;
    type Suspend = ();
    type Resume = ();

    fn id(&self) -> &'static str {
        "finalize-request"
    }

    fn description(&self) -> &str {
        "Finalize the approved request"
    }

    async fn run_typed(&self,
                       input: ApprovalOutcome,
                       _resume: Option<()>,
                       _ctx: &StepContext)
                       -> TypedStepResult<FinalizedRequest, ()> {
        let approver = input.approved_by.as_deref().unwrap_or(DEFAULT_APPROVER);
        TypedStepResult::Continue(FinalizedRequest { status: "approved".into(),
                                                     message: format!("Request {} has been approved by {} and finalized successfully!",
                                                                      input.request_id, approver),
                                                     request_id: input.request_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(amount: Option<f64>) -> RequestInput {
        RequestInput { request_type: "expense".into(),
                       amount,
                       details: "flight".into() }
    }

    #[test]
    fn summary_includes_amount_only_when_present() {
        assert_eq!(summarize(&input(Some(100.0))), "Request for expense ($100): flight");
        assert_eq!(summarize(&input(Some(12.5))), "Request for expense ($12.5): flight");
        assert_eq!(summarize(&input(None)), "Request for expense: flight");
        assert_eq!(summarize(&input(Some(0.0))), "Request for expense: flight");
    }
}
