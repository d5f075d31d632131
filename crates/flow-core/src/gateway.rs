//! Resume Gateway: punto de entrada externo (start / resume / tool result).
//!
//! Traduce peticiones serializables a llamadas al engine y al broker. El
//! payload de resume se valida contra el schema del step suspendido ANTES de
//! tocar el engine.
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::{PipelineEngine, RunHandle};
use crate::errors::FlowError;
use crate::model::{RunState, RunStatus};
use crate::schema::validate_optional;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub pipeline_id: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub run_id: Uuid,
    #[serde(default)]
    pub resume_payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RunState> for ResumeResponse {
    fn from(state: &RunState) -> Self {
        Self { status: state.status,
               output: state.terminal_output.clone(),
               suspend_payload: state.suspended_payload.clone(),
               error: state.error.as_ref().map(ToString::to_string) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultRequest {
    pub invocation_id: Uuid,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultResponse {
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct FlowGateway {
    engine: PipelineEngine,
    wait: Duration,
}

impl FlowGateway {
    pub fn new(engine: PipelineEngine) -> Self {
        let wait = engine.config().gateway_wait_timeout;
        Self { engine, wait }
    }

    pub fn engine(&self) -> &PipelineEngine {
        &self.engine
    }

    async fn settle(&self, handle: &RunHandle) -> RunState {
        match tokio::time::timeout(self.wait, handle.settled()).await {
            Ok(state) => state,
            Err(_) => {
                debug!("gateway wait elapsed run_id={}", handle.run_id());
                handle.state()
            }
        }
    }

    /// Inicia un run y responde cuando se asienta (o vence la espera).
    pub async fn start(&self, req: StartRequest) -> Result<StartResponse, FlowError> {
        let handle = self.engine.start(&req.pipeline_id, req.input)?;
        let state = self.settle(&handle).await;
        Ok(StartResponse { run_id: handle.run_id(),
                           status: state.status })
    }

    pub async fn resume(&self, req: ResumeRequest) -> Result<ResumeResponse, FlowError> {
        let state = self.engine.state(req.run_id).await?;
        match state.status {
            RunStatus::Suspended => {}
            RunStatus::Pending | RunStatus::Running => return Err(FlowError::ConcurrentResume(req.run_id)),
            status => {
                return Err(FlowError::InvalidState { run_id: req.run_id,
                                                     status })
            }
        }
        let def = self.engine.pipeline(&state.pipeline_id)?;
        let schema = def.step(state.current_step_index).and_then(|s| s.resume_schema());
        validate_optional(schema, "resume payload", &req.resume_payload)?;

        let handle = self.engine.resume(req.run_id, req.resume_payload).await?;
        let settled = self.settle(&handle).await;
        Ok(ResumeResponse::from(&settled))
    }

    pub fn provide_tool_result(&self, req: ToolResultRequest) -> Result<ToolResultResponse, FlowError> {
        self.engine.broker().provide_result(req.invocation_id, req.result)?;
        Ok(ToolResultResponse { status: "resolved".to_string() })
    }

    pub fn reject_tool_call(&self, invocation_id: Uuid, reason: &str) -> Result<ToolResultResponse, FlowError> {
        self.engine.broker().reject(invocation_id, reason)?;
        Ok(ToolResultResponse { status: "rejected".to_string() })
    }

    pub async fn cancel(&self, run_id: Uuid) -> Result<RunStatus, FlowError> {
        self.engine.cancel(run_id).await
    }
}
