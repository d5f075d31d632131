//! Payloads tipados de los pipelines de este crate.
//!
//! Los schemas JSON de cada step se derivan de estos tipos (`schemars`); los
//! nombres de campo viajan en camelCase.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------- approval-workflow ----------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    /// Tipo de solicitud (p.ej. "expense", "vacation", "purchase").
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedRequest {
    pub request_id: String,
    pub summary: String,
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPrompt {
    pub message: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub approved: bool,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedRequest {
    pub status: String,
    pub request_id: String,
    pub message: String,
}

// ---------------- process-task ----------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskInput {
    pub task: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskOutput {
    pub result: String,
    pub status: String,
}

// ---------------- fulfil-order ----------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderInput {
    pub order_id: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageReport {
    pub stage: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderReport {
    pub order_id: String,
    /// Un reporte por etapa, en orden fijo (inventory, payment, shipping).
    pub stages: Vec<StageReport>,
}

// ---------------- generateTaskSteps / plan-review ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStepStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskStep {
    pub description: String,
    pub status: TaskStepStatus,
}

impl TaskStep {
    pub fn enabled(description: impl Into<String>) -> Self {
        Self { description: description.into(),
               status: TaskStepStatus::Enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == TaskStepStatus::Enabled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerateTaskStepsArgs {
    pub steps: Vec<TaskStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerateTaskStepsResult {
    pub accepted: bool,
    pub steps: Vec<TaskStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanInput {
    pub goal: String,
    pub steps: Vec<TaskStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovedPlan {
    pub goal: String,
    pub steps: Vec<TaskStep>,
}
