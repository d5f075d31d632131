//! Estado de un run (`RunState`) y su máquina de estados.
//!
//! Transiciones válidas:
//! - `Pending` -> `Running`
//! - `Running` -> `Running` (avanza el cursor)
//! - `Running` -> `Suspended` | `Completed` | `Bailed` | `Failed` | `Cancelled`
//! - `Suspended` -> `Running` (resume) | `Cancelled`
//!
//! Los estados terminales son inmutables: cualquier transición posterior
//! devuelve `InvalidState`.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Pending,
    Running,
    Suspended,
    Bailed,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Bailed | Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// `Suspended` o terminal: el run no avanza sin intervención externa.
    pub fn is_settled(self) -> bool {
        self == Self::Suspended || self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Bailed => "bailed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn can_become(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Running | Suspended | Completed | Bailed | Failed | Cancelled) => true,
            (Suspended, Running | Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub definition_hash: String,
    pub current_step_index: usize,
    /// Entrada con la que se invocó (o se re-invocará) cada step, en orden.
    pub step_inputs: IndexMap<String, Value>,
    pub step_outputs: IndexMap<String, Value>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FlowError>,
    pub resume_count: u32,
    /// Próximo `sequence` del scope raíz (sobrevive a reinicios del proceso).
    pub event_sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(pipeline_id: &str, definition_hash: &str, first_step_id: &str, input: Value) -> Self {
        let now = Utc::now();
        let mut step_inputs = IndexMap::new();
        step_inputs.insert(first_step_id.to_string(), input);
        Self { run_id: Uuid::new_v4(),
               pipeline_id: pipeline_id.to_string(),
               definition_hash: definition_hash.to_string(),
               current_step_index: 0,
               step_inputs,
               step_outputs: IndexMap::new(),
               status: RunStatus::Pending,
               suspended_payload: None,
               terminal_output: None,
               error: None,
               resume_count: 0,
               event_sequence: 0,
               created_at: now,
               updated_at: now,
               suspended_at: None }
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), FlowError> {
        if !self.status.can_become(next) {
            return Err(FlowError::InvalidState { run_id: self.run_id,
                                                 status: self.status });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `Pending`/`Suspended` -> `Running`. Al venir de `Suspended` el payload
    /// de suspensión se consume y se cuenta el resume.
    pub fn mark_running(&mut self) -> Result<(), FlowError> {
        let was_suspended = self.status == RunStatus::Suspended;
        self.transition(RunStatus::Running)?;
        if was_suspended {
            self.suspended_payload = None;
            self.suspended_at = None;
            self.resume_count += 1;
        }
        Ok(())
    }

    /// Registra la salida del step actual y mueve el cursor al siguiente.
    pub fn advance(&mut self, step_id: &str, output: Value, next_step_id: &str) -> Result<(), FlowError> {
        self.transition(RunStatus::Running)?;
        self.step_outputs.insert(step_id.to_string(), output.clone());
        self.current_step_index += 1;
        self.step_inputs.insert(next_step_id.to_string(), output);
        Ok(())
    }

    pub fn complete(&mut self, step_id: &str, output: Value) -> Result<(), FlowError> {
        self.transition(RunStatus::Completed)?;
        self.step_outputs.insert(step_id.to_string(), output.clone());
        self.terminal_output = Some(output);
        Ok(())
    }

    pub fn suspend(&mut self, payload: Value) -> Result<(), FlowError> {
        self.transition(RunStatus::Suspended)?;
        self.suspended_payload = Some(payload);
        self.suspended_at = Some(self.updated_at);
        Ok(())
    }

    pub fn bail(&mut self, output: Value) -> Result<(), FlowError> {
        self.transition(RunStatus::Bailed)?;
        self.terminal_output = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, error: FlowError) -> Result<(), FlowError> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), FlowError> {
        self.transition(RunStatus::Cancelled)?;
        self.suspended_payload = None;
        Ok(())
    }

    /// Entrada registrada del step en el cursor actual.
    pub fn current_input(&self, step_id: &str) -> Value {
        self.step_inputs.get(step_id).cloned().unwrap_or(Value::Null)
    }

    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        match (self.status, self.suspended_at) {
            (RunStatus::Suspended, Some(at)) => at + ttl < now,
            _ => false,
        }
    }
}
