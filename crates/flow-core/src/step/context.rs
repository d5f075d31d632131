use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::broker::ToolCallBroker;
use crate::constants::CANCELLED_REASON;
use crate::errors::FlowError;
use crate::event::ScopedEmitter;
use crate::model::merge_json;

/// Contexto de ejecución de un step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub step_id: String,
    pub step_index: usize,
    /// Entrada previa del step (salida del anterior o input inicial).
    pub input: Value,
    /// Sólo presente en la re-entrada posterior a un resume.
    pub resume_data: Option<Value>,
    emitter: ScopedEmitter,
    broker: ToolCallBroker,
    cancelled: Arc<AtomicBool>,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(run_id: Uuid,
               pipeline_id: &str,
               step_id: &str,
               step_index: usize,
               input: Value,
               resume_data: Option<Value>,
               emitter: ScopedEmitter,
               broker: ToolCallBroker,
               cancelled: Arc<AtomicBool>)
               -> Self {
        Self { run_id,
               pipeline_id: pipeline_id.to_string(),
               step_id: step_id.to_string(),
               step_index,
               input,
               resume_data,
               emitter,
               broker,
               cancelled }
    }

    /// Entrada con las claves del resume superpuestas (merge superficial).
    pub fn merged_input(&self) -> Value {
        match &self.resume_data {
            Some(resume) => merge_json(&self.input, resume),
            None => self.input.clone(),
        }
    }

    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, FlowError> {
        serde_json::from_value(self.input.clone()).map_err(|e| FlowError::step(&self.step_id, format!("input decode: {e}")))
    }

    pub fn resume_as<T: DeserializeOwned>(&self) -> Result<Option<T>, FlowError> {
        self.resume_data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| FlowError::step(&self.step_id, format!("resume decode: {e}")))
    }

    pub fn is_resume(&self) -> bool {
        self.resume_data.is_some()
    }

    /// Emisor ligado al scope raíz del run.
    pub fn emitter(&self) -> &ScopedEmitter {
        &self.emitter
    }

    pub fn broker(&self) -> &ToolCallBroker {
        &self.broker
    }

    /// Emite una invocación en el scope del run. Si el run se canceló mientras
    /// tanto la invocación nace rechazada y `await_result` no bloquea.
    pub fn issue_tool(&self, tool_name: &str, args: Value) -> Result<Uuid, FlowError> {
        let invocation_id = self.broker.issue_in(self.emitter.scope_id(), tool_name, args)?;
        if self.is_cancelled() {
            let _ = self.broker.reject(invocation_id, CANCELLED_REASON);
        }
        Ok(invocation_id)
    }

    /// Cancelación cooperativa: el step decide cuándo abandonar su trabajo.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
