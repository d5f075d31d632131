//! Errores del core.
//!
//! `FlowError` es serializable porque un run `Failed` lo guarda dentro de su
//! `RunState` (y por lo tanto viaja al Suspension Store y a los eventos).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::RunStatus;
use crate::broker::InvocationStatus;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum FlowError {
    #[error("schema validation failed for {what}: {details}")] SchemaValidation { what: String, details: String },
    #[error("unknown run {0}")] UnknownRun(Uuid),
    #[error("unknown invocation {0}")] UnknownInvocation(Uuid),
    #[error("unknown pipeline '{0}'")] UnknownPipeline(String),
    #[error("unknown tool '{0}'")] UnknownTool(String),
    #[error("unknown or closed scope {0}")] UnknownScope(Uuid),
    #[error("run {0} is already being resumed")] ConcurrentResume(Uuid),
    #[error("run {run_id} is {status:?}, expected Suspended")] InvalidState { run_id: Uuid, status: RunStatus },
    #[error("invocation {invocation_id} is {status:?}")] InvalidInvocationState { invocation_id: Uuid, status: InvocationStatus },
    #[error("invocation {invocation_id} rejected: {reason}")] InvocationRejected { invocation_id: Uuid, reason: String },
    #[error("step '{step_id}' failed: {cause}")] StepExecution { step_id: String, cause: String },
    #[error("suspension store failure: {0}")] Durability(String),
    #[error("run {0} exceeded the suspension retention period")] RunExpired(Uuid),
    #[error("pipeline '{0}' changed since the run was started")] DefinitionChanged(String),
    #[error("invalid pipeline definition: {0}")] InvalidDefinition(String),
    #[error("internal: {0}")] Internal(String),
}

impl FlowError {
    pub fn schema(what: impl Into<String>, details: impl Into<String>) -> Self {
        Self::SchemaValidation { what: what.into(),
                                 details: details.into() }
    }

    pub fn step(step_id: impl Into<String>, cause: impl ToString) -> Self {
        Self::StepExecution { step_id: step_id.into(),
                              cause: cause.to_string() }
    }

    /// Ningún error del protocolo se reintenta automáticamente; solo los
    /// fallos de durabilidad pueden repetirse (y eso lo decide el store).
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Clasificación gruesa usada para elegir nivel de log y canal de reporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Payload externo mal formado o definición inválida.
    Validation,
    /// Mal uso del protocolo por parte del cliente.
    Protocol,
    /// Identificador inexistente.
    NotFound,
    /// Lógica interna de un step (o del motor).
    Runtime,
    /// Escritura/lectura del Suspension Store.
    Durability,
}

pub fn classify_error(e: &FlowError) -> ErrorClass {
    match e {
        FlowError::SchemaValidation { .. } | FlowError::InvalidDefinition(_) => ErrorClass::Validation,
        FlowError::ConcurrentResume(_)
        | FlowError::InvalidState { .. }
        | FlowError::InvalidInvocationState { .. }
        | FlowError::InvocationRejected { .. }
        | FlowError::DefinitionChanged(_)
        | FlowError::RunExpired(_) => ErrorClass::Protocol,
        FlowError::UnknownRun(_)
        | FlowError::UnknownInvocation(_)
        | FlowError::UnknownPipeline(_)
        | FlowError::UnknownTool(_)
        | FlowError::UnknownScope(_) => ErrorClass::NotFound,
        FlowError::StepExecution { .. } | FlowError::Internal(_) => ErrorClass::Runtime,
        FlowError::Durability(_) => ErrorClass::Durability,
    }
}
