use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::schema_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvocationStatus {
    Issued,
    AwaitingResult,
    Resolved,
    Rejected,
}

impl InvocationStatus {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Issued | Self::AwaitingResult)
    }
}

/// Snapshot de una invocación. El broker es el único dueño del registro;
/// hacia afuera sólo circulan copias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub invocation_id: Uuid,
    pub tool_name: String,
    pub args: Value,
    pub status: InvocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Scope donde se anunciaron los frames de esta invocación.
    pub scope_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// Declaración de una tool resuelta externamente.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRegistration {
    pub name: String,
    pub description: String,
    pub args_schema: Option<Value>,
    pub result_schema: Option<Value>,
}

impl ToolRegistration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(),
               description: description.into(),
               args_schema: None,
               result_schema: None }
    }

    pub fn with_args_schema(mut self, schema: Value) -> Self {
        self.args_schema = Some(schema);
        self
    }

    pub fn with_result_schema(mut self, schema: Value) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Registra schemas derivados de los tipos de argumentos y resultado.
    pub fn typed<A: JsonSchema, R: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description).with_args_schema(schema_of::<A>())
                                    .with_result_schema(schema_of::<R>())
    }
}
