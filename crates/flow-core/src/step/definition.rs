use async_trait::async_trait;
use serde_json::Value;

use super::StepContext;
use crate::model::StepResult;

/// Trait que define un Step.
///
/// Los schemas son opcionales; los que se declaran se compilan y verifican al
/// construir el `PipelineDefinition`, no en cada llamada.
#[async_trait]
pub trait StepDefinition: Send + Sync {
    /// Identificador estable y único dentro del pipeline.
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Option<Value> {
        None
    }

    fn output_schema(&self) -> Option<Value> {
        None
    }

    fn suspend_schema(&self) -> Option<Value> {
        None
    }

    fn resume_schema(&self) -> Option<Value> {
        None
    }

    /// Ejecuta el step. Al reanudar un run se invoca de nuevo el MISMO step
    /// con `ctx.resume_data` presente; efectos previos al punto de
    /// suspensión deben ser idempotentes.
    async fn run(&self, ctx: &StepContext) -> StepResult;
}
