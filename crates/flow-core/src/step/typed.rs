use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::StepContext;
use crate::model::StepResult;
use crate::schema::schema_of;

/// Resultado tipado de ejecutar un `TypedStep`.
///
/// Permite trabajar con salidas fuertemente tipadas durante la implementación
/// de pasos y convertirlas a la representación neutra que el engine usa.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedStepResult<Out, Sus> {
    Continue(Out),
    Suspend(Sus),
    Bail(Value),
    Fail(String),
}

impl<Out: Serialize, Sus: Serialize> TypedStepResult<Out, Sus> {
    /// Convierte a `StepResult` neutro serializando el payload.
    pub fn into_neutral(self) -> StepResult {
        match self {
            TypedStepResult::Continue(out) => match serde_json::to_value(out) {
                Ok(v) => StepResult::Continue(v),
                Err(e) => StepResult::fail(format!("output encode: {e}")),
            },
            TypedStepResult::Suspend(payload) => match serde_json::to_value(payload) {
                Ok(v) => StepResult::Suspend(v),
                Err(e) => StepResult::fail(format!("suspend payload encode: {e}")),
            },
            TypedStepResult::Bail(v) => StepResult::Bail(v),
            TypedStepResult::Fail(cause) => StepResult::Fail(cause),
        }
    }
}

/// Interfaz de alto nivel para definir Steps con tipos fuertes
/// (Input / Output / payload de suspensión / payload de resume).
///
/// Los cuatro schemas se derivan de los tipos con `schemars`; un adaptador
/// (abajo) convierte esta ejecución a la interfaz neutra `StepDefinition`.
#[async_trait]
pub trait TypedStep: Send + Sync {
    type Input: DeserializeOwned + JsonSchema + Send;
    type Output: Serialize + JsonSchema + Send;
    type Suspend: Serialize + JsonSchema + Send;
    type Resume: DeserializeOwned + JsonSchema + Send;

    fn id(&self) -> &'static str;

    fn description(&self) -> &str {
        ""
    }

    /// Ejecución tipada. `resume` es `Some` sólo al reanudar.
    async fn run_typed(&self,
                       input: Self::Input,
                       resume: Option<Self::Resume>,
                       ctx: &StepContext)
                       -> TypedStepResult<Self::Output, Self::Suspend>;
}

// -------------------------------------------------------------
// Adaptador: cualquier `TypedStep` implementa `StepDefinition` neutro.
// -------------------------------------------------------------
#[async_trait]
impl<T> crate::step::StepDefinition for T where T: TypedStep + 'static
{
    fn id(&self) -> &str {
        <Self as TypedStep>::id(self)
    }

    fn description(&self) -> &str {
        <Self as TypedStep>::description(self)
    }

    fn input_schema(&self) -> Option<Value> {
        Some(schema_of::<T::Input>())
    }

    fn output_schema(&self) -> Option<Value> {
        Some(schema_of::<T::Output>())
    }

    fn suspend_schema(&self) -> Option<Value> {
        Some(schema_of::<T::Suspend>())
    }

    fn resume_schema(&self) -> Option<Value> {
        Some(schema_of::<T::Resume>())
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        let input: T::Input = match serde_json::from_value(ctx.input.clone()) {
            Ok(v) => v,
            Err(e) => return StepResult::fail(format!("input decode: {e}")),
        };
        let resume: Option<T::Resume> = match ctx.resume_data.clone().map(serde_json::from_value).transpose() {
            Ok(v) => v,
            Err(e) => return StepResult::fail(format!("resume decode: {e}")),
        };
        self.run_typed(input, resume, ctx).await.into_neutral()
    }
}
