use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resultado de ejecutar un step: el único contrato que el engine interpreta
/// para mover la máquina de estados del run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum StepResult {
    /// Salida normal; pasa a ser la entrada del siguiente step.
    Continue(Value),
    /// Pausa el run hasta que llegue un resume externo.
    Suspend(Value),
    /// Termina el pipeline antes de tiempo con un resultado normal (no error).
    Bail(Value),
    /// Error de la lógica interna del step.
    Fail(String),
}

impl StepResult {
    pub fn fail(cause: impl ToString) -> Self {
        Self::Fail(cause.to_string())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Continue(_) => "continue",
            Self::Suspend(_) => "suspend",
            Self::Bail(_) => "bail",
            Self::Fail(_) => "fail",
        }
    }
}
