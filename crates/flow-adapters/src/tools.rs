//! Tool `generateTaskSteps` y su modelo de selección client-side.
//!
//! La tool no tiene ejecución del lado servidor: el resultado lo entrega el
//! cliente (vía broker) tras revisar los pasos propuestos.

use flow_core::{ArgsDraft, DraftPhase, ToolRegistration};

use crate::payloads::{GenerateTaskStepsArgs, GenerateTaskStepsResult, TaskStep, TaskStepStatus};

pub const GENERATE_TASK_STEPS: &str = "generateTaskSteps";

pub fn generate_task_steps_tool() -> ToolRegistration {
    ToolRegistration::typed::<GenerateTaskStepsArgs, GenerateTaskStepsResult>(
        GENERATE_TASK_STEPS,
        "Generates a list of steps for the user to review and approve before execution. The user can toggle steps on/off and then approve or reject the plan.",
    )
}

/// Selección de pasos que hace el usuario sobre los argumentos de una
/// invocación `generateTaskSteps`.
///
/// Mientras no haya interacción se muestran los argumentos tal como llegan
/// (streaming). El primer toggle copia la lista visible y a partir de ahí los
/// updates remotos se ignoran.
#[derive(Debug, Clone, Default)]
pub struct StepSelection {
    draft: ArgsDraft<Vec<TaskStep>>,
}

impl StepSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stream(&mut self, args: GenerateTaskStepsArgs) {
        self.draft.on_stream(args.steps);
    }

    pub fn on_final(&mut self, args: GenerateTaskStepsArgs) {
        self.draft.on_final(args.steps);
    }

    pub fn has_interacted(&self) -> bool {
        self.draft.phase() == DraftPhase::Edited
    }

    /// Lista visible. Índices fuera de rango se ignoran en `toggle`.
    pub fn steps(&self) -> &[TaskStep] {
        self.draft.current().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn enabled_count(&self) -> usize {
        self.steps().iter().filter(|s| s.is_enabled()).count()
    }

    pub fn toggle(&mut self, index: usize) {
        self.draft.edit(|steps| {
                      if let Some(step) = steps.get_mut(index) {
                          step.status = match step.status {
                              TaskStepStatus::Enabled => TaskStepStatus::Disabled,
                              TaskStepStatus::Disabled => TaskStepStatus::Enabled,
                          };
                      }
                  });
    }

    /// Acepta el plan conservando sólo los pasos habilitados.
    pub fn confirm(&self) -> GenerateTaskStepsResult {
        let steps = self.draft
                        .submit()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(TaskStep::is_enabled)
                        .collect();
        GenerateTaskStepsResult { accepted: true,
                                  steps }
    }

    pub fn reject(&self) -> GenerateTaskStepsResult {
        GenerateTaskStepsResult { accepted: false,
                                  steps: Vec::new() }
    }
}
