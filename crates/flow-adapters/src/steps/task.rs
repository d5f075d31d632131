//! `process-task`: trabajo simulado que reporta progreso en el scope del run.

use std::time::Duration;

use async_trait::async_trait;
use flow_core::{StepContext, TypedStep, TypedStepResult};
use serde_json::json;

use crate::payloads::{TaskInput, TaskOutput};

pub struct ProcessTask {
    work: Duration,
}

impl ProcessTask {
    /// `work` es la duración del trabajo simulado entre los dos frames de
    /// progreso.
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl Default for ProcessTask {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl TypedStep for ProcessTask {
    type Input = TaskInput;
    type Output = TaskOutput;
    type Suspend = ();
    type Resume = ();

    fn id(&self) -> &'static str {
        "process-task"
    }

    fn description(&self) -> &str {
        "Process a task with progress updates"
    }

    async fn run_typed(&self, input: TaskInput, _resume: Option<()>, ctx: &StepContext) -> TypedStepResult<TaskOutput, ()> {
        if let Err(e) = ctx.emitter().progress(json!({ "status": "in-progress", "message": "Gathering information..." })) {
            return TypedStepResult::Fail(e.to_string());
        }
        tokio::time::sleep(self.work).await;
        if ctx.is_cancelled() {
            return TypedStepResult::Fail("cancelled while processing".into());
        }
        let done = json!({ "status": "done", "message": format!("Successfully processed \"{}\"", input.task) });
        if let Err(e) = ctx.emitter().progress(done) {
            return TypedStepResult::Fail(e.to_string());
        }
        TypedStepResult::Continue(TaskOutput { result: format!("Task \"{}\" has been completed successfully!", input.task),
                                               status: "completed".into() })
    }
}
