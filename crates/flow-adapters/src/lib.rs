//! flow-adapters: pipelines y tools concretos sobre `flow-core`.
//!
//! Este crate provee:
//! - Payloads tipados (`payloads`) de los que se derivan los schemas.
//! - El workflow de aprobación `approval-workflow` (process → approve →
//!   finalize) con suspensión para intervención humana.
//! - La tool `generateTaskSteps` cuyo resultado lo provee el cliente, y el
//!   modelo de selección client-side `StepSelection`.
//! - Steps de ejemplo para progreso (`process-task`), productores anidados
//!   (`fulfil-order`) y revisión de planes (`plan-review`).

pub mod payloads;
pub mod pipelines;
pub mod steps;
pub mod tools;

pub use pipelines::{approval_workflow, fulfilment_pipeline, plan_review_pipeline, register_all, task_pipeline};
pub use tools::{generate_task_steps_tool, StepSelection, GENERATE_TASK_STEPS};
