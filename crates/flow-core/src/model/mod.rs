//! Modelos neutrales del motor: estado de un run, resultado de un step y el
//! merge usado al re-entrar un step con datos de resume.

pub mod merge;
pub mod run_state;
pub mod step_result;

pub use merge::merge_json;
pub use run_state::{RunState, RunStatus};
pub use step_result::StepResult;
