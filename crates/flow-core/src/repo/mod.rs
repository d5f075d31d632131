//! Definiciones de pipeline y registro `pipelineId -> definición`.
pub mod definition;
pub mod registry;

pub use definition::{PipelineDefinition, StepSpec};
pub use registry::PipelineRegistry;
