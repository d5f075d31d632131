//! flow-core: pipelines suspendibles, broker de tool calls y multiplexer de
//! eventos con scope.
//!
//! Módulos:
//! - `engine`: ejecución de runs (start / resume / cancel / purge).
//! - `store`: contrato del Suspension Store + implementación en memoria.
//! - `event`: multiplexer de `EventFrame` por scope.
//! - `broker`: invocaciones de tools resueltas externamente.
//! - `gateway`: entrada externa serializable.
pub mod broker;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod event;
pub mod gateway;
pub mod hashing;
pub mod model;
pub mod repo;
pub mod schema;
pub mod step;
pub mod store;

pub use broker::{ArgsDraft, DraftPhase, InvocationStatus, ToolCallBroker, ToolInvocation, ToolRegistration};
pub use engine::{EngineBuilder, EngineConfig, PipelineEngine, RunHandle};
pub use errors::{classify_error, ErrorClass, FlowError};
pub use event::{EventFrame, EventMultiplexer, ScopedEmitter, SequenceGap, SequenceTracker};
pub use gateway::{FlowGateway, ResumeRequest, ResumeResponse, StartRequest, StartResponse, ToolResultRequest, ToolResultResponse};
pub use model::{RunState, RunStatus, StepResult};
pub use repo::{PipelineDefinition, PipelineRegistry, StepSpec};
pub use schema::{schema_of, CompiledSchema};
pub use step::{Pipe, SameAs, StepContext, StepDefinition, TypedStep, TypedStepResult};
pub use store::{InMemorySuspensionStore, SuspensionStore};
