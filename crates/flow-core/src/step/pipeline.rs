use std::marker::PhantomData;
use std::sync::Arc;

use super::{StepDefinition, TypedStep};
use crate::errors::FlowError;
use crate::repo::PipelineDefinition;

/// Marker trait to assert two types are the same at compile time.
/// Implemented only for identical types (T: SameAs<T> for all T).
pub trait SameAs<T> {}
impl<T> SameAs<T> for T {}

/// Typed pipeline builder that enforces at compile time that the next step's
/// input matches the previous step's output.
///
/// Usage:
///   let def = Pipe::new(ProcessRequest).then(RequestApproval).then(FinalizeRequest).build("approval-workflow")?;
pub struct Pipe<S: TypedStep + 'static> {
    steps: Vec<Arc<dyn StepDefinition>>,
    _out: PhantomData<fn() -> <S as TypedStep>::Output>,
}

impl<S: TypedStep + 'static> Pipe<S> {
    pub fn new(step: S) -> Self {
        Self { steps: vec![Arc::new(step)],
               _out: PhantomData }
    }

    /// Append a new step, enforcing N::Input == S::Output at compile time.
    pub fn then<N>(mut self, next: N) -> Pipe<N>
        where N: TypedStep + 'static,
              <N as TypedStep>::Input: SameAs<<S as TypedStep>::Output>
    {
        self.steps.push(Arc::new(next));
        Pipe::<N> { steps: self.steps,
                    _out: PhantomData }
    }

    /// Build a PipelineDefinition. Runtime validation (schemas, unique ids)
    /// still runs; `then` only guarantees adjacency at the type level.
    pub fn build(self, pipeline_id: &str) -> Result<PipelineDefinition, FlowError> {
        PipelineDefinition::new(pipeline_id, self.steps)
    }
}
