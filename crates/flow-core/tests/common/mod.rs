#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flow_core::{Pipe, PipelineDefinition, PipelineEngine, StepContext, TypedStep, TypedStepResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Num {
    pub n: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Prompt {
    pub message: String,
    pub n: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    pub approved: bool,
}

/// Step puro `n -> n + 1` que cuenta sus ejecuciones.
pub struct AddOne {
    pub id: &'static str,
    pub calls: Arc<AtomicUsize>,
}

impl AddOne {
    pub fn new(id: &'static str) -> Self {
        Self { id,
               calls: Arc::new(AtomicUsize::new(0)) }
    }
}

#[async_trait]
impl TypedStep for AddOne {
    type Input = Num;
    type Output = Num;
    type Suspend = ();
    type Resume = ();

    fn id(&self) -> &'static str {
        self.id
    }

    async fn run_typed(&self, input: Num, _resume: Option<()>, _ctx: &StepContext) -> TypedStepResult<Num, ()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TypedStepResult::Continue(Num { n: input.n + 1 })
    }
}

/// Step `n -> n * 2`.
pub struct Double;

#[async_trait]
impl TypedStep for Double {
    type Input = Num;
    type Output = Num;
    type Suspend = ();
    type Resume = ();

    fn id(&self) -> &'static str {
        "double"
    }

    async fn run_typed(&self, input: Num, _resume: Option<()>, _ctx: &StepContext) -> TypedStepResult<Num, ()> {
        TypedStepResult::Continue(Num { n: input.n * 2 })
    }
}

/// Suspende pidiendo aprobación; al reanudar continúa o hace bail.
pub struct Gate {
    pub calls: Arc<AtomicUsize>,
    pub seen_index: Arc<AtomicUsize>,
}

impl Gate {
    pub fn new() -> Self {
        Self { calls: Arc::new(AtomicUsize::new(0)),
               seen_index: Arc::new(AtomicUsize::new(usize::MAX)) }
    }
}

#[async_trait]
impl TypedStep for Gate {
    type Input = Num;
    type Output = Num;
    type Suspend = Prompt;
    type Resume = Decision;

    fn id(&self) -> &'static str {
        "gate"
    }

    async fn run_typed(&self, input: Num, resume: Option<Decision>, ctx: &StepContext) -> TypedStepResult<Num, Prompt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_index.store(ctx.step_index, Ordering::SeqCst);
        match resume {
            None => TypedStepResult::Suspend(Prompt { message: "approve?".into(),
                                                      n: input.n }),
            Some(d) if d.approved => TypedStepResult::Continue(input),
            Some(_) => TypedStepResult::Bail(json!({ "message": format!("rejected at {}", input.n) })),
        }
    }
}

pub struct Gated {
    pub definition: PipelineDefinition,
    pub first: Arc<AtomicUsize>,
    pub gate_calls: Arc<AtomicUsize>,
    pub gate_index: Arc<AtomicUsize>,
    pub last: Arc<AtomicUsize>,
}

/// `add-one -> gate -> add-two`
pub fn gated() -> Gated {
    let first = AddOne::new("add-one");
    let gate = Gate::new();
    let last = AddOne::new("add-two");
    let (f, g, i, l) = (first.calls.clone(), gate.calls.clone(), gate.seen_index.clone(), last.calls.clone());
    let definition = Pipe::new(first).then(gate)
                                     .then(last)
                                     .build("gated")
                                     .expect("valid pipeline");
    Gated { definition,
            first: f,
            gate_calls: g,
            gate_index: i,
            last: l }
}

pub fn engine_with(definition: PipelineDefinition) -> PipelineEngine {
    let engine = PipelineEngine::in_memory();
    engine.register(definition);
    engine
}
