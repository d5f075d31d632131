//! `PipelineDefinition`: secuencia inmutable de steps con sus schemas
//! compilados, compartida por todos los runs del pipeline.
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::constants::ENGINE_VERSION;
use crate::errors::FlowError;
use crate::hashing::hash_value;
use crate::schema::{check_adjacent, CompiledSchema};
use crate::step::StepDefinition;

/// Un step junto a sus schemas ya compilados.
#[derive(Clone)]
pub struct StepSpec {
    step: Arc<dyn StepDefinition>,
    input: Option<CompiledSchema>,
    output: Option<CompiledSchema>,
    suspend: Option<CompiledSchema>,
    resume: Option<CompiledSchema>,
}

impl std::fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec").field("id", &self.id()).finish()
    }
}

fn compile(step_id: &str, which: &str, raw: Option<Value>) -> Result<Option<CompiledSchema>, FlowError> {
    raw.map(|r| {
           CompiledSchema::compile(r).map_err(|e| FlowError::InvalidDefinition(format!("step '{step_id}' {which} schema: {e}")))
       })
       .transpose()
}

impl StepSpec {
    fn new(step: Arc<dyn StepDefinition>) -> Result<Self, FlowError> {
        let id = step.id().to_string();
        Ok(Self { input: compile(&id, "input", step.input_schema())?,
                  output: compile(&id, "output", step.output_schema())?,
                  suspend: compile(&id, "suspend", step.suspend_schema())?,
                  resume: compile(&id, "resume", step.resume_schema())?,
                  step })
    }

    pub fn id(&self) -> &str {
        self.step.id()
    }

    pub fn step(&self) -> &Arc<dyn StepDefinition> {
        &self.step
    }

    pub fn input_schema(&self) -> Option<&CompiledSchema> {
        self.input.as_ref()
    }

    pub fn output_schema(&self) -> Option<&CompiledSchema> {
        self.output.as_ref()
    }

    pub fn suspend_schema(&self) -> Option<&CompiledSchema> {
        self.suspend.as_ref()
    }

    pub fn resume_schema(&self) -> Option<&CompiledSchema> {
        self.resume.as_ref()
    }

    fn describe(&self) -> Value {
        json!({
            "id": self.id(),
            "input": self.input.as_ref().map(CompiledSchema::raw),
            "output": self.output.as_ref().map(CompiledSchema::raw),
            "suspend": self.suspend.as_ref().map(CompiledSchema::raw),
            "resume": self.resume.as_ref().map(CompiledSchema::raw),
        })
    }
}

/// Definición inmutable del pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    id: String,
    steps: Vec<StepSpec>,
    definition_hash: String,
}

impl PipelineDefinition {
    /// Valida y construye la definición: no vacía, ids únicos, schemas que
    /// compilan y compatibilidad estructural entre steps adyacentes.
    pub fn new(id: &str, steps: Vec<Arc<dyn StepDefinition>>) -> Result<Self, FlowError> {
        if steps.is_empty() {
            return Err(FlowError::InvalidDefinition(format!("pipeline '{id}' has no steps")));
        }
        let mut seen = HashSet::new();
        for s in &steps {
            if !seen.insert(s.id().to_string()) {
                return Err(FlowError::InvalidDefinition(format!("duplicate step id '{}' in '{id}'", s.id())));
            }
        }
        let specs = steps.into_iter().map(StepSpec::new).collect::<Result<Vec<_>, _>>()?;
        for pair in specs.windows(2) {
            if let (Some(out), Some(inp)) = (pair[0].output_schema(), pair[1].input_schema()) {
                check_adjacent(pair[0].id(), out.raw(), pair[1].id(), inp.raw())?;
            }
        }
        let definition_hash = hash_value(&json!({
            "engine_version": ENGINE_VERSION,
            "pipeline": id,
            "steps": specs.iter().map(StepSpec::describe).collect::<Vec<_>>(),
        }));
        Ok(Self { id: id.to_string(),
                  steps: specs,
                  definition_hash })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition_hash(&self) -> &str {
        &self.definition_hash
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(StepSpec::id).collect()
    }
}
