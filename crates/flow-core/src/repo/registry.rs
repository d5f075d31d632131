use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use super::PipelineDefinition;
use crate::errors::FlowError;

/// Registro concurrente de definiciones. Re-registrar un id reemplaza la
/// definición; los runs suspendidos contra la anterior fallarán el resume
/// con `DefinitionChanged`.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: DashMap<String, Arc<PipelineDefinition>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: PipelineDefinition) -> Arc<PipelineDefinition> {
        let def = Arc::new(definition);
        info!("pipeline registered id={} steps={} hash={}", def.id(), def.len(), def.definition_hash());
        self.pipelines.insert(def.id().to_string(), def.clone());
        def
    }

    pub fn get(&self, pipeline_id: &str) -> Result<Arc<PipelineDefinition>, FlowError> {
        self.pipelines
            .get(pipeline_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| FlowError::UnknownPipeline(pipeline_id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pipelines.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
