//! Builder para `PipelineEngine`.
//!
//! ```ignore
//! let engine = PipelineEngine::builder(Arc::new(InMemorySuspensionStore::new()))
//!     .config(EngineConfig::default().with_suspended_ttl(Duration::from_secs(3600)))
//!     .pipeline(approval_workflow()?)
//!     .build();
//! ```
use std::sync::Arc;

use crate::broker::{ToolCallBroker, ToolRegistration};
use crate::engine::{EngineConfig, PipelineEngine};
use crate::errors::FlowError;
use crate::event::EventMultiplexer;
use crate::repo::{PipelineDefinition, PipelineRegistry};
use crate::store::{InMemorySuspensionStore, SuspensionStore};

pub struct EngineBuilder {
    store: Arc<dyn SuspensionStore>,
    config: EngineConfig,
    mux: EventMultiplexer,
    broker: Option<ToolCallBroker>,
    registry: PipelineRegistry,
    tools: Vec<ToolRegistration>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn SuspensionStore>) -> Self {
        Self { store,
               config: EngineConfig::default(),
               mux: EventMultiplexer::new(),
               broker: None,
               registry: PipelineRegistry::new(),
               tools: Vec::new() }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Comparte un multiplexer existente (el broker se crea sobre él).
    pub fn multiplexer(mut self, mux: EventMultiplexer) -> Self {
        self.mux = mux;
        self
    }

    /// Comparte un broker existente; su multiplexer pasa a ser el del engine.
    pub fn broker(mut self, broker: ToolCallBroker) -> Self {
        self.mux = broker.multiplexer().clone();
        self.broker = Some(broker);
        self
    }

    pub fn pipeline(self, definition: PipelineDefinition) -> Self {
        self.registry.register(definition);
        self
    }

    pub fn tool(mut self, registration: ToolRegistration) -> Self {
        self.tools.push(registration);
        self
    }

    pub fn build(self) -> Result<PipelineEngine, FlowError> {
        let broker = self.broker.unwrap_or_else(|| ToolCallBroker::new(self.mux.clone()));
        for tool in self.tools {
            broker.register_tool(tool)?;
        }
        Ok(PipelineEngine::from_parts(self.registry, self.store, self.mux, broker, self.config))
    }
}

impl PipelineEngine {
    #[inline]
    pub fn builder(store: Arc<dyn SuspensionStore>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    /// Engine con store en memoria y configuración por defecto.
    pub fn in_memory() -> Self {
        let mux = EventMultiplexer::new();
        let broker = ToolCallBroker::new(mux.clone());
        PipelineEngine::from_parts(PipelineRegistry::new(),
                                   Arc::new(InMemorySuspensionStore::new()),
                                   mux,
                                   broker,
                                   EngineConfig::default())
    }
}
