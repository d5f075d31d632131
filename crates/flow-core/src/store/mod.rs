//! Suspension Store: persistencia de `RunState` entre suspensión y resume.
//!
//! El contrato exige:
//! - `save` es atómico y durable antes de retornar (el engine no emite
//!   `suspended` hasta que `save` devolvió `Ok`).
//! - `claim` es un compare-and-set: a lo sumo un resume concurrente gana el
//!   registro de un run suspendido; el resto recibe `ConcurrentResume`.
//! - `load` de un run desconocido devuelve `UnknownRun`.
//!
//! Existen dos implementaciones: `InMemorySuspensionStore` (tests / demo) y
//! `PgSuspensionStore` en `flow-persistence`.
mod memory;

pub use memory::InMemorySuspensionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::FlowError;
use crate::model::RunState;

#[async_trait]
pub trait SuspensionStore: Send + Sync {
    /// Inserta o reemplaza el estado del run (y libera cualquier claim).
    async fn save(&self, state: &RunState) -> Result<(), FlowError>;

    async fn load(&self, run_id: Uuid) -> Result<RunState, FlowError>;

    /// Idempotente: borrar un run inexistente no es error.
    async fn delete(&self, run_id: Uuid) -> Result<(), FlowError>;

    /// Reclama un run suspendido para reanudarlo y devuelve su estado.
    async fn claim(&self, run_id: Uuid) -> Result<RunState, FlowError>;

    /// Devuelve un claim sin modificar el estado (resume abortado).
    async fn release(&self, run_id: Uuid) -> Result<(), FlowError>;

    /// Runs suspendidos antes de `before`.
    async fn list_expired(&self, before: DateTime<Utc>) -> Result<Vec<Uuid>, FlowError>;
}
