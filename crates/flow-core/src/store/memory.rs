//! Implementación en memoria del Suspension Store (no durable entre procesos).
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::SuspensionStore;
use crate::errors::FlowError;
use crate::model::{RunState, RunStatus};

#[derive(Debug, Clone)]
struct StoredRun {
    state: RunState,
    claimed: bool,
}

#[derive(Debug, Default)]
pub struct InMemorySuspensionStore {
    runs: DashMap<Uuid, StoredRun>,
}

impl InMemorySuspensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[async_trait]
impl SuspensionStore for InMemorySuspensionStore {
    async fn save(&self, state: &RunState) -> Result<(), FlowError> {
        self.runs.insert(state.run_id,
                         StoredRun { state: state.clone(),
                                     claimed: false });
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<RunState, FlowError> {
        self.runs
            .get(&run_id)
            .map(|r| r.state.clone())
            .ok_or(FlowError::UnknownRun(run_id))
    }

    async fn delete(&self, run_id: Uuid) -> Result<(), FlowError> {
        self.runs.remove(&run_id);
        Ok(())
    }

    async fn claim(&self, run_id: Uuid) -> Result<RunState, FlowError> {
        // get_mut toma el lock exclusivo del shard: check + set son atómicos
        let mut entry = self.runs.get_mut(&run_id).ok_or(FlowError::UnknownRun(run_id))?;
        if entry.claimed {
            return Err(FlowError::ConcurrentResume(run_id));
        }
        if entry.state.status != RunStatus::Suspended {
            return Err(FlowError::InvalidState { run_id,
                                                 status: entry.state.status });
        }
        entry.claimed = true;
        Ok(entry.state.clone())
    }

    async fn release(&self, run_id: Uuid) -> Result<(), FlowError> {
        if let Some(mut entry) = self.runs.get_mut(&run_id) {
            entry.claimed = false;
        }
        Ok(())
    }

    async fn list_expired(&self, before: DateTime<Utc>) -> Result<Vec<Uuid>, FlowError> {
        Ok(self.runs
               .iter()
               .filter(|r| !r.claimed && r.state.suspended_at.is_some_and(|at| at < before))
               .map(|r| *r.key())
               .collect())
    }
}
