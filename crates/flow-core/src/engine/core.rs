//! Core PipelineEngine implementation
//!
//! Cada run tiene su propio lane (una tarea tokio) que ejecuta los steps en
//! serie. El lane es dueño exclusivo del `RunState` mientras el run está
//! `Running`; al suspender, el estado pasa al `SuspensionStore` y el lane
//! termina. Un resume reclama el registro (`claim`) y abre un lane nuevo que
//! re-invoca el step en `current_step_index`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::BoxStream;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;

use super::{EngineConfig, RunHandle};
use crate::broker::ToolCallBroker;
use crate::constants::*;
use crate::errors::{classify_error, ErrorClass, FlowError};
use crate::event::{EventFrame, EventMultiplexer};
use crate::model::{RunState, RunStatus, StepResult};
use crate::repo::{PipelineDefinition, PipelineRegistry};
use crate::schema::validate_optional;
use crate::step::StepContext;
use crate::store::SuspensionStore;

/// Estado en memoria de un run conocido por este proceso.
struct RunSlot {
    state: watch::Sender<RunState>,
    cancelled: Arc<AtomicBool>,
}

pub(crate) struct EngineInner {
    pub(crate) registry: PipelineRegistry,
    pub(crate) store: Arc<dyn SuspensionStore>,
    pub(crate) mux: EventMultiplexer,
    pub(crate) broker: ToolCallBroker,
    pub(crate) config: EngineConfig,
    runs: DashMap<Uuid, RunSlot>,
}

/// Motor de ejecución de pipelines suspendibles.
///
/// Clonable: todas las copias comparten registro, store, multiplexer y broker.
#[derive(Clone)]
pub struct PipelineEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
         .field("pipelines", &self.inner.registry.ids())
         .field("runs", &self.inner.runs.len())
         .field("config", &self.inner.config)
         .finish()
    }
}

impl PipelineEngine {
    pub(crate) fn from_parts(registry: PipelineRegistry,
                             store: Arc<dyn SuspensionStore>,
                             mux: EventMultiplexer,
                             broker: ToolCallBroker,
                             config: EngineConfig)
                             -> Self {
        Self { inner: Arc::new(EngineInner { registry,
                                             store,
                                             mux,
                                             broker,
                                             config,
                                             runs: DashMap::new() }) }
    }

    pub fn register(&self, definition: PipelineDefinition) -> Arc<PipelineDefinition> {
        self.inner.registry.register(definition)
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Result<Arc<PipelineDefinition>, FlowError> {
        self.inner.registry.get(pipeline_id)
    }

    pub fn pipeline_ids(&self) -> Vec<String> {
        self.inner.registry.ids()
    }

    pub fn broker(&self) -> &ToolCallBroker {
        &self.inner.broker
    }

    pub fn multiplexer(&self) -> &EventMultiplexer {
        &self.inner.mux
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn SuspensionStore> {
        &self.inner.store
    }

    /// Inicia un run. La entrada se valida contra el schema del primer step
    /// antes de crear nada.
    pub fn start(&self, pipeline_id: &str, input: Value) -> Result<RunHandle, FlowError> {
        let def = self.inner.registry.get(pipeline_id)?;
        let first = def.step(0)
                       .ok_or_else(|| FlowError::InvalidDefinition(format!("pipeline '{pipeline_id}' has no steps")))?;
        validate_optional(first.input_schema(), "pipeline input", &input)?;

        let mut state = RunState::new(pipeline_id, def.definition_hash(), first.id(), input.clone());
        let run_id = state.run_id;
        self.inner.mux.open_root(run_id, 0)?;
        self.emit(run_id, KIND_RUN_STARTED, json!({ "pipelineId": pipeline_id, "input": input }));
        state.mark_running()?;

        let (tx, rx) = watch::channel(state.clone());
        let cancelled = Arc::new(AtomicBool::new(false));
        self.inner.runs.insert(run_id,
                               RunSlot { state: tx,
                                         cancelled: cancelled.clone() });
        info!("run started run_id={run_id} pipeline={pipeline_id}");
        self.spawn_lane(def, state, None, cancelled);
        Ok(RunHandle::new(run_id, rx, self.inner.mux.clone()))
    }

    /// Reanuda un run suspendido re-invocando el step en `current_step_index`.
    ///
    /// A lo sumo un resume concurrente gana: el resto falla con
    /// `ConcurrentResume` (in-process vía el estado publicado, entre procesos
    /// vía `SuspensionStore::claim`).
    pub async fn resume(&self, run_id: Uuid, payload: Value) -> Result<RunHandle, FlowError> {
        self.check_local_status(run_id)?;
        let mut state = match self.inner.store.claim(run_id).await {
            Ok(s) => s,
            Err(e) => {
                if matches!(e, FlowError::ConcurrentResume(_)) {
                    warn!("concurrent resume refused run_id={run_id}");
                }
                return Err(e);
            }
        };

        if state.is_expired(self.inner.config.ttl_chrono(), Utc::now()) {
            info!("suspended run expired run_id={run_id}");
            self.inner.store.delete(run_id).await?;
            self.inner.runs.remove(&run_id);
            self.inner.broker.forget_root(run_id);
            self.inner.mux.release_root(run_id);
            return Err(FlowError::RunExpired(run_id));
        }

        let def = match self.definition_for(&state) {
            Ok(def) => def,
            Err(e) => {
                self.inner.store.release(run_id).await?;
                return Err(e);
            }
        };
        let resume_schema = def.step(state.current_step_index).and_then(|s| s.resume_schema());
        if let Err(e) = validate_optional(resume_schema, "resume payload", &payload) {
            self.inner.store.release(run_id).await?;
            return Err(e);
        }

        state.mark_running()?;
        self.inner.mux.open_root(run_id, state.event_sequence)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let rx = match self.inner.runs.get_mut(&run_id) {
            Some(mut slot) => {
                slot.cancelled = cancelled.clone();
                slot.state.send_replace(state.clone());
                slot.state.subscribe()
            }
            None => {
                let (tx, rx) = watch::channel(state.clone());
                self.inner.runs.insert(run_id,
                                       RunSlot { state: tx,
                                                 cancelled: cancelled.clone() });
                rx
            }
        };
        self.emit(run_id,
                  KIND_RESUMED,
                  json!({ "stepIndex": state.current_step_index, "resumeCount": state.resume_count }));
        info!("run resumed run_id={run_id} step_index={} resume_count={}",
              state.current_step_index,
              state.resume_count);
        self.spawn_lane(def, state, Some(payload), cancelled);
        Ok(RunHandle::new(run_id, rx, self.inner.mux.clone()))
    }

    fn check_local_status(&self, run_id: Uuid) -> Result<(), FlowError> {
        let Some(slot) = self.inner.runs.get(&run_id) else {
            return Ok(());
        };
        let status = slot.state.borrow().status;
        match status {
            RunStatus::Suspended => Ok(()),
            RunStatus::Pending | RunStatus::Running => {
                warn!("concurrent resume refused run_id={run_id}");
                Err(FlowError::ConcurrentResume(run_id))
            }
            _ => Err(FlowError::InvalidState { run_id, status }),
        }
    }

    fn definition_for(&self, state: &RunState) -> Result<Arc<PipelineDefinition>, FlowError> {
        let def = self.inner.registry.get(&state.pipeline_id)?;
        if def.definition_hash() != state.definition_hash {
            warn!("definition hash mismatch run_id={} pipeline={}", state.run_id, state.pipeline_id);
            return Err(FlowError::DefinitionChanged(state.pipeline_id.clone()));
        }
        Ok(def)
    }

    /// Cancela un run. Suspendido: se borra del store y se emite `cancelled`.
    /// En ejecución: cooperativo, el step actual termina y el engine no avanza;
    /// las invocaciones abiertas del run se rechazan para despertar al step
    /// que esté bloqueado en `await_result`.
    pub async fn cancel(&self, run_id: Uuid) -> Result<RunStatus, FlowError> {
        let local = self.inner
                        .runs
                        .get(&run_id)
                        .map(|slot| (slot.state.borrow().status, slot.cancelled.clone()));
        if let Some((status, cancelled)) = local {
            match status {
                RunStatus::Pending | RunStatus::Running => {
                    // primero la bandera: una invocación emitida después la ve
                    cancelled.store(true, Ordering::SeqCst);
                    let rejected = self.inner.broker.reject_all_in(run_id, CANCELLED_REASON);
                    info!("cancellation requested run_id={run_id} rejected_invocations={}", rejected.len());
                    return Ok(status);
                }
                RunStatus::Suspended => {}
                _ => return Err(FlowError::InvalidState { run_id, status }),
            }
        }

        let mut state = self.inner.store.claim(run_id).await?;
        state.cancel()?;
        self.inner.store.delete(run_id).await?;
        // el run puede venir de otro proceso: su scope raíz aún no existe aquí
        if !self.inner.mux.is_open(run_id) {
            self.inner.mux.open_root(run_id, state.event_sequence)?;
        }
        self.emit(run_id, KIND_CANCELLED, json!({ "stepIndex": state.current_step_index }));
        let _ = self.inner.mux.close_scope(run_id);
        self.publish(&state);
        self.schedule_release(run_id);
        info!("suspended run cancelled run_id={run_id}");
        Ok(state.status)
    }

    /// Estado actual: primero el publicado en memoria, luego el store.
    pub async fn state(&self, run_id: Uuid) -> Result<RunState, FlowError> {
        if let Some(slot) = self.inner.runs.get(&run_id) {
            return Ok(slot.state.borrow().clone());
        }
        self.inner.store.load(run_id).await
    }

    /// Handle de un run conocido por este proceso.
    pub fn handle(&self, run_id: Uuid) -> Result<RunHandle, FlowError> {
        let slot = self.inner.runs.get(&run_id).ok_or(FlowError::UnknownRun(run_id))?;
        Ok(RunHandle::new(run_id, slot.state.subscribe(), self.inner.mux.clone()))
    }

    pub async fn subscribe(&self, run_id: Uuid) -> Result<BoxStream<'static, EventFrame>, FlowError> {
        if !self.inner.runs.contains_key(&run_id) {
            // run suspendido por otro proceso: se abre su raíz con la secuencia guardada
            let state = self.inner.store.load(run_id).await?;
            self.inner.mux.open_root(run_id, state.event_sequence)?;
        }
        self.inner.mux.subscribe(run_id)
    }

    /// Borra los runs suspendidos más allá del TTL y devuelve sus ids.
    ///
    /// Cada candidato se reclama antes de borrarlo: un run que otro resume
    /// reclamó entretanto (o que volvió a suspenderse) se deja intacto.
    pub async fn purge_expired(&self) -> Result<Vec<Uuid>, FlowError> {
        let ttl = self.inner.config.ttl_chrono();
        let candidates = self.inner.store.list_expired(Utc::now() - ttl).await?;
        let mut purged = Vec::with_capacity(candidates.len());
        for run_id in candidates {
            let state = match self.inner.store.claim(run_id).await {
                Ok(state) => state,
                Err(FlowError::ConcurrentResume(_) | FlowError::UnknownRun(_) | FlowError::InvalidState { .. }) => {
                    debug!("purge skipped run_id={run_id}: claimed or gone");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !state.is_expired(ttl, Utc::now()) {
                self.inner.store.release(run_id).await?;
                continue;
            }
            self.inner.store.delete(run_id).await?;
            self.inner
                .runs
                .remove_if(&run_id, |_, slot| slot.state.borrow().status == RunStatus::Suspended);
            self.inner.broker.forget_root(run_id);
            self.inner.mux.release_root(run_id);
            info!("expired run purged run_id={run_id}");
            purged.push(run_id);
        }
        Ok(purged)
    }

    fn emit(&self, run_id: Uuid, kind: &str, data: Value) {
        if let Err(e) = self.inner.mux.emit(run_id, kind, data) {
            warn!("event not emitted run_id={run_id} kind={kind}: {e}");
        }
    }

    fn publish(&self, state: &RunState) {
        if let Some(slot) = self.inner.runs.get(&state.run_id) {
            slot.state.send_replace(state.clone());
        }
    }

    fn spawn_lane(&self, def: Arc<PipelineDefinition>, state: RunState, resume: Option<Value>, cancelled: Arc<AtomicBool>) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(def, state, resume, cancelled).await;
        });
    }

    /// Lane de ejecución: corre steps en serie hasta suspender o terminar.
    async fn drive(&self, def: Arc<PipelineDefinition>, mut state: RunState, mut resume: Option<Value>, cancelled: Arc<AtomicBool>) {
        let run_id = state.run_id;
        loop {
            let index = state.current_step_index;
            let Some(spec) = def.step(index).cloned() else {
                let err = FlowError::Internal(format!("step index {index} out of range"));
                self.finish_failed(&mut state, err).await;
                return;
            };
            if cancelled.load(Ordering::SeqCst) {
                self.finish_cancelled(&mut state).await;
                return;
            }

            let step_id = spec.id().to_string();
            let input = state.current_input(&step_id);
            let resume_data = resume.take();
            self.emit(run_id,
                      KIND_STEP_STARTED,
                      json!({ "stepId": step_id, "stepIndex": index, "resumed": resume_data.is_some() }));
            debug!("step started run_id={run_id} step={step_id} index={index}");

            let ctx = StepContext::new(run_id,
                                       def.id(),
                                       &step_id,
                                       index,
                                       input,
                                       resume_data,
                                       self.inner.mux.emitter(run_id),
                                       self.inner.broker.clone(),
                                       cancelled.clone());
            let step = spec.step().clone();
            let result = match tokio::spawn(async move { step.run(&ctx).await }).await {
                Ok(r) => r,
                Err(e) => StepResult::fail(format!("step task aborted: {e}")),
            };
            self.emit(run_id,
                      KIND_STEP_FINISHED,
                      json!({ "stepId": step_id, "stepIndex": index, "outcome": result.label() }));

            if cancelled.load(Ordering::SeqCst) {
                self.finish_cancelled(&mut state).await;
                return;
            }

            match result {
                StepResult::Continue(output) => {
                    if let Err(e) = validate_optional(spec.output_schema(), &format!("{step_id} output"), &output) {
                        self.finish_failed(&mut state, FlowError::step(&step_id, e)).await;
                        return;
                    }
                    let transition = match def.step(index + 1) {
                        Some(next) => state.advance(&step_id, output, next.id()),
                        None => state.complete(&step_id, output),
                    };
                    if let Err(e) = transition {
                        self.finish_failed(&mut state, e).await;
                        return;
                    }
                    self.publish(&state);
                    if state.status == RunStatus::Completed {
                        info!("run completed run_id={run_id}");
                        let output = state.terminal_output.clone().unwrap_or(Value::Null);
                        self.finish_terminal(&state, KIND_COMPLETED, json!({ "output": output }))
                            .await;
                        return;
                    }
                }
                StepResult::Suspend(payload) => {
                    if let Err(e) = validate_optional(spec.suspend_schema(), &format!("{step_id} suspend payload"), &payload) {
                        self.finish_failed(&mut state, FlowError::step(&step_id, e)).await;
                        return;
                    }
                    let mut suspended = state.clone();
                    if let Err(e) = suspended.suspend(payload.clone()) {
                        self.finish_failed(&mut state, e).await;
                        return;
                    }
                    // el frame `suspended` consume la secuencia actual
                    suspended.event_sequence = self.inner.mux.next_sequence(run_id).map(|s| s + 1).unwrap_or(0);
                    if let Err(e) = self.inner.store.save(&suspended).await {
                        error!("suspension not persisted run_id={run_id}: {e}");
                        let cause = match e {
                            FlowError::Durability(_) => e,
                            other => FlowError::Durability(other.to_string()),
                        };
                        self.finish_failed(&mut state, cause).await;
                        return;
                    }
                    self.publish(&suspended);
                    self.emit(run_id,
                              KIND_SUSPENDED,
                              json!({ "stepId": step_id, "stepIndex": index, "payload": payload }));
                    info!("run suspended run_id={run_id} step={step_id}");
                    return;
                }
                StepResult::Bail(output) => {
                    if let Err(e) = state.bail(output.clone()) {
                        self.finish_failed(&mut state, e).await;
                        return;
                    }
                    self.publish(&state);
                    info!("run bailed run_id={run_id} step={step_id}");
                    self.finish_terminal(&state,
                                         KIND_BAILED,
                                         json!({ "stepId": step_id, "output": output }))
                        .await;
                    return;
                }
                StepResult::Fail(cause) => {
                    self.finish_failed(&mut state, FlowError::step(&step_id, cause)).await;
                    return;
                }
            }
        }
    }

    async fn finish_failed(&self, state: &mut RunState, err: FlowError) {
        let run_id = state.run_id;
        match classify_error(&err) {
            ErrorClass::Runtime | ErrorClass::Durability => error!("run failed run_id={run_id}: {err}"),
            _ => warn!("run failed run_id={run_id}: {err}"),
        }
        if let Err(e) = state.fail(err.clone()) {
            error!("could not mark run failed run_id={run_id}: {e}");
            return;
        }
        self.publish(state);
        self.finish_terminal(state, KIND_FAILED, json!({ "error": err.to_string() }))
            .await;
    }

    async fn finish_cancelled(&self, state: &mut RunState) {
        if state.cancel().is_err() {
            return;
        }
        self.publish(state);
        info!("run cancelled run_id={}", state.run_id);
        self.finish_terminal(state, KIND_CANCELLED, json!({ "stepIndex": state.current_step_index }))
            .await;
    }

    /// Frame terminal, cierre del scope raíz y limpieza del store.
    async fn finish_terminal(&self, state: &RunState, kind: &str, data: Value) {
        let run_id = state.run_id;
        self.emit(run_id, kind, data);
        if let Err(e) = self.inner.mux.close_scope(run_id) {
            warn!("root scope not closed run_id={run_id}: {e}");
        }
        if state.resume_count > 0 {
            if let Err(e) = self.inner.store.delete(run_id).await {
                warn!("suspended record not deleted run_id={run_id}: {e}");
            }
        }
        self.schedule_release(run_id);
    }

    /// Libera el run terminal tras `terminal_retention`. Los handles y las
    /// suscripciones abiertas conservan lo último que vieron.
    fn schedule_release(&self, run_id: Uuid) {
        let retention = self.inner.config.terminal_retention;
        let inner: Weak<EngineInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if !retention.is_zero() {
                tokio::time::sleep(retention).await;
            }
            if let Some(inner) = inner.upgrade() {
                PipelineEngine { inner }.release_terminal(run_id);
            }
        });
    }

    fn release_terminal(&self, run_id: Uuid) {
        let removed = self.inner
                          .runs
                          .remove_if(&run_id, |_, slot| slot.state.borrow().status.is_terminal())
                          .is_some();
        self.inner.broker.forget_root(run_id);
        self.inner.mux.release_root(run_id);
        debug!("terminal run released run_id={run_id} tracked={removed}");
    }
}
