//! Multiplexer de frames con scope.
//!
//! Cada scope raíz (normalmente `scope_id == run_id`) tiene un log propio
//! protegido por un único mutex: asignar `sequence` y anexar el frame ocurren
//! en la misma sección crítica, así el orden interno de cada scope se preserva
//! aunque scopes hermanos emitan en paralelo. El multiplexer nunca interpreta
//! `kind` ni `data`.
//!
//! La suscripción es perezosa, recorre el log desde el principio y termina
//! cuando el scope raíz se cierra. No hay cursor de replay.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use log::debug;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use super::EventFrame;
use crate::constants::KIND_PROGRESS;
use crate::errors::FlowError;

#[derive(Debug)]
struct ScopeMeta {
    parent: Option<Uuid>,
    next_seq: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct RootLog {
    frames: Vec<EventFrame>,
    scopes: HashMap<Uuid, ScopeMeta>,
    closed: bool,
}

#[derive(Debug)]
struct RootChannel {
    log: Mutex<RootLog>,
    changed: watch::Sender<usize>,
}

impl RootChannel {
    fn new(root_id: Uuid, start_seq: u64) -> Self {
        let mut log = RootLog::default();
        log.scopes.insert(root_id, ScopeMeta { parent: None,
                                               next_seq: start_seq,
                                               closed: false });
        let (changed, _) = watch::channel(0);
        Self { log: Mutex::new(log),
               changed }
    }

    fn lock(&self) -> MutexGuard<'_, RootLog> {
        // el log sigue siendo consistente aunque un emisor haya hecho panic
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, len: usize) {
        self.changed.send_modify(|n| *n = len);
    }
}

#[derive(Debug, Default)]
struct Inner {
    roots: DashMap<Uuid, Arc<RootChannel>>,
    /// scope -> raíz a la que pertenece
    scope_root: DashMap<Uuid, Uuid>,
}

/// Handle clonable del multiplexer (todas las copias comparten estado).
#[derive(Debug, Clone, Default)]
pub struct EventMultiplexer {
    inner: Arc<Inner>,
}

impl EventMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn root_of(&self, scope_id: Uuid) -> Result<Arc<RootChannel>, FlowError> {
        let root_id = *self.inner
                           .scope_root
                           .get(&scope_id)
                           .ok_or(FlowError::UnknownScope(scope_id))?;
        self.inner
            .roots
            .get(&root_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(FlowError::UnknownScope(root_id))
    }

    /// Abre un scope. Sin padre crea una raíz nueva; con padre crea un hijo
    /// dentro de la raíz del padre (que debe existir y seguir abierto).
    pub fn open_scope(&self, parent: Option<Uuid>) -> Result<Uuid, FlowError> {
        let scope_id = Uuid::new_v4();
        match parent {
            None => {
                self.open_root(scope_id, 0)?;
            }
            Some(parent_id) => {
                let root = self.root_of(parent_id)?;
                let mut log = root.lock();
                match log.scopes.get(&parent_id) {
                    Some(meta) if !meta.closed => {}
                    _ => return Err(FlowError::UnknownScope(parent_id)),
                }
                log.scopes.insert(scope_id, ScopeMeta { parent: Some(parent_id),
                                                        next_seq: 0,
                                                        closed: false });
                let root_id = *self.inner
                                   .scope_root
                                   .get(&parent_id)
                                   .ok_or(FlowError::UnknownScope(parent_id))?;
                self.inner.scope_root.insert(scope_id, root_id);
            }
        }
        Ok(scope_id)
    }

    /// Abre (o reutiliza) una raíz con id explícito. `start_seq` permite que un
    /// run reanudado en otro proceso continúe la numeración de su scope raíz.
    pub fn open_root(&self, root_id: Uuid, start_seq: u64) -> Result<(), FlowError> {
        if let Some(existing) = self.inner.roots.get(&root_id) {
            if existing.lock().closed {
                return Err(FlowError::UnknownScope(root_id));
            }
            return Ok(());
        }
        self.inner
            .roots
            .entry(root_id)
            .or_insert_with(|| Arc::new(RootChannel::new(root_id, start_seq)));
        self.inner.scope_root.insert(root_id, root_id);
        debug!("scope root opened root={root_id} start_seq={start_seq}");
        Ok(())
    }

    pub fn emit(&self, scope_id: Uuid, kind: &str, data: Value) -> Result<EventFrame, FlowError> {
        let root = self.root_of(scope_id)?;
        let mut log = root.lock();
        let meta = match log.scopes.get_mut(&scope_id) {
            Some(meta) if !meta.closed => meta,
            _ => return Err(FlowError::UnknownScope(scope_id)),
        };
        let frame = EventFrame { scope_id,
                                 parent_scope_id: meta.parent,
                                 sequence: meta.next_seq,
                                 kind: kind.to_string(),
                                 data,
                                 ts: Utc::now() };
        meta.next_seq += 1;
        log.frames.push(frame.clone());
        let len = log.frames.len();
        drop(log);
        root.notify(len);
        Ok(frame)
    }

    /// Cierra un scope. Cerrar la raíz cierra todos sus scopes y termina las
    /// suscripciones (terminación natural, no cancelación).
    pub fn close_scope(&self, scope_id: Uuid) -> Result<(), FlowError> {
        let root = self.root_of(scope_id)?;
        let mut log = root.lock();
        let is_root = match log.scopes.get_mut(&scope_id) {
            Some(meta) => {
                meta.closed = true;
                meta.parent.is_none()
            }
            None => return Err(FlowError::UnknownScope(scope_id)),
        };
        if is_root {
            log.closed = true;
            for meta in log.scopes.values_mut() {
                meta.closed = true;
            }
        }
        let len = log.frames.len();
        drop(log);
        root.notify(len);
        Ok(())
    }

    /// Próximo `sequence` que recibirá el scope.
    pub fn next_sequence(&self, scope_id: Uuid) -> Result<u64, FlowError> {
        let root = self.root_of(scope_id)?;
        let log = root.lock();
        log.scopes
           .get(&scope_id)
           .map(|m| m.next_seq)
           .ok_or(FlowError::UnknownScope(scope_id))
    }

    /// Raíz a la que pertenece un scope (él mismo si es raíz).
    pub fn root_id(&self, scope_id: Uuid) -> Option<Uuid> {
        self.inner.scope_root.get(&scope_id).map(|r| *r.value())
    }

    pub fn is_open(&self, scope_id: Uuid) -> bool {
        self.root_of(scope_id)
            .map(|root| root.lock().scopes.get(&scope_id).is_some_and(|m| !m.closed))
            .unwrap_or(false)
    }

    /// Suscripción a todos los frames de una raíz (incluidos sus hijos).
    pub fn subscribe(&self, root_id: Uuid) -> Result<BoxStream<'static, EventFrame>, FlowError> {
        let root = self.inner
                       .roots
                       .get(&root_id)
                       .map(|r| Arc::clone(r.value()))
                       .ok_or(FlowError::UnknownScope(root_id))?;
        let rx = root.changed.subscribe();
        let s = stream::unfold((root, rx, 0usize), |(root, mut rx, cursor)| async move {
            loop {
                rx.borrow_and_update();
                {
                    let log = root.lock();
                    if let Some(frame) = log.frames.get(cursor) {
                        let frame = frame.clone();
                        drop(log);
                        return Some((frame, (root, rx, cursor + 1)));
                    }
                    if log.closed {
                        return None;
                    }
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        });
        Ok(s.boxed())
    }

    /// Libera el log de una raíz. Las suscripciones en curso conservan su
    /// propia referencia y terminan normalmente.
    pub fn release_root(&self, root_id: Uuid) {
        if let Some((_, root)) = self.inner.roots.remove(&root_id) {
            let scopes: Vec<Uuid> = root.lock().scopes.keys().copied().collect();
            for s in scopes {
                self.inner.scope_root.remove(&s);
            }
        }
    }

    pub fn emitter(&self, scope_id: Uuid) -> ScopedEmitter {
        ScopedEmitter { mux: self.clone(),
                        scope_id }
    }
}

/// Emisor ligado a un scope; es lo que reciben steps y tools.
#[derive(Debug, Clone)]
pub struct ScopedEmitter {
    mux: EventMultiplexer,
    scope_id: Uuid,
}

impl ScopedEmitter {
    pub fn scope_id(&self) -> Uuid {
        self.scope_id
    }

    pub fn emit(&self, kind: &str, data: Value) -> Result<EventFrame, FlowError> {
        self.mux.emit(self.scope_id, kind, data)
    }

    pub fn progress(&self, data: Value) -> Result<EventFrame, FlowError> {
        self.emit(KIND_PROGRESS, data)
    }

    /// Abre un scope hijo para un productor anidado (sub-agente, sub-pipeline).
    pub fn child(&self) -> Result<ScopedEmitter, FlowError> {
        let scope_id = self.mux.open_scope(Some(self.scope_id))?;
        Ok(self.mux.emitter(scope_id))
    }

    pub fn close(&self) -> Result<(), FlowError> {
        self.mux.close_scope(self.scope_id)
    }
}
