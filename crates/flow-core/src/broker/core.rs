use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{InvocationStatus, ToolInvocation, ToolRegistration};
use crate::constants::{KIND_TOOL_CALL_ARGS, KIND_TOOL_CALL_ISSUED, KIND_TOOL_CALL_REJECTED, KIND_TOOL_CALL_RESULT};
use crate::errors::FlowError;
use crate::event::EventMultiplexer;
use crate::schema::{validate_optional, CompiledSchema};

type Outcome = Result<Value, FlowError>;

struct RegisteredTool {
    registration: ToolRegistration,
    args: Option<CompiledSchema>,
    result: Option<CompiledSchema>,
}

struct CallSlot {
    invocation: ToolInvocation,
    /// El scope lo abrió el broker (y lo cierra al terminar la invocación).
    owns_scope: bool,
    tx: Option<oneshot::Sender<Outcome>>,
    rx: Option<oneshot::Receiver<Outcome>>,
}

struct BrokerInner {
    tools: DashMap<String, RegisteredTool>,
    calls: DashMap<Uuid, CallSlot>,
    mux: EventMultiplexer,
}

/// Broker compartido (clonable) de invocaciones resueltas externamente.
#[derive(Clone)]
pub struct ToolCallBroker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for ToolCallBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallBroker")
         .field("tools", &self.inner.tools.len())
         .field("calls", &self.inner.calls.len())
         .finish()
    }
}

impl ToolCallBroker {
    pub fn new(mux: EventMultiplexer) -> Self {
        Self { inner: Arc::new(BrokerInner { tools: DashMap::new(),
                                             calls: DashMap::new(),
                                             mux }) }
    }

    pub fn multiplexer(&self) -> &EventMultiplexer {
        &self.inner.mux
    }

    pub fn register_tool(&self, registration: ToolRegistration) -> Result<(), FlowError> {
        let args = registration.args_schema.clone().map(CompiledSchema::compile).transpose()?;
        let result = registration.result_schema.clone().map(CompiledSchema::compile).transpose()?;
        debug!("tool registered name={}", registration.name);
        self.inner.tools.insert(registration.name.clone(),
                                RegisteredTool { registration,
                                                 args,
                                                 result });
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<ToolRegistration> {
        self.inner.tools.get(name).map(|t| t.registration.clone())
    }

    /// Emite la invocación en un scope raíz propio cuyo id coincide con el
    /// `invocation_id` (los clientes pueden suscribirse a él directamente).
    pub fn issue(&self, tool_name: &str, args: Value) -> Result<Uuid, FlowError> {
        let invocation_id = Uuid::new_v4();
        self.validate_args(tool_name, &args)?;
        self.inner.mux.open_root(invocation_id, 0)?;
        self.insert(invocation_id, tool_name, args, invocation_id, true)
    }

    /// Emite la invocación dentro de un scope existente (p.ej. el de un run).
    pub fn issue_in(&self, scope_id: Uuid, tool_name: &str, args: Value) -> Result<Uuid, FlowError> {
        self.issue_with_id(Uuid::new_v4(), scope_id, tool_name, args)
    }

    /// Variante con id provisto por el llamador. Reutilizar un id existente
    /// falla con `InvalidInvocationState`.
    pub fn issue_with_id(&self, invocation_id: Uuid, scope_id: Uuid, tool_name: &str, args: Value) -> Result<Uuid, FlowError> {
        self.validate_args(tool_name, &args)?;
        self.insert(invocation_id, tool_name, args, scope_id, false)
    }

    fn validate_args(&self, tool_name: &str, args: &Value) -> Result<(), FlowError> {
        let tool = self.inner
                       .tools
                       .get(tool_name)
                       .ok_or_else(|| FlowError::UnknownTool(tool_name.to_string()))?;
        validate_optional(tool.args.as_ref(), &format!("{tool_name} args"), args)
    }

    fn insert(&self, invocation_id: Uuid, tool_name: &str, args: Value, scope_id: Uuid, owns_scope: bool) -> Result<Uuid, FlowError> {
        use dashmap::mapref::entry::Entry;
        let invocation = ToolInvocation { invocation_id,
                                          tool_name: tool_name.to_string(),
                                          args: args.clone(),
                                          status: InvocationStatus::Issued,
                                          result: None,
                                          rejection_reason: None,
                                          scope_id,
                                          issued_at: Utc::now() };
        match self.inner.calls.entry(invocation_id) {
            Entry::Occupied(existing) => {
                let status = existing.get().invocation.status;
                warn!("duplicate invocation id invocation_id={invocation_id} status={status:?}");
                return Err(FlowError::InvalidInvocationState { invocation_id,
                                                               status });
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(CallSlot { invocation,
                                       owns_scope,
                                       tx: Some(tx),
                                       rx: Some(rx) });
            }
        }
        self.inner.mux.emit(scope_id,
                            KIND_TOOL_CALL_ISSUED,
                            json!({ "invocationId": invocation_id, "toolName": tool_name, "args": args }))?;
        debug!("tool call issued invocation_id={invocation_id} tool={tool_name}");
        Ok(invocation_id)
    }

    /// Reemplaza los argumentos mientras la invocación sigue `Issued`
    /// (argumentos que llegan de forma incremental).
    pub fn update_args(&self, invocation_id: Uuid, args: Value) -> Result<(), FlowError> {
        let scope_id = {
            let mut slot = self.inner
                               .calls
                               .get_mut(&invocation_id)
                               .ok_or(FlowError::UnknownInvocation(invocation_id))?;
            if slot.invocation.status != InvocationStatus::Issued {
                return Err(FlowError::InvalidInvocationState { invocation_id,
                                                               status: slot.invocation.status });
            }
            self.validate_args(&slot.invocation.tool_name, &args)?;
            slot.invocation.args = args.clone();
            slot.invocation.scope_id
        };
        self.inner
            .mux
            .emit(scope_id, KIND_TOOL_CALL_ARGS, json!({ "invocationId": invocation_id, "args": args }))?;
        Ok(())
    }

    /// Espera (sin polling) el resultado de la invocación. Sólo puede haber
    /// un awaiter por invocación.
    pub async fn await_result(&self, invocation_id: Uuid) -> Result<Value, FlowError> {
        let rx = {
            let mut slot = self.inner
                               .calls
                               .get_mut(&invocation_id)
                               .ok_or(FlowError::UnknownInvocation(invocation_id))?;
            let Some(rx) = slot.rx.take() else {
                return Err(FlowError::InvalidInvocationState { invocation_id,
                                                               status: slot.invocation.status });
            };
            if slot.invocation.status == InvocationStatus::Issued {
                slot.invocation.status = InvocationStatus::AwaitingResult;
            }
            rx
        };
        let outcome = match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(FlowError::Internal(format!("invocation {invocation_id} dropped without result"))),
        };
        // una invocación suelta ya entregada no tiene más lectores: se libera
        let standalone = self.inner.calls.remove_if(&invocation_id, |_, slot| slot.owns_scope).is_some();
        if standalone {
            self.inner.mux.release_root(invocation_id);
        }
        outcome
    }

    /// Inyecta el resultado. La primera llamada gana; las siguientes fallan con
    /// `InvalidInvocationState` y no alteran el resultado guardado.
    pub fn provide_result(&self, invocation_id: Uuid, result: Value) -> Result<(), FlowError> {
        let (tx, scope_id, owns_scope) = {
            let mut slot = self.inner
                               .calls
                               .get_mut(&invocation_id)
                               .ok_or(FlowError::UnknownInvocation(invocation_id))?;
            let status = slot.invocation.status;
            if !status.is_open() {
                warn!("result for settled invocation invocation_id={invocation_id} status={status:?}");
                return Err(FlowError::InvalidInvocationState { invocation_id,
                                                               status });
            }
            if let Some(tool) = self.inner.tools.get(&slot.invocation.tool_name) {
                validate_optional(tool.result.as_ref(), &format!("{} result", slot.invocation.tool_name), &result)?;
            }
            slot.invocation.status = InvocationStatus::Resolved;
            slot.invocation.result = Some(result.clone());
            (slot.tx.take(), slot.invocation.scope_id, slot.owns_scope)
        };
        if let Some(tx) = tx {
            // nadie esperando todavía: el valor queda en el canal para el awaiter
            let _ = tx.send(Ok(result.clone()));
        }
        self.announce(scope_id,
                      owns_scope,
                      KIND_TOOL_CALL_RESULT,
                      json!({ "invocationId": invocation_id, "result": result }));
        debug!("tool call resolved invocation_id={invocation_id}");
        Ok(())
    }

    /// Rechaza la invocación; el awaiter recibe `InvocationRejected`.
    pub fn reject(&self, invocation_id: Uuid, reason: impl Into<String>) -> Result<(), FlowError> {
        let reason = reason.into();
        let (tx, scope_id, owns_scope) = {
            let mut slot = self.inner
                               .calls
                               .get_mut(&invocation_id)
                               .ok_or(FlowError::UnknownInvocation(invocation_id))?;
            let status = slot.invocation.status;
            if !status.is_open() {
                return Err(FlowError::InvalidInvocationState { invocation_id,
                                                               status });
            }
            slot.invocation.status = InvocationStatus::Rejected;
            slot.invocation.rejection_reason = Some(reason.clone());
            (slot.tx.take(), slot.invocation.scope_id, slot.owns_scope)
        };
        if let Some(tx) = tx {
            let _ = tx.send(Err(FlowError::InvocationRejected { invocation_id,
                                                                reason: reason.clone() }));
        }
        self.announce(scope_id,
                      owns_scope,
                      KIND_TOOL_CALL_REJECTED,
                      json!({ "invocationId": invocation_id, "reason": reason }));
        Ok(())
    }

    fn announce(&self, scope_id: Uuid, owns_scope: bool, kind: &str, data: Value) {
        // el scope de un run puede haberse cerrado (run cancelado); el
        // resultado ya quedó registrado igualmente
        if let Err(e) = self.inner.mux.emit(scope_id, kind, data) {
            warn!("could not announce {kind} scope={scope_id}: {e}");
        }
        if owns_scope {
            let _ = self.inner.mux.close_scope(scope_id);
        }
    }

    pub fn invocation(&self, invocation_id: Uuid) -> Result<ToolInvocation, FlowError> {
        self.inner
            .calls
            .get(&invocation_id)
            .map(|s| s.invocation.clone())
            .ok_or(FlowError::UnknownInvocation(invocation_id))
    }

    /// Ids de las invocaciones emitidas bajo la raíz `root_id` (en el scope
    /// raíz o en cualquiera de sus hijos).
    fn ids_in_root(&self, root_id: Uuid, open_only: bool) -> Vec<Uuid> {
        self.inner
            .calls
            .iter()
            .filter(|s| !open_only || s.invocation.status.is_open())
            .filter(|s| {
                let scope_id = s.invocation.scope_id;
                scope_id == root_id || self.inner.mux.root_id(scope_id) == Some(root_id)
            })
            .map(|s| s.invocation.invocation_id)
            .collect()
    }

    /// Rechaza todas las invocaciones abiertas bajo una raíz; los awaiters
    /// reciben `InvocationRejected`. Devuelve los ids rechazados.
    pub fn reject_all_in(&self, root_id: Uuid, reason: &str) -> Vec<Uuid> {
        let mut rejected = Vec::new();
        for invocation_id in self.ids_in_root(root_id, true) {
            // otra llamada pudo resolverla entre el filtro y aquí
            if self.reject(invocation_id, reason).is_ok() {
                rejected.push(invocation_id);
            }
        }
        if !rejected.is_empty() {
            debug!("open invocations rejected root={root_id} count={}", rejected.len());
        }
        rejected
    }

    /// Olvida las invocaciones de una raíz que ya terminó. Las que sigan
    /// abiertas se rechazan antes de borrarse.
    pub fn forget_root(&self, root_id: Uuid) {
        self.reject_all_in(root_id, "scope released");
        for invocation_id in self.ids_in_root(root_id, false) {
            self.inner.calls.remove(&invocation_id);
        }
    }

    /// Invocaciones aún abiertas, en orden de emisión.
    pub fn pending(&self) -> Vec<ToolInvocation> {
        let mut open: Vec<ToolInvocation> = self.inner
                                                .calls
                                                .iter()
                                                .filter(|s| s.invocation.status.is_open())
                                                .map(|s| s.invocation.clone())
                                                .collect();
        open.sort_by_key(|i| i.issued_at);
        open
    }
}
