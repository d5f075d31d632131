use futures::stream::BoxStream;
use tokio::sync::watch;
use uuid::Uuid;

use crate::errors::FlowError;
use crate::event::{EventFrame, EventMultiplexer};
use crate::model::{RunState, RunStatus};

/// Vista de un run en curso: estado actual + suscripción a sus eventos.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: Uuid,
    state: watch::Receiver<RunState>,
    mux: EventMultiplexer,
}

impl RunHandle {
    pub(crate) fn new(run_id: Uuid, state: watch::Receiver<RunState>, mux: EventMultiplexer) -> Self {
        Self { run_id, state, mux }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.state.borrow().status
    }

    /// Espera hasta que el run quede `Suspended` o terminal.
    pub async fn settled(&self) -> RunState {
        let mut rx = self.state.clone();
        let settled = match rx.wait_for(|s| s.status.is_settled()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        // engine descartado (o run liberado): devolvemos lo último publicado
        settled.unwrap_or_else(|| rx.borrow().clone())
    }

    /// Frames del scope raíz del run (y de sus scopes hijos).
    pub fn subscribe(&self) -> Result<BoxStream<'static, EventFrame>, FlowError> {
        self.mux.subscribe(self.run_id)
    }
}
