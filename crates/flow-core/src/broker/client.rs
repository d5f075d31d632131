//! Representación client-side de los argumentos de una invocación.
//!
//! Tres capas: el valor que llega por streaming, el valor final y una copia
//! local editada por el usuario. La copia local se crea perezosamente en la
//! primera edición y desde ese momento ningún update de streaming la pisa
//! (latch de un solo sentido `Streaming -> Edited`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftPhase {
    Streaming,
    Edited,
}

#[derive(Debug, Clone)]
pub struct ArgsDraft<T> {
    phase: DraftPhase,
    streaming: Option<T>,
    final_value: Option<T>,
    local: Option<T>,
}

impl<T> Default for ArgsDraft<T> {
    fn default() -> Self {
        Self { phase: DraftPhase::Streaming,
               streaming: None,
               final_value: None,
               local: None }
    }
}

impl<T: Clone + Default> ArgsDraft<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> DraftPhase {
        self.phase
    }

    /// Valor parcial recibido. Después de la primera edición sólo se
    /// registra; lo que ve el usuario no cambia.
    pub fn on_stream(&mut self, partial: T) {
        self.streaming = Some(partial);
    }

    /// Valor final de los argumentos (base por defecto para editar).
    pub fn on_final(&mut self, value: T) {
        self.final_value = Some(value);
    }

    /// Aplica una edición del usuario. La primera edición copia la base
    /// (final, o en su defecto lo último recibido) y cierra el latch.
    pub fn edit(&mut self, f: impl FnOnce(&mut T)) {
        if self.phase == DraftPhase::Streaming {
            let basis = self.final_value
                            .clone()
                            .or_else(|| self.streaming.clone())
                            .unwrap_or_default();
            self.local = Some(basis);
            self.phase = DraftPhase::Edited;
        }
        if let Some(local) = self.local.as_mut() {
            f(local);
        }
    }

    /// Valor visible ahora mismo.
    pub fn current(&self) -> Option<&T> {
        match self.phase {
            DraftPhase::Edited => self.local.as_ref(),
            DraftPhase::Streaming => self.final_value.as_ref().or(self.streaming.as_ref()),
        }
    }

    /// Valor a enviar como base del resultado.
    pub fn submit(&self) -> Option<T> {
        self.current().cloned()
    }
}
