//! Detección de huecos del lado del consumidor.
//!
//! Un hueco en `sequence` es pérdida de datos, nunca "falta pero se puede
//! ignorar": `observe` devuelve error y no avanza el cursor del scope.

use std::collections::HashMap;

use uuid::Uuid;

use super::EventFrame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    pub scope_id: Uuid,
    pub expected: u64,
    pub found: u64,
}

impl std::fmt::Display for SequenceGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope {} expected sequence {} but got {}", self.scope_id, self.expected, self.found)
    }
}

impl std::error::Error for SequenceGap {}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    next: HashMap<Uuid, u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// El primer frame de cada scope fija la base; a partir de ahí se exige
    /// contigüidad estricta.
    pub fn observe(&mut self, frame: &EventFrame) -> Result<(), SequenceGap> {
        match self.next.get(&frame.scope_id) {
            Some(&expected) if expected != frame.sequence => Err(SequenceGap { scope_id: frame.scope_id,
                                                                               expected,
                                                                               found: frame.sequence }),
            _ => {
                self.next.insert(frame.scope_id, frame.sequence + 1);
                Ok(())
            }
        }
    }

    pub fn scopes_seen(&self) -> usize {
        self.next.len()
    }
}
