use std::time::Duration;

use crate::constants::{DEFAULT_GATEWAY_WAIT_MS, DEFAULT_SUSPENDED_TTL_SECS, DEFAULT_TERMINAL_RETENTION_SECS};

/// Parámetros del engine y del gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Tiempo máximo que un run puede permanecer suspendido.
    pub suspended_ttl: Duration,
    /// Cuánto espera el gateway a que un run se asiente antes de responder.
    pub gateway_wait_timeout: Duration,
    /// Cuánto sigue en memoria un run terminal (estado, frames, invocaciones)
    /// antes de liberarse.
    pub terminal_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { suspended_ttl: Duration::from_secs(DEFAULT_SUSPENDED_TTL_SECS),
               gateway_wait_timeout: Duration::from_millis(DEFAULT_GATEWAY_WAIT_MS),
               terminal_retention: Duration::from_secs(DEFAULT_TERMINAL_RETENTION_SECS) }
    }
}

impl EngineConfig {
    pub fn with_suspended_ttl(mut self, ttl: Duration) -> Self {
        self.suspended_ttl = ttl;
        self
    }

    pub fn with_gateway_wait_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_wait_timeout = timeout;
        self
    }

    pub fn with_terminal_retention(mut self, retention: Duration) -> Self {
        self.terminal_retention = retention;
        self
    }

    pub(crate) fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.suspended_ttl).unwrap_or(chrono::Duration::MAX)
    }
}
