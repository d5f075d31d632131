//! Constantes del motor core.
//!
//! Los `kind` de `EventFrame` son strings estables: el multiplexer no los
//! interpreta, pero los renderers externos sí dependen de ellos.

/// Versión lógica del motor. Entra en el `definition_hash` de cada pipeline
/// para que un cambio incompatible del engine invalide runs suspendidos.
pub const ENGINE_VERSION: &str = "S1.0";

pub const KIND_RUN_STARTED: &str = "run-started";
pub const KIND_STEP_STARTED: &str = "step-started";
pub const KIND_STEP_FINISHED: &str = "step-finished";
pub const KIND_SUSPENDED: &str = "suspended";
pub const KIND_RESUMED: &str = "resumed";
pub const KIND_BAILED: &str = "bailed";
pub const KIND_COMPLETED: &str = "completed";
pub const KIND_FAILED: &str = "failed";
pub const KIND_CANCELLED: &str = "cancelled";
pub const KIND_PROGRESS: &str = "progress";

pub const KIND_TOOL_CALL_ISSUED: &str = "tool-call-issued";
pub const KIND_TOOL_CALL_ARGS: &str = "tool-call-args";
pub const KIND_TOOL_CALL_RESULT: &str = "tool-call-result";
pub const KIND_TOOL_CALL_REJECTED: &str = "tool-call-rejected";

/// Retención por defecto de un run suspendido (7 días).
pub const DEFAULT_SUSPENDED_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Espera máxima por defecto del gateway hasta que un run se asiente.
pub const DEFAULT_GATEWAY_WAIT_MS: u64 = 30_000;

/// Tiempo que un run terminal sigue consultable en memoria antes de liberarse.
pub const DEFAULT_TERMINAL_RETENTION_SECS: u64 = 5 * 60;

/// Motivo con el que se rechazan las invocaciones abiertas de un run cancelado.
pub const CANCELLED_REASON: &str = "run cancelled";
