//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas del dominio de persistencia.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use flow_core::FlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("stored state is not decodable: {0}")]
    Corrupt(String),
    #[error("configuration: {0}")]
    Config(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Corrupt(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Todo fallo del store es un fallo de durabilidad para el engine.
impl From<PersistenceError> for FlowError {
    fn from(err: PersistenceError) -> Self {
        FlowError::Durability(err.to_string())
    }
}
