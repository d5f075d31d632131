use flow_core::{classify_error, ErrorClass, FlowError};
use flow_persistence::PersistenceError;
use thiserror::Error;

/// Errores de la capa de aplicación (bootstrap, demo, configuración).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("flow: {0}")]
    Flow(#[from] FlowError),
    #[error("persistencia: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Error de configuración: {0}")]
    Config(String),
}

impl AppError {
    /// Fallo atribuible al llamador (payload, protocolo o id inexistente).
    pub fn is_caller_error(&self) -> bool {
        match self {
            AppError::Flow(e) => matches!(classify_error(e),
                                          ErrorClass::Validation | ErrorClass::Protocol | ErrorClass::NotFound),
            AppError::Json(_) => true,
            AppError::Persistence(_) | AppError::Config(_) => false,
        }
    }
}
