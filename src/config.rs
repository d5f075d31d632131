//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y expone una estructura inmutable (`CONFIG`).
//!
//! Variables:
//! - `SUSPENDFLOW_SUSPENDED_TTL_SECS`: retención de runs suspendidos (7 días).
//! - `SUSPENDFLOW_GATEWAY_WAIT_MS`: espera máxima del gateway hasta que un run
//!   se asiente (30 s).
//! - `DATABASE_URL`: opcional; si está, el store es Postgres.
use std::env;
use std::time::Duration;

use flow_core::EngineConfig;
use log::warn;
use once_cell::sync::Lazy;

use crate::errors::AppError;

pub const TTL_VAR: &str = "SUSPENDFLOW_SUSPENDED_TTL_SECS";
pub const WAIT_VAR: &str = "SUSPENDFLOW_GATEWAY_WAIT_MS";

/// Configuración global de la aplicación.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub suspended_ttl: Duration,
    pub gateway_wait: Duration,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self { suspended_ttl: engine.suspended_ttl,
               gateway_wait: engine.gateway_wait_timeout,
               database_url: None }
    }
}

fn parse_u64(name: &str, raw: Option<String>) -> Result<Option<u64>, AppError> {
    raw.map(|v| {
           v.trim()
            .parse::<u64>()
            .map_err(|e| AppError::Config(format!("{name}={v}: {e}")))
       })
       .transpose()
}

impl AppConfig {
    /// Construye la configuración desde una función de búsqueda (`env::var`
    /// en producción, un mapa en tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut cfg = Self::default();
        if let Some(secs) = parse_u64(TTL_VAR, lookup(TTL_VAR))? {
            cfg.suspended_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(WAIT_VAR, lookup(WAIT_VAR))? {
            cfg.gateway_wait = Duration::from_millis(ms);
        }
        cfg.database_url = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty());
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_suspended_ttl(self.suspended_ttl)
                               .with_gateway_wait_timeout(self.gateway_wait)
    }
}

/// Instancia global perezosa de configuración, evaluada una sola vez. Valores
/// inválidos se reportan y se reemplazan por los defaults.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    AppConfig::from_env().unwrap_or_else(|e| {
                             warn!("configuración inválida, usando defaults: {e}");
                             AppConfig::default()
                         })
});
