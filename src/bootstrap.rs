//! Construcción del engine a partir de la configuración.
//!
//! Con `DATABASE_URL` el Suspension Store es Postgres (pool migrado); sin
//! ella se usa el store en memoria.

use std::sync::Arc;
use std::time::Duration;

use flow_core::{FlowGateway, InMemorySuspensionStore, PipelineEngine, SuspensionStore};
use flow_persistence::{build_pool, DbConfig, PgSuspensionStore};
use log::info;

use crate::config::AppConfig;
use crate::errors::AppError;

pub fn store_for(cfg: &AppConfig) -> Result<Arc<dyn SuspensionStore>, AppError> {
    match &cfg.database_url {
        Some(url) => {
            let db = DbConfig::try_from_env().filter(|d| &d.url == url);
            let (min, max) = db.map(|d| (d.min_connections, d.max_connections)).unwrap_or((2, 16));
            let pool = build_pool(url, min, max)?;
            info!("suspension store: postgres");
            Ok(Arc::new(PgSuspensionStore::from_pool(pool)))
        }
        None => {
            info!("suspension store: in-memory");
            Ok(Arc::new(InMemorySuspensionStore::new()))
        }
    }
}

/// Engine con los pipelines y tools de `flow-adapters` registrados.
/// `work` es la duración de los pasos con trabajo simulado.
pub fn engine_with_store(cfg: &AppConfig, store: Arc<dyn SuspensionStore>, work: Duration) -> Result<PipelineEngine, AppError> {
    let engine = PipelineEngine::builder(store).config(cfg.engine_config()).build()?;
    flow_adapters::register_all(&engine, work)?;
    Ok(engine)
}

pub fn build_engine(cfg: &AppConfig, work: Duration) -> Result<PipelineEngine, AppError> {
    engine_with_store(cfg, store_for(cfg)?, work)
}

pub fn build_gateway(cfg: &AppConfig, work: Duration) -> Result<FlowGateway, AppError> {
    Ok(FlowGateway::new(build_engine(cfg, work)?))
}
