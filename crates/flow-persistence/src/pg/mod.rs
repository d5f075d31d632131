//! Implementación Postgres (Diesel) del `SuspensionStore` del core.
//!
//! - Una fila por run suspendido en `suspended_runs`; el `RunState` completo
//!   viaja como JSONB en `state`.
//! - `save` es un upsert en una sola sentencia: al retornar `Ok` la fila está
//!   confirmada (frontera de durabilidad del engine).
//! - `claim` es un `UPDATE ... WHERE claimed = false AND status = 'suspended'
//!   RETURNING state`: Postgres serializa los updates concurrentes sobre la
//!   misma fila, así que a lo sumo un resume gana.
//! - Las llamadas Diesel son bloqueantes: se ejecutan en `spawn_blocking`.
//! - Errores transitorios se reintentan con backoff corto (`with_retry`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::upsert::excluded;
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use flow_core::{FlowError, RunState, RunStatus, SuspensionStore};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::suspended_runs;

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real o simular la conexión en tests sin acoplar
/// a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = suspended_runs)]
struct NewRunRow<'a> {
    run_id: Uuid,
    pipeline_id: &'a str,
    status: &'a str,
    claimed: bool,
    state: Value,
    suspended_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
pub(crate) fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        // best-effort sobre el texto del driver, sin acoplar a SQLSTATE
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff muy pequeño (hasta 3 reintentos: 15ms, 30ms, 45ms).
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Suspension Store durable sobre Postgres.
#[derive(Clone)]
pub struct PgSuspensionStore {
    provider: Arc<dyn ConnectionProvider>,
}

impl PgSuspensionStore {
    pub fn new(provider: impl ConnectionProvider) -> Self {
        Self { provider: Arc::new(provider) }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(PoolProvider { pool })
    }

    /// Ejecuta `f` con una conexión en el pool de tareas bloqueantes.
    async fn blocking<T, F>(&self, f: F) -> Result<T, FlowError>
        where T: Send + 'static,
              F: FnOnce(&dyn ConnectionProvider) -> Result<T, FlowError> + Send + 'static
    {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || f(provider.as_ref())).await
                                                                 .map_err(|e| {
                                                                     FlowError::Durability(format!("blocking task: {e}"))
                                                                 })?
    }

    fn save_sync(provider: &dyn ConnectionProvider, state: &RunState) -> Result<(), PersistenceError> {
        let payload = serde_json::to_value(state)?;
        with_retry(|| {
            let mut conn = provider.connection()?;
            let row = NewRunRow { run_id: state.run_id,
                                  pipeline_id: &state.pipeline_id,
                                  status: state.status.as_str(),
                                  claimed: false,
                                  state: payload.clone(),
                                  suspended_at: state.suspended_at,
                                  updated_at: Utc::now() };
            diesel::insert_into(suspended_runs::table).values(&row)
                                                      .on_conflict(suspended_runs::run_id)
                                                      .do_update()
                                                      .set((suspended_runs::pipeline_id.eq(excluded(suspended_runs::pipeline_id)),
                                                            suspended_runs::status.eq(excluded(suspended_runs::status)),
                                                            suspended_runs::claimed.eq(false),
                                                            suspended_runs::state.eq(excluded(suspended_runs::state)),
                                                            suspended_runs::suspended_at.eq(excluded(suspended_runs::suspended_at)),
                                                            suspended_runs::updated_at.eq(excluded(suspended_runs::updated_at))))
                                                      .execute(&mut conn)
                                                      .map(|_| ())
                                                      .map_err(PersistenceError::from)
        })
    }

    fn load_sync(provider: &dyn ConnectionProvider, run_id: Uuid) -> Result<Option<(Value, bool)>, PersistenceError> {
        with_retry(|| {
            let mut conn = provider.connection()?;
            suspended_runs::table.filter(suspended_runs::run_id.eq(run_id))
                                 .select((suspended_runs::state, suspended_runs::claimed))
                                 .first::<(Value, bool)>(&mut conn)
                                 .optional()
                                 .map_err(PersistenceError::from)
        })
    }

    fn claim_sync(provider: &dyn ConnectionProvider, run_id: Uuid) -> Result<Option<Value>, PersistenceError> {
        with_retry(|| {
            let mut conn = provider.connection()?;
            diesel::update(suspended_runs::table.filter(suspended_runs::run_id.eq(run_id))
                                                .filter(suspended_runs::claimed.eq(false))
                                                .filter(suspended_runs::status.eq(RunStatus::Suspended.as_str())))
                .set((suspended_runs::claimed.eq(true), suspended_runs::updated_at.eq(Utc::now())))
                .returning(suspended_runs::state)
                .get_result::<Value>(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })
    }
}

fn decode_state(raw: Value) -> Result<RunState, FlowError> {
    serde_json::from_value(raw).map_err(|e| FlowError::from(PersistenceError::from(e)))
}

#[async_trait]
impl SuspensionStore for PgSuspensionStore {
    async fn save(&self, state: &RunState) -> Result<(), FlowError> {
        let state = state.clone();
        self.blocking(move |p| {
                debug!("save:start run_id={} status={}", state.run_id, state.status.as_str());
                Self::save_sync(p, &state).map_err(FlowError::from)
            })
            .await
    }

    async fn load(&self, run_id: Uuid) -> Result<RunState, FlowError> {
        let row = self.blocking(move |p| Self::load_sync(p, run_id).map_err(FlowError::from))
                      .await?;
        match row {
            Some((raw, _)) => decode_state(raw),
            None => Err(FlowError::UnknownRun(run_id)),
        }
    }

    async fn delete(&self, run_id: Uuid) -> Result<(), FlowError> {
        self.blocking(move |p| {
                with_retry(|| {
                    let mut conn = p.connection()?;
                    diesel::delete(suspended_runs::table.filter(suspended_runs::run_id.eq(run_id))).execute(&mut conn)
                                                                                                   .map(|_| ())
                                                                                                   .map_err(PersistenceError::from)
                }).map_err(FlowError::from)
            })
            .await
    }

    async fn claim(&self, run_id: Uuid) -> Result<RunState, FlowError> {
        let claimed = self.blocking(move |p| Self::claim_sync(p, run_id).map_err(FlowError::from))
                          .await?;
        if let Some(raw) = claimed {
            return decode_state(raw);
        }
        // nadie ganó el update: explicar por qué
        let row = self.blocking(move |p| Self::load_sync(p, run_id).map_err(FlowError::from))
                      .await?;
        match row {
            None => Err(FlowError::UnknownRun(run_id)),
            Some((_, true)) => Err(FlowError::ConcurrentResume(run_id)),
            Some((raw, false)) => {
                let state = decode_state(raw)?;
                Err(FlowError::InvalidState { run_id,
                                              status: state.status })
            }
        }
    }

    async fn release(&self, run_id: Uuid) -> Result<(), FlowError> {
        self.blocking(move |p| {
                with_retry(|| {
                    let mut conn = p.connection()?;
                    diesel::update(suspended_runs::table.filter(suspended_runs::run_id.eq(run_id)))
                        .set(suspended_runs::claimed.eq(false))
                        .execute(&mut conn)
                        .map(|_| ())
                        .map_err(PersistenceError::from)
                }).map_err(FlowError::from)
            })
            .await
    }

    async fn list_expired(&self, before: DateTime<Utc>) -> Result<Vec<Uuid>, FlowError> {
        self.blocking(move |p| {
                with_retry(|| {
                    let mut conn = p.connection()?;
                    suspended_runs::table.filter(suspended_runs::claimed.eq(false))
                                         .filter(suspended_runs::suspended_at.lt(before))
                                         .order(suspended_runs::suspended_at.asc())
                                         .select(suspended_runs::run_id)
                                         .load::<Uuid>(&mut conn)
                                         .map_err(PersistenceError::from)
                }).map_err(FlowError::from)
            })
            .await
    }
}

/// Construye un pool Postgres r2d2 a partir de URL y corre las migraciones.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración y construye un pool
/// ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
