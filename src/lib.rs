//! SuspendFlow
//!
//! Fachada de aplicación sobre los crates del workspace:
//! - `config`: configuración global (`CONFIG`) desde entorno / `.env`.
//! - `errors`: `AppError`, que agrupa errores de flow, persistencia y JSON.
//! - `bootstrap`: engine y gateway listos para usar (Postgres o memoria).

pub mod bootstrap;
pub mod config;
pub mod errors;

pub use bootstrap::{build_engine, build_gateway, engine_with_store, store_for};
pub use config::{AppConfig, CONFIG};
pub use errors::AppError;
