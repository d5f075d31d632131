//! Definiciones relacionadas a Steps.
//!
//! Un Step recibe su entrada previa (y, al reanudarse, el payload de resume)
//! y devuelve un `StepResult`. Este módulo define:
//! - `StepDefinition`: interfaz neutral (JSON) usada por el engine.
//! - `TypedStep`: interfaz de alto nivel con tipos fuertes y schemas derivados.
//! - `StepContext`: lo que el engine entrega a cada ejecución.
//! - `Pipe` para construir pipelines tipados que validan IO en compilación.

mod context;
pub mod definition;
pub mod pipeline;
pub mod typed;

pub use context::StepContext;
pub use definition::StepDefinition;
pub use pipeline::{Pipe, SameAs};
pub use typed::{TypedStep, TypedStepResult};
