//! Steps concretos. Todos son `TypedStep`: sus schemas se derivan de los
//! payloads de `crate::payloads`.

pub mod approval;
pub mod fulfil;
pub mod plan;
pub mod task;
