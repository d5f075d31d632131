//! Event Stream Multiplexer: frames con scope, orden por scope y suscripción
//! por scope raíz.

mod multiplexer;
mod tracker;
mod types;

pub use multiplexer::{EventMultiplexer, ScopedEmitter};
pub use tracker::{SequenceGap, SequenceTracker};
pub use types::EventFrame;
