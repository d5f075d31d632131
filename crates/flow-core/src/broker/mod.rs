//! Tool-Call Result Broker.
//!
//! Una invocación "resuelta externamente" no tiene ejecutor propio: el broker
//! la registra, anuncia sus argumentos por el multiplexer y espera a que un
//! cliente inyecte el resultado (`provide_result`) o la rechace (`reject`).
//!
//! Ciclo de vida: `Issued -> AwaitingResult -> Resolved | Rejected`. Un
//! resultado puede llegar antes de que alguien espere (`Issued -> Resolved`);
//! nunca se vuelve de un estado final.
mod client;
mod core;
mod invocation;

pub use self::core::ToolCallBroker;
pub use client::{ArgsDraft, DraftPhase};
pub use invocation::{InvocationStatus, ToolInvocation, ToolRegistration};
