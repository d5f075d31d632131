//! Step Pipeline Engine.
//!
//! Máquina de estados por run:
//!
//! ```text
//! Pending --start--> Running
//! Running --Continue(x), quedan steps--> Running (x es la entrada del siguiente)
//! Running --Continue(x), último step--> Completed(x)
//! Running --Suspend(p)--> Suspended   [persistir + frame "suspended"]
//! Suspended --resume(r)--> Running    [mismo step, resume_data = r]
//! Running --Bail(x)--> Bailed(x)
//! Running --Fail(e)--> Failed(e)
//! ```

pub mod builder;
mod config;
pub mod core;
mod handle;

pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use self::core::PipelineEngine;
pub use handle::RunHandle;
