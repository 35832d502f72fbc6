//! Pipeline Module - Detection Pipeline
//!
//! ## Structure
//! - `context`: handles one cycle needs (classifier, store, config, capture, notifier)
//! - `cycle`: one capture -> classify -> decide -> persist -> notify pass
//! - `scheduler`: periodic driver with start / pause / stop
//!
//! ## Usage
//! ```ignore
//! let scheduler = Scheduler::new();
//! scheduler.arm(PipelineContext::new(engine, store, config, capture, notifier))?;
//! scheduler.start()?;
//! // ...
//! scheduler.stop().await;
//! ```

pub mod context;
pub mod cycle;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use context::PipelineContext;
pub use cycle::{run_cycle, CycleOutcome, CycleReport};
pub use scheduler::{Scheduler, SchedulerError, SchedulerState, SchedulerStats};
