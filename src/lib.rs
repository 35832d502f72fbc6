//! Oathkeeper Core - Screen Content Detection Pipeline
//!
//! Periodically samples frames, classifies them, decides severity and
//! persists significant detections to a sealed, auditable event store.

pub mod constants;
pub mod logic;

pub use logic::config::{ConfigKey, ConfigStore, PipelineConfig};
pub use logic::error::{PipelineError, PipelineResult};
pub use logic::pipeline::{PipelineContext, Scheduler, SchedulerState};
