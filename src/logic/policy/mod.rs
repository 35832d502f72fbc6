//! Policy Module
//!
//! Decides how significant a classification is.
//!
//! ## Structure
//! - `types`: Severity
//! - `config`: per-label thresholds
//! - `engine`: decision logic
//!
//! ## Usage
//! ```ignore
//! use crate::logic::policy::{decide, Severity};
//!
//! match decide(result.label, result.confidence, &config.thresholds) {
//!     Severity::None => discard(),
//!     severity => record(severity),
//! }
//! ```

pub mod types;
pub mod config;
pub mod engine;

pub use types::Severity;
pub use config::{SeverityThresholds, Tiers};
pub use engine::{decide, decide_result};
