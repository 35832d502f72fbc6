//! Logic Module - Detection Pipeline
//!
//! ## Architecture
//! - `model/` - content classifier (labels, preprocessing, ONNX inference)
//! - `policy/` - classification -> severity decision
//! - `storage/` - sealed SQLite event store + audit trail
//! - `notify/` - user-visible alerts
//! - `capture` - frame provider seam
//! - `pipeline/` - cycle + scheduler
//! - `config` - hot-reloadable pipeline settings

// Core
pub mod error;
pub mod config;

// Components, leaf-first
pub mod model;
pub mod policy;
pub mod storage;
pub mod notify;
pub mod capture;
pub mod pipeline;
