//! Storage Module - Detection Event Store
//!
//! ## Structure
//! - `crypto`: column sealing, row seals
//! - `schema`: versioned migrations
//! - `types`: events, filters, audit entries
//! - `event_store`: SQLite-backed store

pub mod crypto;
pub mod schema;
pub mod types;
pub mod event_store;

pub use crypto::{Sealer, StoreKey, KEY_LEN};
pub use event_store::EventStore;
pub use schema::{MigrationOutcome, SCHEMA_VERSION};
pub use types::{AuditAction, AuditEntry, DetectionEvent, EventFilter, IntegrityReport, NewEvent};
