//! Schema Migrations
//!
//! Versioned and additive only, tracked in SQLite `user_version`.
//! Existing rows are never dropped on upgrade; a database written by a
//! newer build is refused instead of rewritten.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::logic::error::{PipelineError, PipelineResult};

/// v1: detection events + indexes + key canary
const SCHEMA_V1: &str = "
CREATE TABLE events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    label BLOB NOT NULL,
    severity TEXT NOT NULL,
    confidence BLOB NOT NULL,
    source_context BLOB,
    reviewed INTEGER NOT NULL DEFAULT 0,
    notes BLOB,
    created_at INTEGER NOT NULL,
    row_seal TEXT NOT NULL
);
CREATE INDEX idx_events_timestamp ON events(timestamp);
CREATE INDEX idx_events_severity ON events(severity);
CREATE TABLE store_meta (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
";

/// v2: append-only audit trail of operator actions
const SCHEMA_V2: &str = "
CREATE TABLE audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    action TEXT NOT NULL,
    event_id INTEGER,
    details TEXT,
    prev_hash TEXT NOT NULL,
    hash TEXT NOT NULL
);
CREATE INDEX idx_audit_event ON audit_log(event_id);
";

/// Latest schema version this build writes
pub const SCHEMA_VERSION: usize = 2;

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(SCHEMA_V1), M::up(SCHEMA_V2)])
}

/// Outcome of bringing a database to the latest schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: usize,
    pub to: usize,
}

impl MigrationOutcome {
    pub fn upgraded(&self) -> bool {
        self.from != self.to
    }
}

/// Schema version recorded in `user_version` (0 for a fresh database)
pub fn current_version(conn: &Connection) -> PipelineResult<usize> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version.max(0) as usize)
}

/// Apply pending migrations, logging every upgrade
pub fn migrate(conn: &mut Connection) -> PipelineResult<MigrationOutcome> {
    let from = current_version(conn)?;

    if from > SCHEMA_VERSION {
        log::error!(
            "[Store] Database schema v{} is newer than supported v{}; refusing to open",
            from,
            SCHEMA_VERSION
        );
        return Err(PipelineError::Storage(format!(
            "database schema v{} is newer than supported v{}",
            from, SCHEMA_VERSION
        )));
    }

    if from < SCHEMA_VERSION {
        log::info!("[Store] Migrating event schema v{} -> v{} (rows preserved)", from, SCHEMA_VERSION);
        migrations().to_latest(conn)?;
    }

    Ok(MigrationOutcome { from, to: SCHEMA_VERSION })
}
