//! Event Store - durable, sealed log of detection events
//!
//! One SQLite connection owned by the store behind a mutex; every operation
//! is serialized through it. Payload columns are encrypted, each row carries
//! an HMAC seal over its immutable fields, and inserts plus operator actions
//! land in a hash-chained audit log.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::crypto::{Sealer, StoreKey};
use super::schema::{self, MigrationOutcome};
use super::types::*;
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::model::Label;
use crate::logic::policy::Severity;

const EVENT_COLUMNS: &str =
    "id, timestamp, label, severity, confidence, source_context, reviewed, notes, created_at, row_seal";

const KEY_CANARY: &str = "key_canary";
const KEY_CANARY_PLAINTEXT: &[u8] = b"oathkeeper-event-store";

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// RAW ROW
// ============================================================================

/// Row as stored, before unsealing
struct RawEvent {
    id: i64,
    timestamp: i64,
    label: Vec<u8>,
    severity: String,
    confidence: Vec<u8>,
    source_context: Option<Vec<u8>>,
    reviewed: bool,
    notes: Option<Vec<u8>>,
    created_at: i64,
    row_seal: String,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            label: row.get(2)?,
            severity: row.get(3)?,
            confidence: row.get(4)?,
            source_context: row.get(5)?,
            reviewed: row.get::<_, i64>(6)? != 0,
            notes: row.get(7)?,
            created_at: row.get(8)?,
            row_seal: row.get(9)?,
        })
    }
}

/// Canonical bytes covered by a row seal
fn seal_input(
    id: i64,
    timestamp: i64,
    label: Label,
    severity: Severity,
    confidence: f32,
    source_context: Option<&str>,
    created_at: i64,
) -> Vec<u8> {
    let source = match source_context {
        Some(s) => format!("s:{}", s),
        None => "-".to_string(),
    };
    format!(
        "event|{}|{}|{}|{}|{}|{}|{}",
        id,
        timestamp,
        label.as_str(),
        severity.as_str(),
        confidence.to_bits(),
        source,
        created_at
    )
    .into_bytes()
}

fn audit_input(
    prev_hash: &str,
    timestamp: i64,
    action: AuditAction,
    event_id: Option<i64>,
    details: Option<&str>,
) -> Vec<u8> {
    format!(
        "audit|{}|{}|{}|{}|{}",
        prev_hash,
        timestamp,
        action.as_str(),
        event_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
        details.unwrap_or("-")
    )
    .into_bytes()
}

// ============================================================================
// EVENT STORE
// ============================================================================

pub struct EventStore {
    conn: Mutex<Connection>,
    sealer: Sealer,
    location: String,
}

impl EventStore {
    /// Open (or create) a file-backed store
    pub fn open(path: &Path, key: &StoreKey) -> PipelineResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        log::debug!("[Store] journal_mode={} for {:?}", mode, path);

        Self::init(conn, key, path.display().to_string())
    }

    pub fn open_in_memory(key: &StoreKey) -> PipelineResult<Self> {
        Self::init(Connection::open_in_memory()?, key, ":memory:".to_string())
    }

    fn init(mut conn: Connection, key: &StoreKey, location: String) -> PipelineResult<Self> {
        let outcome = schema::migrate(&mut conn)?;
        let sealer = Sealer::new(key);

        check_key(&conn, &sealer)?;

        let store = Self { conn: Mutex::new(conn), sealer, location };
        if outcome.upgraded() {
            store.record_migration(outcome)?;
        }

        log::info!(
            "[Store] Event store ready at {} (schema v{}, {} events)",
            store.location,
            outcome.to,
            store.count()?
        );
        Ok(store)
    }

    fn record_migration(&self, outcome: MigrationOutcome) -> PipelineResult<()> {
        let conn = self.conn.lock();
        let details = format!("schema v{} -> v{}", outcome.from, outcome.to);
        self.append_audit(&conn, AuditAction::Migrated, None, Some(&details))
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Persist a significant event, returning its id
    pub fn insert(&self, event: &NewEvent) -> PipelineResult<i64> {
        if !event.severity.is_significant() {
            return Err(PipelineError::Storage("NONE severity events are not persisted".to_string()));
        }
        if !event.confidence.is_finite() || !(0.0..=1.0).contains(&event.confidence) {
            return Err(PipelineError::Storage(format!(
                "confidence {} out of range",
                event.confidence
            )));
        }

        let created_at = now_ms().max(event.timestamp);
        let label = self.sealer.seal_str("label", event.label.as_str())?;
        let confidence = self.sealer.seal_f32("confidence", event.confidence)?;
        let source = event
            .source_context
            .as_deref()
            .map(|s| self.sealer.seal_str("source_context", s))
            .transpose()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO events (timestamp, label, severity, confidence, source_context, reviewed, notes, created_at, row_seal)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, ?6, '')",
            params![event.timestamp, label, event.severity.as_str(), confidence, source, created_at],
        )?;
        let id = tx.last_insert_rowid();

        let seal = self.sealer.mac(&seal_input(
            id,
            event.timestamp,
            event.label,
            event.severity,
            event.confidence,
            event.source_context.as_deref(),
            created_at,
        ));
        tx.execute("UPDATE events SET row_seal = ?1 WHERE id = ?2", params![seal, id])?;
        self.append_audit(&tx, AuditAction::Inserted, Some(id), Some(&seal))?;
        tx.commit()?;

        log::debug!("[Store] Inserted event #{} ({} {})", id, event.severity, event.label);
        Ok(id)
    }

    pub fn get(&self, id: i64) -> PipelineResult<Option<DetectionEvent>> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS),
                params![id],
                RawEvent::from_row,
            )
            .optional()?
        };
        raw.map(|r| self.unseal(r)).transpose()
    }

    /// Events matching `filter`, newest timestamp first (ties by id, newest first)
    pub fn list(&self, filter: &EventFilter) -> PipelineResult<Vec<DetectionEvent>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(since) = filter.since {
            clauses.push("timestamp >= ?");
            values.push(Value::Integer(since));
        }
        if let Some(until) = filter.until {
            clauses.push("timestamp <= ?");
            values.push(Value::Integer(until));
        }
        if let Some(severity) = filter.severity {
            clauses.push("severity = ?");
            values.push(Value::Text(severity.as_str().to_string()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM events{} ORDER BY timestamp DESC, id DESC",
            EVENT_COLUMNS, where_clause
        );

        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), RawEvent::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        raws.into_iter().map(|r| self.unseal(r)).collect()
    }

    /// List for read-only views: never fails, returns an empty list plus the error
    pub fn list_or_empty(&self, filter: &EventFilter) -> (Vec<DetectionEvent>, Option<PipelineError>) {
        match self.list(filter) {
            Ok(events) => (events, None),
            Err(e) => {
                log::warn!("[Store] list failed, returning empty result: {}", e);
                (Vec::new(), Some(e))
            }
        }
    }

    /// Flag an event as reviewed. `notes = None` keeps existing notes.
    /// Returns false for an unknown id.
    pub fn mark_reviewed(&self, id: i64, notes: Option<&str>) -> PipelineResult<bool> {
        let sealed_notes = notes.map(|n| self.sealer.seal_str("notes", n)).transpose()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE events SET reviewed = 1, notes = COALESCE(?1, notes) WHERE id = ?2",
            params![sealed_notes, id],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        let details = notes.map(|_| "notes updated");
        self.append_audit(&tx, AuditAction::Reviewed, Some(id), details)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn delete(&self, id: i64) -> PipelineResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Ok(false);
        }

        self.append_audit(&tx, AuditAction::Deleted, Some(id), None)?;
        tx.commit()?;
        log::info!("[Store] Deleted event #{}", id);
        Ok(true)
    }

    /// Remove every event. Ids are never reused afterwards.
    pub fn clear_all(&self) -> PipelineResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM events", [])?;

        let details = format!("{} events", removed);
        self.append_audit(&tx, AuditAction::Cleared, None, Some(&details))?;
        tx.commit()?;
        log::info!("[Store] Cleared {} events", removed);
        Ok(removed)
    }

    pub fn count(&self) -> PipelineResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn unseal(&self, raw: RawEvent) -> PipelineResult<DetectionEvent> {
        let label = Label::parse(&self.sealer.open_string("label", &raw.label)?)?;
        let confidence = self.sealer.open_f32("confidence", &raw.confidence)?;
        let source_context = raw
            .source_context
            .as_deref()
            .map(|b| self.sealer.open_string("source_context", b))
            .transpose()?;
        let notes = raw
            .notes
            .as_deref()
            .map(|b| self.sealer.open_string("notes", b))
            .transpose()?;

        Ok(DetectionEvent {
            id: raw.id,
            timestamp: raw.timestamp,
            label,
            severity: Severity::parse(&raw.severity)?,
            confidence,
            source_context,
            reviewed: raw.reviewed,
            notes,
            created_at: raw.created_at,
        })
    }

    // ------------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------------

    fn append_audit(
        &self,
        conn: &Connection,
        action: AuditAction,
        event_id: Option<i64>,
        details: Option<&str>,
    ) -> PipelineResult<()> {
        let prev_hash: String = conn
            .query_row("SELECT hash FROM audit_log ORDER BY id DESC LIMIT 1", [], |row| row.get(0))
            .optional()?
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let timestamp = now_ms();
        let hash = self.sealer.mac(&audit_input(&prev_hash, timestamp, action, event_id, details));

        conn.execute(
            "INSERT INTO audit_log (timestamp, action, event_id, details, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![timestamp, action.as_str(), event_id, details, prev_hash, hash],
        )?;
        Ok(())
    }

    /// Most recent audit entries, newest first
    pub fn audit_trail(&self, limit: usize) -> PipelineResult<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, action, event_id, details, hash
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, timestamp, action, event_id, details, hash) = row?;
            entries.push(AuditEntry {
                id,
                timestamp,
                action: AuditAction::parse(&action)?,
                event_id,
                details,
                hash,
            });
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------------

    /// Recompute every row seal, walk the audit chain, and check that every
    /// event the chain says is live still exists
    pub fn verify_integrity(&self) -> PipelineResult<IntegrityReport> {
        let conn = self.conn.lock();
        let mut report = IntegrityReport::default();
        let mut present = BTreeSet::new();

        {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM events ORDER BY id ASC", EVENT_COLUMNS))?;
            let rows = stmt.query_map([], RawEvent::from_row)?;
            for row in rows {
                let raw = row?;
                report.events_checked += 1;
                present.insert(raw.id);
                if !self.row_seal_valid(&raw) {
                    log::warn!("[Store] Row seal mismatch on event #{}", raw.id);
                    report.tampered_events.push(raw.id);
                }
            }
        }

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, action, event_id, details, prev_hash, hash
             FROM audit_log ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut live = BTreeSet::new();
        for row in rows {
            let (id, timestamp, action, event_id, details, prev_hash, hash) = row?;
            report.audit_entries_checked += 1;

            let action = AuditAction::parse(&action).ok().filter(|action| {
                prev_hash == expected_prev
                    && self.sealer.verify_mac(
                        &audit_input(&prev_hash, timestamp, *action, event_id, details.as_deref()),
                        &hash,
                    )
            });
            let Some(action) = action else {
                log::warn!("[Store] Audit chain broken at entry #{}", id);
                report.broken_audit_entry = Some(id);
                break;
            };

            match (action, event_id) {
                (AuditAction::Inserted, Some(event_id)) => {
                    live.insert(event_id);
                }
                (AuditAction::Deleted, Some(event_id)) => {
                    live.remove(&event_id);
                }
                (AuditAction::Cleared, _) => live.clear(),
                _ => {}
            }
            expected_prev = hash;
        }

        report.missing_events = live.difference(&present).copied().collect();
        for id in &report.missing_events {
            log::warn!("[Store] Event #{} is missing without a recorded delete", id);
        }

        if report.is_intact() {
            log::info!(
                "[Store] Integrity OK ({} events, {} audit entries)",
                report.events_checked,
                report.audit_entries_checked
            );
        }
        Ok(report)
    }

    fn row_seal_valid(&self, raw: &RawEvent) -> bool {
        let unsealed = (|| -> PipelineResult<Vec<u8>> {
            let label = Label::parse(&self.sealer.open_string("label", &raw.label)?)?;
            let severity = Severity::parse(&raw.severity)?;
            let confidence = self.sealer.open_f32("confidence", &raw.confidence)?;
            let source = raw
                .source_context
                .as_deref()
                .map(|b| self.sealer.open_string("source_context", b))
                .transpose()?;
            Ok(seal_input(
                raw.id,
                raw.timestamp,
                label,
                severity,
                confidence,
                source.as_deref(),
                raw.created_at,
            ))
        })();

        match unsealed {
            Ok(input) => self.sealer.verify_mac(&input, &raw.row_seal),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn schema_version(&self) -> PipelineResult<usize> {
        schema::current_version(&self.conn.lock())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Close the underlying connection, surfacing any final error
    pub fn close(self) -> PipelineResult<()> {
        let location = self.location;
        self.conn.into_inner().close().map_err(|(_, e)| PipelineError::from(e))?;
        log::info!("[Store] Closed event store at {}", location);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn raw_execute(&self, sql: &str) -> rusqlite::Result<usize> {
        self.conn.lock().execute(sql, [])
    }
}

/// Seal a canary on first open; on later opens, fail if the key cannot open it
fn check_key(conn: &Connection, sealer: &Sealer) -> PipelineResult<()> {
    let existing: Option<Vec<u8>> = conn
        .query_row("SELECT value FROM store_meta WHERE key = ?1", params![KEY_CANARY], |row| {
            row.get(0)
        })
        .optional()?;

    match existing {
        Some(blob) => match sealer.open("store_meta", &blob) {
            Ok(plain) if plain == KEY_CANARY_PLAINTEXT => Ok(()),
            _ => {
                log::error!("[Store] Store key does not match this database");
                Err(PipelineError::Storage("store key does not match this database".to_string()))
            }
        },
        None => {
            let blob = sealer.seal("store_meta", KEY_CANARY_PLAINTEXT)?;
            conn.execute(
                "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                params![KEY_CANARY, blob],
            )?;
            Ok(())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
