//! Event Store Types

use serde::{Deserialize, Serialize};

use crate::logic::error::UnknownVariant;
use crate::logic::model::Label;
use crate::logic::policy::Severity;

// ============================================================================
// DETECTION EVENT
// ============================================================================

/// Fields supplied by the pipeline; the store assigns id and created_at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Capture time (epoch millis)
    pub timestamp: i64,
    pub label: Label,
    pub severity: Severity,
    pub confidence: f32,
    /// e.g. foreground app name
    pub source_context: Option<String>,
}

/// Persisted detection event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Store-assigned, strictly increasing, immutable
    pub id: i64,
    pub timestamp: i64,
    pub label: Label,
    pub severity: Severity,
    pub confidence: f32,
    pub source_context: Option<String>,
    /// Mutable via `mark_reviewed`
    pub reviewed: bool,
    /// Mutable via `mark_reviewed`
    pub notes: Option<String>,
    /// Store-assigned, >= timestamp
    pub created_at: i64,
}

// ============================================================================
// FILTER
// ============================================================================

/// Query filter. Time bounds are inclusive; severity is an exact match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub severity: Option<Severity>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_severity(severity: Severity) -> Self {
        Self { severity: Some(severity), ..Default::default() }
    }

    pub fn between(since: i64, until: i64) -> Self {
        Self { since: Some(since), until: Some(until), ..Default::default() }
    }

    pub fn and_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

// ============================================================================
// AUDIT
// ============================================================================

/// Inserts, operator actions and store lifecycle recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    /// Details carry the row seal
    Inserted,
    Reviewed,
    Deleted,
    Cleared,
    Migrated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Inserted => "inserted",
            AuditAction::Reviewed => "reviewed",
            AuditAction::Deleted => "deleted",
            AuditAction::Cleared => "cleared",
            AuditAction::Migrated => "migrated",
        }
    }

    pub fn parse(value: &str) -> Result<AuditAction, UnknownVariant> {
        match value {
            "inserted" => Ok(AuditAction::Inserted),
            "reviewed" => Ok(AuditAction::Reviewed),
            "deleted" => Ok(AuditAction::Deleted),
            "cleared" => Ok(AuditAction::Cleared),
            "migrated" => Ok(AuditAction::Migrated),
            other => Err(UnknownVariant::new("audit action", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: i64,
    pub action: AuditAction,
    pub event_id: Option<i64>,
    pub details: Option<String>,
    pub hash: String,
}

/// Result of `verify_integrity`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub events_checked: usize,
    /// Rows whose seal no longer matches (or fail to decrypt)
    pub tampered_events: Vec<i64>,
    /// Ids the audit chain says were inserted and never deleted, but are gone
    pub missing_events: Vec<i64>,
    pub audit_entries_checked: usize,
    /// First audit entry where the hash chain breaks
    pub broken_audit_entry: Option<i64>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.tampered_events.is_empty()
            && self.missing_events.is_empty()
            && self.broken_audit_entry.is_none()
    }
}
