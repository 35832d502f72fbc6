//! Policy Types
//!
//! Core types for severity decisions. No logic here.

use serde::{Deserialize, Serialize};

use crate::logic::error::UnknownVariant;

// ============================================================================
// SEVERITY LEVELS
// ============================================================================

/// Significance tier of a detection. Ordered: None < Low < Info < Warning < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Not significant, never persisted
    None,
    Low,
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::None,
        Severity::Low,
        Severity::Info,
        Severity::Warning,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Result<Severity, UnknownVariant> {
        Severity::ALL
            .iter()
            .copied()
            .find(|s| s.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownVariant::new("severity", value))
    }

    /// Significant = worth persisting
    pub fn is_significant(&self) -> bool {
        *self > Severity::None
    }

    pub fn is_high(&self) -> bool {
        matches!(self, Severity::Warning | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
