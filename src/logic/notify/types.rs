//! Alert Types

use serde::Serialize;
use thiserror::Error;

use crate::logic::model::Label;
use crate::logic::policy::Severity;
use crate::logic::storage::DetectionEvent;

/// User-visible alert derived from a recorded event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub label: Label,
    pub confidence: f32,
    pub event_id: i64,
    pub timestamp: i64,
}

impl Alert {
    pub fn for_event(event: &DetectionEvent) -> Self {
        Self {
            title: title_for(event.severity).to_string(),
            message: format!("Detected: {} ({:.1}%)", event.label, event.confidence * 100.0),
            severity: event.severity,
            label: event.label,
            confidence: event.confidence,
            event_id: event.id,
            timestamp: event.timestamp,
        }
    }
}

pub fn title_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Critical Content Detected",
        Severity::Warning => "Warning: Potentially Inappropriate Content",
        _ => "Content Detected",
    }
}

/// Hex color used by chat-platform formatters
pub fn color_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#dc2626",
        Severity::Warning => "#f59e0b",
        Severity::Info => "#3b82f6",
        Severity::Low | Severity::None => "#6b7280",
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
