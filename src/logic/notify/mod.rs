//! Notify Module - user-visible alerts for recorded events
//!
//! Best-effort: gated by `notifications_enabled`, and a sink failure is
//! logged and counted, never returned to the caller. Sinks must return
//! promptly; network sinks queue and deliver in the background.

pub mod types;
pub mod webhook;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::logic::config::PipelineConfig;
use crate::logic::storage::DetectionEvent;

pub use types::{title_for, Alert, SinkError};
pub use webhook::{WebhookClient, WebhookPlatform, WebhookSink};

// ============================================================================
// SINKS
// ============================================================================

/// Destination for alerts
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    fn deliver(&self, alert: &Alert) -> Result<(), SinkError>;
}

/// Writes alerts to the log
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        log::warn!("[ALERT] {} - {} (event #{})", alert.title, alert.message, alert.event_id);
        Ok(())
    }
}

// ============================================================================
// NOTIFIER
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub delivered: u64,
    pub failed: u64,
    pub suppressed: u64,
}

pub struct Notifier {
    sinks: Vec<Arc<dyn AlertSink>>,
    delivered: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
}

impl Notifier {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self {
            sinks,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Log sink only
    pub fn with_log_sink() -> Self {
        Self::new(vec![Arc::new(LogSink) as Arc<dyn AlertSink>])
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Alert on a recorded event. Returns true if an alert was dispatched.
    pub fn notify(&self, event: &DetectionEvent, config: &PipelineConfig) -> bool {
        if !config.notifications_enabled || !event.severity.is_significant() {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let alert = Alert::for_event(event);
        for sink in &self.sinks {
            match sink.deliver(&alert) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[Notify] Sink '{}' failed for event #{}: {}", sink.name(), event.id, e);
                }
            }
        }
        true
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::with_log_sink()
    }
}
