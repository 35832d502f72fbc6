//! Detection Cycle
//!
//! capture -> classify -> decide -> persist -> notify. Runs on the blocking
//! pool; never panics and never returns an error. Failures become
//! `CycleOutcome::Failed` and the next tick proceeds normally.

use std::time::Instant;

use serde::Serialize;

use super::context::PipelineContext;
use crate::logic::config::PipelineConfig;
use crate::logic::error::PipelineResult;
use crate::logic::model::Label;
use crate::logic::policy::{decide_result, Severity};
use crate::logic::storage::NewEvent;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Significant result persisted
    Recorded {
        event_id: i64,
        label: Label,
        severity: Severity,
        confidence: f32,
        notified: bool,
    },
    /// Severity NONE: nothing persisted, nothing notified
    Discarded { label: Label, confidence: f32 },
    /// Capture, classifier or store failure; the tick is skipped
    Failed { kind: &'static str, message: String },
}

/// Published on the scheduler's completion channel after every cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    /// 1-based cycle sequence number
    pub cycle: u64,
    pub finished_at: i64,
    pub duration_ms: u64,
    pub outcome: CycleOutcome,
}

/// Run one cycle against a fresh config snapshot
pub fn run_cycle(ctx: &PipelineContext) -> CycleOutcome {
    let config = ctx.config.snapshot();
    let started = Instant::now();

    let outcome = match execute(ctx, &config) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::warn!("[Pipeline] Cycle skipped ({}): {}", e.kind(), e);
            CycleOutcome::Failed { kind: e.kind(), message: e.to_string() }
        }
    };

    log::debug!("[Pipeline] Cycle finished in {:?}: {:?}", started.elapsed(), outcome);
    outcome
}

fn execute(ctx: &PipelineContext, config: &PipelineConfig) -> PipelineResult<CycleOutcome> {
    let frame = ctx.capture.capture_frame()?;
    let result = ctx.engine.classify(&frame.image)?;
    let severity = decide_result(&result, &config.thresholds);

    if !severity.is_significant() {
        return Ok(CycleOutcome::Discarded { label: result.label, confidence: result.confidence });
    }

    let event_id = ctx.store.insert(&NewEvent {
        timestamp: frame.captured_at,
        label: result.label,
        severity,
        confidence: result.confidence,
        source_context: frame.source_context,
    })?;

    log::info!(
        "[Pipeline] Recorded event #{}: {} {} ({:.1}%)",
        event_id,
        severity,
        result.label,
        result.confidence * 100.0
    );

    // Alert from the stored row; a failed read-back skips the alert only
    let notified = match ctx.store.get(event_id) {
        Ok(Some(event)) => ctx.notifier.notify(&event, config),
        Ok(None) => false,
        Err(e) => {
            log::warn!("[Pipeline] Could not read back event #{} for alert: {}", event_id, e);
            false
        }
    };

    Ok(CycleOutcome::Recorded {
        event_id,
        label: result.label,
        severity,
        confidence: result.confidence,
        notified,
    })
}
