//! Policy Configuration
//!
//! Per-label confidence thresholds. Part of `PipelineConfig`, validated at
//! the config write boundary.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::logic::error::{PipelineError, PipelineResult};

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Two-step threshold for tiered labels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tiers {
    /// Above this -> top tier
    pub high: f32,
    /// Above this -> middle tier
    pub mid: f32,
}

impl Tiers {
    pub fn new(high: f32, mid: f32) -> Self {
        Self { high, mid }
    }
}

/// Confidence thresholds, independently configurable per label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub porn: Tiers,
    pub sexy: Tiers,
    pub hentai: f32,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            porn: Tiers::new(DEFAULT_THRESHOLD_PORN_HIGH, DEFAULT_THRESHOLD_PORN_MID),
            sexy: Tiers::new(DEFAULT_THRESHOLD_SEXY_HIGH, DEFAULT_THRESHOLD_SEXY_MID),
            hentai: DEFAULT_THRESHOLD_HENTAI,
        }
    }
}

impl SeverityThresholds {
    /// High sensitivity (lower thresholds)
    pub fn high_sensitivity() -> Self {
        Self {
            porn: Tiers::new(0.5, 0.3),
            sexy: Tiers::new(0.6, 0.4),
            hentai: 0.5,
        }
    }

    /// Every value in [0, 1] and `mid <= high`
    pub fn validate(&self) -> PipelineResult<()> {
        check_unit("threshold_porn", self.porn.high)?;
        check_unit("threshold_porn_mid", self.porn.mid)?;
        check_unit("threshold_sexy", self.sexy.high)?;
        check_unit("threshold_sexy_mid", self.sexy.mid)?;
        check_unit("threshold_hentai", self.hentai)?;

        for (name, tiers) in [("porn", self.porn), ("sexy", self.sexy)] {
            if tiers.mid > tiers.high {
                return Err(PipelineError::ConfigInvalid(format!(
                    "{} mid threshold {:.2} above high threshold {:.2}",
                    name, tiers.mid, tiers.high
                )));
            }
        }
        Ok(())
    }
}

fn check_unit(key: &str, value: f32) -> PipelineResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::ConfigInvalid(format!(
            "{} must be within [0, 1], got {}",
            key, value
        )))
    }
}

// ============================================================================
// TESTS
// ============================================================================
