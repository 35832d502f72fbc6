//! Policy Engine
//!
//! Decision logic only. Input: (label, confidence, thresholds).
//! Output: Severity. Pure, total, never blocks.

use super::config::{SeverityThresholds, Tiers};
use super::types::Severity;
use crate::logic::model::{ClassificationResult, Label, RiskTier};

// ============================================================================
// MAIN DECISION FUNCTION
// ============================================================================

/// Map a classification to a severity tier
pub fn decide(label: Label, confidence: f32, thresholds: &SeverityThresholds) -> Severity {
    match label.risk() {
        RiskTier::High => tiered(confidence, thresholds.porn, [
            Severity::Critical,
            Severity::Warning,
            Severity::Info,
        ]),
        RiskTier::Moderate => tiered(confidence, thresholds.sexy, [
            Severity::Warning,
            Severity::Info,
            Severity::Low,
        ]),
        RiskTier::Stylized => {
            if confidence > thresholds.hentai {
                Severity::Warning
            } else {
                Severity::Info
            }
        }
        RiskTier::Benign => Severity::None,
    }
}

/// Convenience wrapper over a full classification
pub fn decide_result(result: &ClassificationResult, thresholds: &SeverityThresholds) -> Severity {
    decide(result.label, result.confidence, thresholds)
}

fn tiered(confidence: f32, tiers: Tiers, levels: [Severity; 3]) -> Severity {
    if confidence > tiers.high {
        levels[0]
    } else if confidence > tiers.mid {
        levels[1]
    } else {
        levels[2]
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep() -> impl Iterator<Item = f32> {
        (0..=1000).map(|i| i as f32 / 1000.0)
    }

    #[test]
    fn test_porn_tiers() {
        let t = SeverityThresholds::default();
        assert_eq!(decide(Label::Porn, 0.75, &t), Severity::Critical);
        assert_eq!(decide(Label::Porn, 0.7, &t), Severity::Warning);
        assert_eq!(decide(Label::Porn, 0.6, &t), Severity::Warning);
        assert_eq!(decide(Label::Porn, 0.5, &t), Severity::Info);
        assert_eq!(decide(Label::Porn, 0.2, &t), Severity::Info);
    }

    #[test]
    fn test_sexy_tiers() {
        let t = SeverityThresholds::default();
        assert_eq!(decide(Label::Sexy, 0.85, &t), Severity::Warning);
        assert_eq!(decide(Label::Sexy, 0.7, &t), Severity::Info);
        assert_eq!(decide(Label::Sexy, 0.3, &t), Severity::Low);
    }

    #[test]
    fn test_hentai_single_threshold() {
        let t = SeverityThresholds::default();
        assert_eq!(decide(Label::Hentai, 0.71, &t), Severity::Warning);
        assert_eq!(decide(Label::Hentai, 0.7, &t), Severity::Info);
    }

    #[test]
    fn test_benign_always_none() {
        let t = SeverityThresholds::high_sensitivity();
        for c in sweep() {
            assert_eq!(decide(Label::Neutral, c, &t), Severity::None);
            assert_eq!(decide(Label::Drawings, c, &t), Severity::None);
        }
    }

    #[test]
    fn test_monotonic_in_confidence() {
        for t in [SeverityThresholds::default(), SeverityThresholds::high_sensitivity()] {
            for label in [Label::Porn, Label::Sexy, Label::Hentai] {
                let mut prev = Severity::None;
                for c in sweep() {
                    let s = decide(label, c, &t);
                    assert!(s >= prev, "{} dropped from {} to {} at {}", label, prev, s, c);
                    prev = s;
                }
            }
        }
    }

    #[test]
    fn test_configured_thresholds_end_to_end() {
        let t = SeverityThresholds { porn: Tiers::new(0.7, 0.5), ..Default::default() };
        let result = ClassificationResult::from_raw(&[0.05, 0.05, 0.1, 0.75, 0.05]).unwrap();
        assert_eq!(decide_result(&result, &t), Severity::Critical);
    }
}
