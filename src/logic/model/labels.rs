//! Label Set
//!
//! Fixed taxonomy bound to the model's output layout.
//! Order of `Label::ALL` == order of the model's output vector.

use serde::{Deserialize, Serialize};

use crate::logic::error::{PipelineError, PipelineResult, UnknownVariant};

/// Number of classes the model emits
pub const LABEL_COUNT: usize = 5;

/// Content categories, in model output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Drawings,
    Hentai,
    Neutral,
    Porn,
    Sexy,
}

/// Risk tier of a label, drives the shape of the severity policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    /// Explicit content
    High,
    /// Suggestive content
    Moderate,
    /// Stylized / ambiguous content
    Stylized,
    /// Never recorded
    Benign,
}

impl Label {
    pub const ALL: [Label; LABEL_COUNT] = [
        Label::Drawings,
        Label::Hentai,
        Label::Neutral,
        Label::Porn,
        Label::Sexy,
    ];

    /// Position in the model output vector
    pub fn index(&self) -> usize {
        match self {
            Label::Drawings => 0,
            Label::Hentai => 1,
            Label::Neutral => 2,
            Label::Porn => 3,
            Label::Sexy => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Label> {
        Label::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Drawings => "drawings",
            Label::Hentai => "hentai",
            Label::Neutral => "neutral",
            Label::Porn => "porn",
            Label::Sexy => "sexy",
        }
    }

    pub fn parse(value: &str) -> Result<Label, UnknownVariant> {
        Label::ALL
            .iter()
            .copied()
            .find(|l| l.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownVariant::new("label", value))
    }

    pub fn risk(&self) -> RiskTier {
        match self {
            Label::Porn => RiskTier::High,
            Label::Sexy => RiskTier::Moderate,
            Label::Hentai => RiskTier::Stylized,
            Label::Drawings | Label::Neutral => RiskTier::Benign,
        }
    }

    pub fn is_benign(&self) -> bool {
        self.risk() == RiskTier::Benign
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Output layout and label table must agree at compile time.
const _: () = {
    let mut i = 0;
    while i < LABEL_COUNT {
        assert!(Label::ALL[i] as usize == i);
        i += 1;
    }
};

/// Per-label scores, one slot per label in model output order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelScores([f32; LABEL_COUNT]);

impl LabelScores {
    /// Build from a raw output row. Width must equal `LABEL_COUNT`;
    /// values are clamped into [0, 1], non-finite values are rejected.
    pub fn from_slice(raw: &[f32]) -> PipelineResult<Self> {
        if raw.len() != LABEL_COUNT {
            return Err(PipelineError::Inference(format!(
                "model output width {} does not match label count {}",
                raw.len(),
                LABEL_COUNT
            )));
        }

        let mut scores = [0.0f32; LABEL_COUNT];
        for (i, value) in raw.iter().enumerate() {
            if !value.is_finite() {
                return Err(PipelineError::Inference(format!(
                    "non-finite score for '{}'",
                    Label::ALL[i]
                )));
            }
            scores[i] = value.clamp(0.0, 1.0);
        }

        Ok(Self(scores))
    }

    pub fn get(&self, label: Label) -> f32 {
        self.0[label.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, f32)> + '_ {
        Label::ALL.iter().map(move |l| (*l, self.0[l.index()]))
    }

    /// Highest scoring label; ties resolve to the earlier label
    pub fn top(&self) -> (Label, f32) {
        let mut best = (Label::ALL[0], self.0[0]);
        for (label, score) in self.iter().skip(1) {
            if score > best.1 {
                best = (label, score);
            }
        }
        best
    }
}
