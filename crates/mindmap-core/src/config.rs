//! Engine configuration, passed explicitly to every component.

use serde::{Deserialize, Serialize};

use crate::error::{MindmapError, MindmapResult};

/// Similarity cut-offs for the fast classification path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// At or above: stay in the current block.
    pub continue_threshold: f32,
    /// At or above (and below continue): dive deeper under the current block.
    pub deepen_threshold: f32,
    /// Below: the message looks unrelated. Still routed to the external
    /// classifier, which is the only thing that can decide on a tangent.
    pub tangent_threshold: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            continue_threshold: 0.85,
            deepen_threshold: 0.70,
            tangent_threshold: 0.65,
        }
    }
}

/// Where a similarity score falls relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityBand {
    Continue,
    Deepen,
    Ambiguous,
    Unrelated,
}

impl SimilarityBand {
    /// Whether this band needs the external classifier.
    pub fn needs_external(&self) -> bool {
        matches!(self, Self::Ambiguous | Self::Unrelated)
    }
}

impl Thresholds {
    /// Ties resolve to the higher band.
    pub fn band(&self, score: f32) -> SimilarityBand {
        if score >= self.continue_threshold {
            SimilarityBand::Continue
        } else if score >= self.deepen_threshold {
            SimilarityBand::Deepen
        } else if score >= self.tangent_threshold {
            SimilarityBand::Ambiguous
        } else {
            SimilarityBand::Unrelated
        }
    }

    pub fn validate(&self) -> MindmapResult<()> {
        let all = [
            ("continue_threshold", self.continue_threshold),
            ("deepen_threshold", self.deepen_threshold),
            ("tangent_threshold", self.tangent_threshold),
        ];
        for (name, value) in all {
            if !(0.0..=1.0).contains(&value) {
                return Err(MindmapError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.tangent_threshold > self.deepen_threshold
            || self.deepen_threshold > self.continue_threshold
        {
            return Err(MindmapError::Config(format!(
                "thresholds must satisfy tangent <= deepen <= continue, got {} / {} / {}",
                self.tangent_threshold, self.deepen_threshold, self.continue_threshold
            )));
        }
        Ok(())
    }
}

/// What to do when an external capability fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Log and carry on with the documented default.
    ContinueWithDefault,
    /// Surface the error to the caller.
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    /// Recent messages included in a turn prompt.
    pub context_window: usize,
    /// Message count at which a block is summarized for the first time.
    pub auto_summarize_after: usize,
    pub classification_failure: OnFailure,
    pub summary_failure: OnFailure,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            context_window: 3,
            auto_summarize_after: 6,
            classification_failure: OnFailure::ContinueWithDefault,
            summary_failure: OnFailure::ContinueWithDefault,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> MindmapResult<()> {
        self.thresholds.validate()?;
        if self.context_window == 0 {
            return Err(MindmapError::Config("context_window must be at least 1".into()));
        }
        Ok(())
    }
}
