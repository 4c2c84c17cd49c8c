//! Confidence policy applied to the best search hit.

use serde::Serialize;

use crate::catalog::Fingering;
use crate::index::ChordMatch;

/// Score at or above which the matched fingering is pushed as a correction.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.85;
/// Score below which the user is told to adjust their hand.
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f32 = 0.4;

/// Identifier reported when nothing matched.
pub const UNKNOWN_CHORD: &str = "unknown";
pub const NO_MATCH_MESSAGE: &str = "No chord matches found";
pub const LOW_CONFIDENCE_MESSAGE: &str = "Low confidence - try adjusting hand position";

/// Result of one inference, before it is stamped and put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceOutcome {
    pub chord_id: String,
    /// Best score clamped into `[0, 1]`.
    pub confidence: f32,
    pub fingering: Fingering,
    pub correction_active: bool,
    pub override_notes: Option<Vec<u8>>,
    pub message: Option<String>,
}

impl InferenceOutcome {
    /// Sentinel for an empty match list.
    pub fn unknown() -> Self {
        Self {
            chord_id: UNKNOWN_CHORD.to_string(),
            confidence: 0.0,
            fingering: Fingering::NEUTRAL,
            correction_active: false,
            override_notes: None,
            message: Some(NO_MATCH_MESSAGE.to_string()),
        }
    }
}

/// The two thresholds are independent. A score in
/// `[low_confidence_threshold, score_threshold)` yields neither a correction
/// nor a message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub score_threshold: f32,
    pub low_confidence_threshold: f32,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

impl DecisionPolicy {
    pub fn new(score_threshold: f32, low_confidence_threshold: f32) -> Self {
        Self {
            score_threshold,
            low_confidence_threshold,
        }
    }

    pub fn decide(&self, matches: &[ChordMatch]) -> InferenceOutcome {
        let Some(best) = matches.first() else {
            return InferenceOutcome::unknown();
        };

        let correction_active = best.score >= self.score_threshold;
        let message = (best.score < self.low_confidence_threshold)
            .then(|| LOW_CONFIDENCE_MESSAGE.to_string());

        InferenceOutcome {
            chord_id: best.chord_id.clone(),
            confidence: best.score.clamp(0.0, 1.0),
            fingering: best.fingering,
            correction_active,
            override_notes: correction_active.then(|| best.midi_notes.clone()),
            message,
        }
    }
}
