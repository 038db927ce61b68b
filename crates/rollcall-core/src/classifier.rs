//! Distance → confidence percentage → tier.

use crate::config::EngineConfig;
use crate::matcher::Candidate;
use crate::types::{MatchResult, Tier};

/// Map a distance to `(confidence, tier)`.
///
/// `confidence = clamp(1 - distance, 0, 1) * 100`; tiers rise with confidence.
pub fn classify(distance: f32, config: &EngineConfig) -> (f32, Tier) {
    let similarity = if distance.is_nan() {
        0.0
    } else {
        (1.0 - distance).clamp(0.0, 1.0)
    };
    let confidence = similarity * 100.0;

    let tier = if confidence >= config.high_threshold {
        Tier::High
    } else if confidence >= config.low_threshold {
        Tier::Low
    } else {
        Tier::Unknown
    };

    (confidence, tier)
}

/// Build the [`MatchResult`] for a matcher candidate.
///
/// No candidate is always `{None, 0, Unknown}`, even with `low_threshold = 0`.
/// Unknown results drop the candidate's student ID.
pub fn classify_candidate(candidate: &Candidate, config: &EngineConfig) -> MatchResult {
    let Some(student_id) = &candidate.student_id else {
        return MatchResult::unknown();
    };

    let (confidence, tier) = classify(candidate.distance, config);
    MatchResult {
        student_id: (tier != Tier::Unknown).then(|| student_id.clone()),
        confidence,
        tier,
    }
}
