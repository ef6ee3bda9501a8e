//! Confidence scoring: display bands and the acceptance gate.

use serde::{Deserialize, Serialize};

/// Default acceptance threshold for a predicted form.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Display band for a confidence score.
///
/// Bands are wording only and do not follow the acceptance threshold: a
/// form accepted at 0.7 is still described as "medium". Use [`apply_gate`]
/// for decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            ConfidenceLevel::VeryHigh
        } else if score >= 0.75 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else if score >= 0.25 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::VeryHigh => "very high",
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::VeryLow => "very low",
        }
    }
}

/// Outcome of applying the gate to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Start filling the candidate form.
    Accept,
    /// Ask the user to pick among alternatives.
    Clarify,
}

/// Accept when a candidate exists, its score reaches `threshold`, and the
/// model did not ask for an explicit user choice.
pub fn apply_gate(
    score: f64,
    has_candidate: bool,
    requires_user_selection: bool,
    threshold: f64,
) -> GateDecision {
    if has_candidate && !requires_user_selection && score >= threshold {
        GateDecision::Accept
    } else {
        GateDecision::Clarify
    }
}

/// Clamp model output into `[0, 1]`; anything outside (or NaN) becomes 0.
pub fn sanitize_score(score: f64) -> f64 {
    if (0.0..=1.0).contains(&score) {
        score
    } else {
        0.0
    }
}

/// "72% (medium)". Display only; see [`ConfidenceLevel`].
pub fn describe(score: f64) -> String {
    format!(
        "{:.0}% ({})",
        score * 100.0,
        ConfidenceLevel::from_score(score).as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(ConfidenceLevel::from_score(0.95), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_score(0.9), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_score(0.8), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.7), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.3), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.1), ConfidenceLevel::VeryLow);
    }

    #[test]
    fn test_gate_accepts_at_and_above_threshold() {
        for score in [0.7, 0.71, 0.85, 1.0] {
            assert_eq!(apply_gate(score, true, false, 0.7), GateDecision::Accept);
        }
    }

    #[test]
    fn test_gate_clarifies_below_threshold() {
        for score in [0.0, 0.3, 0.69, 0.6999] {
            assert_eq!(apply_gate(score, true, false, 0.7), GateDecision::Clarify);
        }
    }

    #[test]
    fn test_gate_respects_explicit_flag_and_missing_candidate() {
        assert_eq!(apply_gate(0.95, true, true, 0.7), GateDecision::Clarify);
        assert_eq!(apply_gate(0.95, false, false, 0.7), GateDecision::Clarify);
    }

    #[test]
    fn test_sanitize_score() {
        assert_eq!(sanitize_score(0.4), 0.4);
        assert_eq!(sanitize_score(1.5), 0.0);
        assert_eq!(sanitize_score(-0.1), 0.0);
        assert_eq!(sanitize_score(f64::NAN), 0.0);
    }

    #[test]
    fn test_band_is_independent_of_gate() {
        let threshold = DEFAULT_CONFIDENCE_THRESHOLD;
        assert_eq!(apply_gate(threshold, true, false, threshold), GateDecision::Accept);
        assert_eq!(ConfidenceLevel::from_score(threshold), ConfidenceLevel::Medium);
        assert_eq!(describe(threshold), "70% (medium)");
        assert_eq!(apply_gate(0.69, true, false, threshold), GateDecision::Clarify);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(0.72), "72% (medium)");
    }
}
