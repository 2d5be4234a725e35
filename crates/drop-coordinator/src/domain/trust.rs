//! Trust scoring: a pure weighted combine of fingerprint confidence, join
//! timing, proof-of-work verification, and optional behavioral signal,
//! gating admission into the registration path. No state of its own.

#[derive(Debug, Clone)]
pub struct TrustInput {
    pub fingerprint: String,
    pub fingerprint_confidence: f64,
    pub timing_ms: u64,
    pub pow_verified: bool,
    pub behavior_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrustResult {
    pub trust_score: f64,
    pub allowed: bool,
    pub reason: Option<String>,
}

const FINGERPRINT_MIN_LEN: usize = 4;

fn timing_score(ms: u64) -> f64 {
    match ms {
        0..=199 => 0.0,
        200..=999 => 50.0,
        1000..=5000 => 100.0,
        5001..=10000 => 80.0,
        _ => 60.0,
    }
}

/// Scores a registration attempt against the operator's trust `threshold`
/// and the fingerprint `confidence_threshold`.
pub fn score_trust(input: &TrustInput, threshold: f64, confidence_threshold: f64) -> TrustResult {
    let confidence = input.fingerprint_confidence.clamp(0.0, 100.0);
    let fingerprint_valid = input.fingerprint.len() >= FINGERPRINT_MIN_LEN && confidence >= confidence_threshold;

    let timing = timing_score(input.timing_ms);
    let pow = if input.pow_verified { 100.0 } else { 0.0 };

    let score = match input.behavior_score {
        Some(behavior) => {
            0.35 * confidence + 0.25 * timing + 0.20 * pow + 0.20 * behavior.clamp(0.0, 100.0)
        }
        None => 0.40 * confidence + 0.30 * timing + 0.30 * pow,
    };

    let meets_threshold = score.round() >= threshold;
    let allowed = meets_threshold && fingerprint_valid && input.pow_verified;

    let reason = if !fingerprint_valid {
        Some("Invalid fingerprint".to_string())
    } else if !input.pow_verified {
        Some("PoW not verified".to_string())
    } else if !meets_threshold {
        Some("Trust score below threshold".to_string())
    } else {
        None
    };

    TrustResult {
        trust_score: score,
        allowed,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> TrustInput {
        TrustInput {
            fingerprint: "abcd1234".to_string(),
            fingerprint_confidence: 90.0,
            timing_ms: 2000,
            pow_verified: true,
            behavior_score: None,
        }
    }

    #[test]
    fn good_input_is_allowed() {
        let result = score_trust(&base_input(), 70.0, 50.0);
        assert!(result.allowed);
        assert!(result.reason.is_none());
    }

    #[test]
    fn short_fingerprint_is_invalid() {
        let mut input = base_input();
        input.fingerprint = "ab".to_string();
        let result = score_trust(&input, 70.0, 50.0);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("Invalid fingerprint"));
    }

    #[test]
    fn unverified_pow_is_rejected() {
        let mut input = base_input();
        input.pow_verified = false;
        let result = score_trust(&input, 70.0, 50.0);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("PoW not verified"));
    }

    #[test]
    fn behavior_signal_changes_blend() {
        let mut input = base_input();
        input.behavior_score = Some(100.0);
        let with_behavior = score_trust(&input, 70.0, 50.0);
        input.behavior_score = None;
        let without_behavior = score_trust(&input, 70.0, 50.0);
        assert_ne!(with_behavior.trust_score, without_behavior.trust_score);
    }

    #[test]
    fn below_threshold_is_rejected() {
        let mut input = base_input();
        input.fingerprint_confidence = 10.0;
        input.timing_ms = 50;
        let result = score_trust(&input, 90.0, 5.0);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("Trust score below threshold"));
    }
}
