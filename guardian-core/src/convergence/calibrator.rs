//! Confidence Calibrator: blends consensus strength with cohort
//! size into a single confidence score, then optionally boosts it toward
//! the caller's requested target, bounded so the boost can never overstate
//! confidence beyond what was asked for.

/// Maximum multiplier the calibrator may apply when boosting toward
/// `target_confidence`.
const MAX_BOOST_MULTIPLIER: f64 = 1.2;

/// `(confidence, confidence_boosted)`. `participant_count` is the
/// number of responses that participated in synthesis (N=0 yields
/// confidence 0, per the failure-semantics table).
pub fn calibrate(consensus_strength: f64, participant_count: usize, target_confidence: f64) -> (f64, bool) {
    if participant_count == 0 {
        return (0.0, false);
    }

    let n = participant_count as f64;
    let raw = 0.6 * consensus_strength + 0.2 * (n / 5.0).min(1.0) + 0.2 * (n / 3.0).min(1.0);
    let base = round3(raw.clamp(0.0, 1.0));

    if target_confidence > base {
        let boosted = round3((base * MAX_BOOST_MULTIPLIER).min(target_confidence));
        if boosted > base {
            return (boosted, true);
        }
    }

    (base, false)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_participants_yields_zero_confidence() {
        let (confidence, boosted) = calibrate(1.0, 0, 0.85);
        assert_eq!(confidence, 0.0);
        assert!(!boosted);
    }

    #[test]
    fn full_consensus_with_enough_participants_is_high_confidence() {
        let (confidence, boosted) = calibrate(1.0, 5, 0.85);
        assert_eq!(confidence, 1.0);
        assert!(!boosted);
    }

    #[test]
    fn confidence_is_clamped_and_rounded_to_three_decimals() {
        let (confidence, _) = calibrate(0.8333333, 5, 0.5);
        assert_eq!(confidence, (confidence * 1000.0).round() / 1000.0);
    }

    #[test]
    fn low_consensus_boosts_toward_target_but_never_past_it() {
        let (confidence, boosted) = calibrate(0.2, 1, 0.9);
        assert!(confidence <= 0.9);
        assert!(boosted);
    }

    #[test]
    fn boost_never_exceeds_the_bounded_multiplier() {
        let (confidence, _) = calibrate(0.1, 1, 1.0);
        let base = round3((0.6 * 0.1 + 0.2 * (1.0f64 / 5.0) + 0.2 * (1.0f64 / 3.0)).clamp(0.0, 1.0));
        assert!(confidence <= base * MAX_BOOST_MULTIPLIER + 1e-9);
    }

    #[test]
    fn no_boost_flag_when_base_already_meets_target() {
        let (_, boosted) = calibrate(1.0, 5, 0.5);
        assert!(!boosted);
    }
}
