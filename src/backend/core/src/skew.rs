//! Client time acceptance.
//!
//! A submitting client may assert what it believes server time was when the
//! event was captured (`approxServerMillis`, typically its last synced offset
//! applied to its own clock). The claim is honored when it lies within the
//! configured tolerance of authoritative now; otherwise authoritative now is
//! used. Equality with the tolerance is accepted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock;

/// How the official timestamp of a record was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// No client claim; authoritative time at receipt.
    Server,
    /// Client claim within tolerance; claim used.
    ClientAccepted,
    /// Client claim invalid or out of tolerance; authoritative time used.
    ClientRejected,
}

/// Outcome of evaluating one client claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkewDecision {
    pub accepted: bool,
    pub epoch_millis: i64,
    /// Claim minus authoritative now, when the claim was a finite number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew_millis: Option<i64>,
    /// A claim was submitted, valid or not.
    pub claim_present: bool,
}

impl SkewDecision {
    pub fn confidence(&self) -> Confidence {
        match (self.accepted, self.claim_present) {
            (true, _) => Confidence::ClientAccepted,
            (false, true) => Confidence::ClientRejected,
            (false, false) => Confidence::Server,
        }
    }
}

/// Decide between a client-claimed time and authoritative now.
///
/// `None` means no claim; `Some(NaN)` or infinities are claims that are
/// always rejected. An accepted claim is rounded to the nearest millisecond.
pub fn resolve(
    approx_server_millis: Option<f64>,
    authoritative_now: i64,
    tolerance_millis: i64,
) -> SkewDecision {
    let fallback = |skew_millis, claim_present| SkewDecision {
        accepted: false,
        epoch_millis: authoritative_now,
        skew_millis,
        claim_present,
    };

    let claim = match approx_server_millis {
        None => return fallback(None, false),
        Some(value) if !value.is_finite() => return fallback(None, true),
        Some(value) => value,
    };

    let diff = claim - authoritative_now as f64;
    // Saturating cast; only used for audit.
    let skew_millis = Some(diff.round() as i64);

    if diff.abs() > tolerance_millis as f64 {
        return fallback(skew_millis, true);
    }

    let rounded = claim.round();
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return fallback(skew_millis, true);
    }
    let epoch_millis = rounded as i64;
    if !clock::is_representable(epoch_millis) {
        return fallback(skew_millis, true);
    }

    SkewDecision {
        accepted: true,
        epoch_millis,
        skew_millis,
        claim_present: true,
    }
}

/// [`resolve`] bound to a deployment's tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkewPolicy {
    tolerance_millis: i64,
}

impl SkewPolicy {
    pub fn new(tolerance: Duration) -> Self {
        Self::from_millis(i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX))
    }

    pub fn from_millis(tolerance_millis: i64) -> Self {
        Self {
            tolerance_millis: tolerance_millis.max(0),
        }
    }

    pub fn tolerance_millis(&self) -> i64 {
        self.tolerance_millis
    }

    pub fn resolve(&self, approx_server_millis: Option<f64>, authoritative_now: i64) -> SkewDecision {
        resolve(approx_server_millis, authoritative_now, self.tolerance_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const TOLERANCE: i64 = 600_000;

    #[test]
    fn test_absent_claim_uses_authoritative_now() {
        let decision = resolve(None, NOW, TOLERANCE);
        assert!(!decision.accepted);
        assert_eq!(decision.epoch_millis, NOW);
        assert_eq!(decision.skew_millis, None);
        assert_eq!(decision.confidence(), Confidence::Server);
    }

    #[test]
    fn test_non_finite_claims_are_rejected() {
        for claim in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let decision = resolve(Some(claim), NOW, TOLERANCE);
            assert!(!decision.accepted);
            assert_eq!(decision.epoch_millis, NOW);
            assert_eq!(decision.confidence(), Confidence::ClientRejected);
        }
    }

    #[test]
    fn test_claim_within_tolerance_is_accepted() {
        for offset in [-TOLERANCE + 1, -5_000, 0, 1, 5_000, TOLERANCE - 1] {
            let decision = resolve(Some((NOW + offset) as f64), NOW, TOLERANCE);
            assert!(decision.accepted, "offset {offset}");
            assert_eq!(decision.epoch_millis, NOW + offset);
            assert_eq!(decision.skew_millis, Some(offset));
        }
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let early = resolve(Some((NOW - TOLERANCE) as f64), NOW, TOLERANCE);
        let late = resolve(Some((NOW + TOLERANCE) as f64), NOW, TOLERANCE);
        assert!(early.accepted);
        assert!(late.accepted);

        let too_early = resolve(Some((NOW - TOLERANCE - 1) as f64), NOW, TOLERANCE);
        let too_late = resolve(Some((NOW + TOLERANCE + 1) as f64), NOW, TOLERANCE);
        assert!(!too_early.accepted);
        assert!(!too_late.accepted);
        assert_eq!(too_late.epoch_millis, NOW);
        assert_eq!(too_late.skew_millis, Some(TOLERANCE + 1));
    }

    #[test]
    fn test_accepted_claim_is_rounded() {
        let down = resolve(Some(NOW as f64 - 1234.4), NOW, TOLERANCE);
        let up = resolve(Some(NOW as f64 - 1234.5), NOW, TOLERANCE);
        assert_eq!(down.epoch_millis, NOW - 1234);
        assert_eq!(up.epoch_millis, NOW - 1235);
    }

    #[test]
    fn test_far_claim_is_rejected_but_skew_is_kept() {
        let decision = resolve(Some((NOW - 7_200_000) as f64), NOW, TOLERANCE);
        assert!(!decision.accepted);
        assert_eq!(decision.epoch_millis, NOW);
        assert_eq!(decision.skew_millis, Some(-7_200_000));
        assert_eq!(decision.confidence(), Confidence::ClientRejected);
    }

    #[test]
    fn test_unrepresentable_claim_is_rejected_under_huge_tolerance() {
        let decision = resolve(Some(1e300), NOW, i64::MAX);
        assert!(!decision.accepted);
        assert_eq!(decision.epoch_millis, NOW);
    }

    #[test]
    fn test_policy_from_duration() {
        let policy = SkewPolicy::new(Duration::from_secs(12 * 60 * 60));
        assert_eq!(policy.tolerance_millis(), 43_200_000);

        let decision = policy.resolve(Some((NOW - 3_600_000) as f64), NOW);
        assert!(decision.accepted);
    }

    #[test]
    fn test_zero_tolerance_accepts_only_exact_claims() {
        let policy = SkewPolicy::from_millis(0);
        assert!(policy.resolve(Some(NOW as f64), NOW).accepted);
        assert!(!policy.resolve(Some((NOW + 1) as f64), NOW).accepted);
    }
}
