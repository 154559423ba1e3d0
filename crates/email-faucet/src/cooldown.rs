//! Per-wallet claim cooldown.

use chrono::{DateTime, Duration, Utc};

/// Minimum time between two payouts to the same wallet.
pub const COOLDOWN_HOURS: i64 = 24;

/// Result of a cooldown evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    /// Remaining wait, rounded up to a whole hour. Zero when eligible.
    pub retry_after: Duration,
}

impl Eligibility {
    /// Whole hours to report to the user.
    pub fn retry_after_hours(&self) -> i64 {
        self.retry_after.num_hours()
    }
}

/// Decide whether a wallet last paid at `last_claim` may be paid again at `now`.
pub fn is_eligible(last_claim: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Eligibility {
    let Some(last_claim) = last_claim else {
        return Eligibility {
            eligible: true,
            retry_after: Duration::zero(),
        };
    };

    let remaining = Duration::hours(COOLDOWN_HOURS) - now.signed_duration_since(last_claim);
    if remaining <= Duration::zero() {
        return Eligibility {
            eligible: true,
            retry_after: Duration::zero(),
        };
    }

    let mut hours = remaining.num_hours();
    if Duration::hours(hours) < remaining {
        hours += 1;
    }

    Eligibility {
        eligible: false,
        retry_after: Duration::hours(hours),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_never_claimed_is_eligible() {
        let result = is_eligible(None, t0());
        assert!(result.eligible);
        assert_eq!(result.retry_after, Duration::zero());
    }

    #[test]
    fn test_exactly_24_hours_is_eligible() {
        let result = is_eligible(Some(t0()), t0() + Duration::hours(24));
        assert!(result.eligible);
    }

    #[test]
    fn test_23h59m_rounds_up_to_one_hour() {
        let now = t0() + Duration::hours(23) + Duration::minutes(59);
        let result = is_eligible(Some(t0()), now);
        assert!(!result.eligible);
        assert_eq!(result.retry_after, Duration::hours(1));
        assert_eq!(result.retry_after_hours(), 1);
    }

    #[test]
    fn test_one_hour_after_claim_waits_23_hours() {
        let result = is_eligible(Some(t0()), t0() + Duration::hours(1));
        assert!(!result.eligible);
        assert_eq!(result.retry_after_hours(), 23);
    }

    #[test]
    fn test_partial_hours_round_up() {
        let now = t0() + Duration::minutes(90);
        let result = is_eligible(Some(t0()), now);
        // 22h30m remaining
        assert_eq!(result.retry_after_hours(), 23);

        let now = t0() + Duration::seconds(1);
        assert_eq!(is_eligible(Some(t0()), now).retry_after_hours(), 24);
    }

    #[test]
    fn test_sub_millisecond_remainder_rounds_up() {
        // 1h plus 500µs remaining
        let now = t0() + Duration::hours(23) - Duration::microseconds(500);
        let result = is_eligible(Some(t0()), now);
        assert!(!result.eligible);
        assert_eq!(result.retry_after_hours(), 2);

        let now = t0() + Duration::hours(24) - Duration::nanoseconds(1);
        assert_eq!(is_eligible(Some(t0()), now).retry_after_hours(), 1);
    }

    #[test]
    fn test_long_ago_is_eligible() {
        let result = is_eligible(Some(t0()), t0() + Duration::days(30));
        assert!(result.eligible);
    }

    #[test]
    fn test_claim_in_the_future_stays_ineligible() {
        let result = is_eligible(Some(t0() + Duration::hours(2)), t0());
        assert!(!result.eligible);
        assert_eq!(result.retry_after_hours(), 26);
    }
}
