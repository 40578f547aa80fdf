//! Exponential backoff with jitter.
//!
//! Shared policy for time-series flush retries and queue redelivery:
//! base 250 ms, factor 2, cap 30 s, jitter within ±25%.

use rand::Rng;
use std::time::Duration;

pub const BASE: Duration = Duration::from_millis(250);
pub const CAP: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt` (0-based), without jitter.
pub fn exponential(attempt: u32) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(20));
    BASE.saturating_mul(multiplier as u32).min(CAP)
}

/// Delay before retry number `attempt`, with ±25% jitter applied.
pub fn with_jitter(attempt: u32) -> Duration {
    let base = exponential(attempt);
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    base.mul_f64(factor).min(CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        assert_eq!(exponential(0), Duration::from_millis(250));
        assert_eq!(exponential(1), Duration::from_millis(500));
        assert_eq!(exponential(2), Duration::from_secs(1));
        assert_eq!(exponential(4), Duration::from_secs(4));
    }

    #[test]
    fn test_exponential_capped() {
        assert_eq!(exponential(10), CAP);
        assert_eq!(exponential(u32::MAX), CAP);
    }

    #[test]
    fn test_jitter_bounds() {
        for attempt in 0..8 {
            let base = exponential(attempt);
            for _ in 0..50 {
                let jittered = with_jitter(attempt);
                assert!(jittered >= base.mul_f64(0.75));
                assert!(jittered <= base.mul_f64(1.25).min(CAP));
            }
        }
    }
}
